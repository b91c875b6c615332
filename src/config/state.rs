// Application state module
// Shared, read-only after start-up apart from the shutdown signals

use std::sync::Arc;
use tokio::sync::{watch, Notify};

use super::types::Config;

/// Application state
pub struct AppState {
    pub config: Config,
    /// Notified once when the server should stop accepting connections
    pub shutdown_signal: Arc<Notify>,
    /// Flipped to `true` once the listener is closed; connections subscribe
    /// to it and finish their in-flight request before closing
    pub closing: watch::Sender<bool>,
    pub access_log: bool,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        let (closing, _) = watch::channel(false);
        Self {
            config: config.clone(),
            shutdown_signal: Arc::new(Notify::new()),
            closing,
            access_log: config.logging.access_log,
        }
    }
}
