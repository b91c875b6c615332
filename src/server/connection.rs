// Connection module
// Accepts a single TCP connection and serves it with hyper's HTTP/1 server

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::net::TcpStream;

use crate::config::{AppState, PerformanceConfig};
use crate::handler;
use crate::logger;

/// Accept a connection, enforcing `performance.max_connections`.
///
/// # Arguments
///
/// * `stream` - The TCP stream to handle
/// * `peer_addr` - The peer's socket address
/// * `state` - Shared application state
/// * `conn_counter` - Active connection counter
pub fn accept_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: &Arc<AppState>,
    conn_counter: &Arc<AtomicUsize>,
) {
    // Increment first, then check, so concurrent accepts cannot both slip under the limit
    let prev_count = conn_counter.fetch_add(1, Ordering::SeqCst);

    if let Some(max_conn) = state.config.performance.max_connections {
        if prev_count >= usize::try_from(max_conn).unwrap_or(usize::MAX) {
            conn_counter.fetch_sub(1, Ordering::SeqCst);
            logger::log_warning(&format!(
                "Max connections reached: {prev_count}/{max_conn}. Connection rejected."
            ));
            drop(stream);
            return;
        }
    }

    if state.access_log {
        logger::log_connection_accepted(&peer_addr);
    }

    if let Err(e) = stream.set_nodelay(true) {
        logger::log_warning(&format!("Failed to set TCP_NODELAY for {peer_addr}: {e}"));
    }

    handle_connection(stream, peer_addr, Arc::clone(state), Arc::clone(conn_counter));
}

/// Serve one connection in a spawned task.
///
/// The connection is bounded by `connection_lifetime`. Once `state.closing`
/// flips, hyper finishes the in-flight request and closes the connection;
/// the counter is released when it ends.
fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: Arc<AppState>,
    conn_counter: Arc<AtomicUsize>,
) {
    tokio::spawn(async move {
        let io = TokioIo::new(stream);

        let perf = &state.config.performance;
        let header_timeout = Duration::from_secs(perf.read_timeout);
        let lifetime = connection_lifetime(perf);

        let mut builder = http1::Builder::new();
        builder.keep_alive(perf.keep_alive_timeout > 0);
        if perf.read_timeout > 0 {
            builder.timer(TokioTimer::new());
            builder.header_read_timeout(header_timeout);
        }

        let service_state = Arc::clone(&state);
        let conn = builder.serve_connection(
            io,
            service_fn(move |req| {
                handler::handle_request(req, Arc::clone(&service_state), peer_addr)
            }),
        );
        tokio::pin!(conn);

        let mut closing = state.closing.subscribe();
        let mut draining = *closing.borrow();
        if draining {
            conn.as_mut().graceful_shutdown();
        }

        let deadline = tokio::time::sleep(lifetime);
        tokio::pin!(deadline);

        let result = loop {
            tokio::select! {
                res = conn.as_mut() => break Some(res),
                changed = closing.changed(), if !draining => {
                    // A dropped sender means the server is gone as well
                    if changed.is_err() || *closing.borrow() {
                        draining = true;
                        conn.as_mut().graceful_shutdown();
                    }
                }
                () = &mut deadline => break None,
            }
        };

        match result {
            Some(Ok(())) => {}
            Some(Err(err)) => logger::log_connection_error(&err),
            None => {
                logger::log_warning(&format!(
                    "Connection from {peer_addr} timed out after {} seconds",
                    lifetime.as_secs()
                ));
            }
        }

        conn_counter.fetch_sub(1, Ordering::SeqCst);
    });
}

/// Upper bound on how long one connection may stay open.
///
/// `max(read_timeout, write_timeout)`, raised to `keep_alive_timeout` when
/// keep-alive is enabled.
pub fn connection_lifetime(perf: &PerformanceConfig) -> Duration {
    let request_bound = std::cmp::max(perf.read_timeout, perf.write_timeout);
    Duration::from_secs(std::cmp::max(request_bound, perf.keep_alive_timeout))
}
