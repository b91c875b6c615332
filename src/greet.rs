//! Greeting handler
//!
//! Answers the registered greeting route with `{"message": "Hello World!"}`.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::http;

pub const SALUTATION: &str = "Hello";
pub const DEFAULT_NAME: &str = "World";

/// JSON body of the greeting route
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Greeting {
    pub message: String,
}

impl Greeting {
    pub fn new(name: &str) -> Self {
        Self {
            message: format_message(SALUTATION, name),
        }
    }

    pub fn default_message() -> Self {
        Self::new(DEFAULT_NAME)
    }
}

pub fn format_message(salutation: &str, name: &str) -> String {
    format!("{salutation} {name}!")
}

/// Build the greeting response for `GET`/`HEAD` on the greeting route
pub fn handle_default_message(is_head: bool) -> Response<Full<Bytes>> {
    http::build_json_response(StatusCode::OK, &Greeting::default_message(), is_head)
}
