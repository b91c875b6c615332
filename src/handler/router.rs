//! Request routing dispatch module
//!
//! Entry point for HTTP request processing: method validation, body size
//! check, route matching and access logging.

use crate::config::{AppState, HttpConfig};
use crate::greet;
use crate::handler::static_files;
use crate::http;
use crate::logger::{self, AccessLogEntry};
use http_body_util::Full;
use hyper::body::{Body, Bytes};
use hyper::header::{HeaderMap, HeaderValue};
use hyper::{Method, Request, Response, Version};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

/// Request data needed after the request itself is released
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub version: Version,
    pub is_head: bool,
    pub if_none_match: Option<String>,
    pub referer: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestContext {
    fn from_request<B>(req: &Request<B>) -> Self {
        let header = |name: &str| header_string(req.headers(), name);
        Self {
            method: req.method().clone(),
            path: req.uri().path().to_string(),
            query: req.uri().query().map(ToString::to_string),
            version: req.version(),
            is_head: req.method() == Method::HEAD,
            if_none_match: header("if-none-match"),
            referer: header("referer"),
            user_agent: header("user-agent"),
        }
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
}

/// Main entry point for HTTP request handling
///
/// The request body is never read, so any body type is accepted.
pub async fn handle_request<B>(
    req: Request<B>,
    state: Arc<AppState>,
    remote_addr: SocketAddr,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let started = Instant::now();
    let ctx = RequestContext::from_request(&req);
    let http_config = &state.config.http;

    let rejected = check_http_method(&ctx.method, http_config.enable_cors)
        .or_else(|| check_body_size(req.headers(), http_config.max_body_size));

    let mut response = match rejected {
        Some(resp) => resp,
        None => route_request(&ctx, &state).await,
    };

    apply_common_headers(&mut response, http_config);

    if state.access_log {
        log_access(&ctx, &response, remote_addr, started, &state);
    }

    Ok(response)
}

/// Non-GET/HEAD methods never reach a route
fn check_http_method(method: &Method, enable_cors: bool) -> Option<Response<Full<Bytes>>> {
    match *method {
        Method::GET | Method::HEAD => None,
        Method::OPTIONS => Some(http::build_options_response(enable_cors)),
        _ => {
            logger::log_warning(&format!("Method not allowed: {method}"));
            Some(http::build_405_response())
        }
    }
}

/// Validate Content-Length header and return 413 if exceeded
fn check_body_size(headers: &HeaderMap, max_body_size: u64) -> Option<Response<Full<Bytes>>> {
    let content_length = headers.get("content-length")?;
    content_length.to_str().map_or_else(
        |_| {
            logger::log_warning("Content-Length header contains non-ASCII characters");
            None
        },
        |size_str| match size_str.parse::<u64>() {
            Ok(size) if size > max_body_size => {
                logger::log_error(&format!(
                    "Request body too large: {size} bytes (max: {max_body_size})"
                ));
                Some(http::build_413_response())
            }
            Err(_) => {
                logger::log_warning(&format!(
                    "Invalid Content-Length value: '{size_str}', skipping size check"
                ));
                None
            }
            _ => None,
        },
    )
}

/// Route request based on path and configuration
async fn route_request(ctx: &RequestContext, state: &Arc<AppState>) -> Response<Full<Bytes>> {
    let config = &state.config;
    let health = &config.routes.health;

    if health.enabled && (ctx.path == health.liveness_path || ctx.path == health.readiness_path) {
        return http::build_health_response("ok", ctx.is_head);
    }

    if ctx.path == config.greet.path {
        return greet::handle_default_message(ctx.is_head);
    }

    if config.site.enabled {
        return static_files::serve_site(ctx, &config.site).await;
    }

    http::build_404_response()
}

fn apply_common_headers(response: &mut Response<Full<Bytes>>, http_config: &HttpConfig) {
    let headers = response.headers_mut();
    match HeaderValue::from_str(&http_config.server_name) {
        Ok(value) => {
            headers.insert(hyper::header::SERVER, value);
        }
        Err(e) => logger::log_warning(&format!(
            "Invalid server_name '{}': {e}",
            http_config.server_name
        )),
    }
    if http_config.enable_cors {
        headers.insert(
            hyper::header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        );
    }
}

fn log_access(
    ctx: &RequestContext,
    response: &Response<Full<Bytes>>,
    remote_addr: SocketAddr,
    started: Instant,
    state: &AppState,
) {
    let mut entry = AccessLogEntry::new(
        remote_addr.ip().to_string(),
        ctx.method.to_string(),
        ctx.path.clone(),
    );
    entry.query.clone_from(&ctx.query);
    entry.http_version = version_label(ctx.version).to_string();
    entry.status = response.status().as_u16();
    entry.body_bytes = usize::try_from(response.body().size_hint().exact().unwrap_or(0))
        .unwrap_or(usize::MAX);
    entry.referer.clone_from(&ctx.referer);
    entry.user_agent.clone_from(&ctx.user_agent);
    entry.request_time_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);

    logger::log_access(&entry, &state.config.logging.access_log_format);
}

fn version_label(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_2 => "2",
        Version::HTTP_3 => "3",
        _ => "1.1",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use http_body_util::BodyExt;
    use hyper::StatusCode;

    fn test_config() -> Config {
        let mut cfg = Config::load_from("does-not-exist/greet-config").unwrap();
        cfg.logging.access_log = false;
        cfg
    }

    fn state_with(cfg: &Config) -> Arc<AppState> {
        Arc::new(AppState::new(cfg))
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn request(method: Method, uri: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    async fn send(state: &Arc<AppState>, req: Request<Full<Bytes>>) -> (StatusCode, HeaderMap, Bytes) {
        let resp = handle_request(req, Arc::clone(state), peer()).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, headers, body)
    }

    #[tokio::test]
    async fn test_get_root_greets() {
        let state = state_with(&test_config());
        let (status, headers, body) = send(&state, request(Method::GET, "/")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["content-type"], "application/json");
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json.as_object().unwrap().len(), 1);
        assert_eq!(json["message"], "Hello World!");
    }

    #[tokio::test]
    async fn test_request_headers_and_body_ignored() {
        let state = state_with(&test_config());
        let req = Request::builder()
            .method(Method::GET)
            .uri("/?name=Rust")
            .header("accept", "text/plain")
            .body(Full::new(Bytes::from_static(b"ignored")))
            .unwrap();
        let (status, _, body) = send(&state, req).await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["message"], "Hello World!");
    }

    #[tokio::test]
    async fn test_repeated_requests_identical() {
        let state = state_with(&test_config());
        let (_, _, first) = send(&state, request(Method::GET, "/")).await;
        let (_, _, second) = send(&state, request(Method::GET, "/")).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_head_root_has_empty_body() {
        let state = state_with(&test_config());
        let (_, _, get_body) = send(&state, request(Method::GET, "/")).await;
        let (status, headers, body) = send(&state, request(Method::HEAD, "/")).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());
        assert_eq!(headers["content-length"], get_body.len().to_string().as_str());
    }

    #[tokio::test]
    async fn test_post_not_allowed() {
        let state = state_with(&test_config());
        let (status, headers, _) = send(&state, request(Method::POST, "/")).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(headers["allow"], "GET, HEAD, OPTIONS");
    }

    #[tokio::test]
    async fn test_options_no_content() {
        let state = state_with(&test_config());
        let (status, _, body) = send(&state, request(Method::OPTIONS, "/")).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_path_not_found() {
        let state = state_with(&test_config());
        let (status, _, _) = send(&state, request(Method::GET, "/greet/Bob")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        let state = state_with(&test_config());
        for path in ["/healthz", "/readyz"] {
            let (status, _, body) = send(&state, request(Method::GET, path)).await;
            assert_eq!(status, StatusCode::OK);
            let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(json["status"], "ok");
        }
    }

    #[tokio::test]
    async fn test_health_disabled() {
        let mut cfg = test_config();
        cfg.routes.health.enabled = false;
        let state = state_with(&cfg);
        let (status, _, _) = send(&state, request(Method::GET, "/healthz")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_configured_greet_path() {
        let mut cfg = test_config();
        cfg.greet.path = "/api/greet".to_string();
        let state = state_with(&cfg);

        let (status, _, body) = send(&state, request(Method::GET, "/api/greet")).await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["message"], "Hello World!");

        let (status, _, _) = send(&state, request(Method::GET, "/")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_body_too_large() {
        let state = state_with(&test_config());
        let req = Request::builder()
            .method(Method::GET)
            .uri("/")
            .header("content-length", "999999999")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let (status, _, _) = send(&state, req).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_server_and_cors_headers() {
        let mut cfg = test_config();
        cfg.http.enable_cors = true;
        let state = state_with(&cfg);
        let (_, headers, _) = send(&state, request(Method::GET, "/")).await;
        assert_eq!(headers["server"], "greet-server");
        assert_eq!(headers["access-control-allow-origin"], "*");
    }

    #[tokio::test]
    async fn test_site_fallback_and_etag() {
        let root = std::env::temp_dir().join(format!("greet-router-site-{}", std::process::id()));
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("index.html"), "<button>Click Me To Greet</button>").unwrap();

        let mut cfg = test_config();
        cfg.greet.path = "/api/greet".to_string();
        cfg.site.enabled = true;
        cfg.site.root = root.to_str().unwrap().to_string();
        let state = state_with(&cfg);

        let (status, headers, body) = send(&state, request(Method::GET, "/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["content-type"], "text/html; charset=utf-8");
        assert_eq!(&body[..], b"<button>Click Me To Greet</button>");

        let etag = headers["etag"].to_str().unwrap().to_string();
        let req = Request::builder()
            .uri("/index.html")
            .header("if-none-match", etag)
            .body(Full::new(Bytes::new()))
            .unwrap();
        let (status, _, _) = send(&state, req).await;
        assert_eq!(status, StatusCode::NOT_MODIFIED);

        let (status, _, _) = send(&state, request(Method::GET, "/missing.js")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_version_label() {
        assert_eq!(version_label(Version::HTTP_11), "1.1");
        assert_eq!(version_label(Version::HTTP_10), "1.0");
        assert_eq!(version_label(Version::HTTP_2), "2");
    }
}
