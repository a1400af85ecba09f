//! Security Middleware for the Civic API
//!
//! Operator surfaces (`/admin`, `/clerk`) need an API key; citizen routes are
//! keyed by session token and only pass through the shared layers: per-client
//! rate limiting, body size and method checks, response hardening headers and
//! request logging with masked client addresses.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::CivicConfig;

/// Security configuration for middleware
#[derive(Debug, Clone)]
pub struct SecurityMiddlewareConfig {
    /// Enable API key authentication on protected paths
    pub enable_auth: bool,
    /// Valid operator API keys
    pub api_keys: Vec<String>,
    /// Requests per minute per client
    pub rate_limit_per_minute: u32,
    /// Maximum request body size in bytes
    pub max_request_size: usize,
    pub log_requests: bool,
    /// Mask client addresses in logs
    pub sanitize_logs: bool,
    /// Path prefixes that require an API key
    pub protected_paths: Vec<String>,
}

impl Default for SecurityMiddlewareConfig {
    fn default() -> Self {
        Self {
            enable_auth: true,
            api_keys: Vec::new(),
            rate_limit_per_minute: 120,
            max_request_size: 64 * 1024,
            log_requests: true,
            sanitize_logs: true,
            protected_paths: vec!["/admin".to_string(), "/clerk".to_string()],
        }
    }
}

impl SecurityMiddlewareConfig {
    pub fn from_config(config: &CivicConfig) -> Self {
        Self {
            enable_auth: config.security.enable_auth,
            api_keys: config.security.api_keys.clone(),
            rate_limit_per_minute: config.security.rate_limit_per_minute,
            max_request_size: config.security.max_request_size,
            log_requests: config.logging.log_requests,
            sanitize_logs: config.logging.sanitize_logs,
            ..Self::default()
        }
    }

    fn is_protected(&self, path: &str) -> bool {
        self.protected_paths.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    used: u32,
}

/// Verdict for one request against its client's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_after_secs: u64,
}

/// Fixed-window request counter keyed by client address
#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<String, Window>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        Self::with_window(requests_per_minute, Duration::from_secs(60))
    }

    pub fn with_window(limit: u32, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            limit,
            window,
        }
    }

    /// Count one request for `client`.
    pub fn check(&self, client: &str) -> RateDecision {
        let now = Instant::now();
        let mut slot = self
            .windows
            .entry(client.to_string())
            .or_insert(Window { started: now, used: 0 });

        if now.duration_since(slot.started) >= self.window {
            *slot = Window { started: now, used: 0 };
        }
        let reset_after_secs = self
            .window
            .saturating_sub(now.duration_since(slot.started))
            .as_secs();

        let allowed = slot.used < self.limit;
        if allowed {
            slot.used += 1;
        }
        RateDecision {
            allowed,
            remaining: self.limit - slot.used.min(self.limit),
            reset_after_secs,
        }
    }

    /// Forget clients idle for more than two windows
    pub fn cleanup(&self) {
        let now = Instant::now();
        let horizon = self.window * 2;
        self.windows
            .retain(|_, slot| now.duration_since(slot.started) < horizon);
    }

    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}

/// Shared state for security middleware
#[derive(Clone)]
pub struct SecurityState {
    pub config: SecurityMiddlewareConfig,
    pub rate_limiter: Arc<RateLimiter>,
}

impl SecurityState {
    pub fn new(config: SecurityMiddlewareConfig) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit_per_minute));
        Self {
            config,
            rate_limiter,
        }
    }

    /// Client address as it may appear in logs.
    fn loggable(&self, client: String) -> String {
        if self.config.sanitize_logs {
            sanitize_for_log(&client)
        } else {
            client
        }
    }
}

/// Client address: first forwarded hop, then the socket peer.
///
/// The peer is only known when the server runs with connect info.
fn client_ip(request: &Request) -> String {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .or_else(|| request.headers().get("x-real-ip"))
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    match forwarded {
        Some(ip) => ip.to_string(),
        None => request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string()),
    }
}

/// Mask a value for logging, keeping four characters at each end
pub fn sanitize_for_log(value: &str) -> String {
    if value.len() <= 8 || !value.is_ascii() {
        return "*".repeat(value.chars().count());
    }
    format!("{}...{}", &value[..4], &value[value.len() - 4..])
}

fn presented_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(key.trim());
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

/// Operator API key check on protected paths
pub async fn auth_middleware(
    State(state): State<SecurityState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let path = request.uri().path();
    if !state.config.enable_auth || !state.config.is_protected(path) {
        return Ok(next.run(request).await);
    }

    let refusal = match presented_key(request.headers()) {
        Some(key) if state.config.api_keys.iter().any(|k| k == key) => None,
        Some(_) => Some("Operator key rejected"),
        None => Some("Operator key missing"),
    };

    match refusal {
        None => {
            debug!(path = %path, "Operator key accepted");
            Ok(next.run(request).await)
        }
        Some(reason) => {
            warn!(path = %path, "{}", reason);
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

fn set_rate_headers(headers: &mut HeaderMap, limit: u32, decision: RateDecision) {
    headers.insert("X-RateLimit-Limit", HeaderValue::from(limit));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(decision.remaining));
    headers.insert("X-RateLimit-Reset", HeaderValue::from(decision.reset_after_secs));
}

/// Per-client rate limiting
pub async fn rate_limit_middleware(
    State(state): State<SecurityState>,
    request: Request,
    next: Next,
) -> Response {
    let client = client_ip(&request);
    let decision = state.rate_limiter.check(&client);
    let limit = state.config.rate_limit_per_minute;

    if !decision.allowed {
        warn!(
            client = %state.loggable(client),
            path = %request.uri().path(),
            "Rate limit exceeded"
        );
        let mut response = StatusCode::TOO_MANY_REQUESTS.into_response();
        set_rate_headers(response.headers_mut(), limit, decision);
        response.headers_mut().insert(
            header::RETRY_AFTER,
            HeaderValue::from(decision.reset_after_secs),
        );
        return response;
    }

    let mut response = next.run(request).await;
    set_rate_headers(response.headers_mut(), limit, decision);
    response
}

const HARDENING_HEADERS: [(HeaderName, &str); 6] = [
    (header::X_FRAME_OPTIONS, "DENY"),
    (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
    (header::STRICT_TRANSPORT_SECURITY, "max-age=31536000; includeSubDomains"),
    (header::CONTENT_SECURITY_POLICY, "default-src 'none'; frame-ancestors 'none'"),
    (header::REFERRER_POLICY, "no-referrer"),
    // Responses carry per-session totals
    (header::CACHE_CONTROL, "no-store"),
];

/// Response hardening headers
pub async fn security_headers_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    for (name, value) in HARDENING_HEADERS {
        headers.insert(name, HeaderValue::from_static(value));
    }
    headers.remove(header::SERVER);
    response
}

/// Request logging with masked client addresses
pub async fn logging_middleware(
    State(state): State<SecurityState>,
    request: Request,
    next: Next,
) -> Response {
    if !state.config.log_requests {
        return next.run(request).await;
    }

    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let client = state.loggable(client_ip(&request));

    let response = next.run(request).await;
    let status = response.status().as_u16();
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match status {
        500.. => error!(%method, %path, status, elapsed_ms, %client, "Request failed"),
        400..=499 => warn!(%method, %path, status, elapsed_ms, %client, "Request refused"),
        _ => info!(%method, %path, status, elapsed_ms, %client, "Request served"),
    }

    response
}

/// Refuse bodies whose declared length exceeds the limit
pub async fn body_size_middleware(
    State(state): State<SecurityState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let declared = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());

    if let Some(length) = declared.filter(|&len| len > state.config.max_request_size) {
        warn!(length, max = state.config.max_request_size, "Request body too large");
        return Err(StatusCode::PAYLOAD_TOO_LARGE);
    }
    Ok(next.run(request).await)
}

const ROUTED_METHODS: [Method; 6] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::HEAD,
    Method::OPTIONS,
];

/// Reject methods the API never routes
pub async fn method_validation_middleware(
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if ROUTED_METHODS.contains(request.method()) {
        return Ok(next.run(request).await);
    }
    warn!(method = %request.method(), path = %request.uri().path(), "Unsupported method");
    Err(StatusCode::METHOD_NOT_ALLOWED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_limit_is_per_client() {
        let limiter = RateLimiter::new(2);

        assert!(limiter.check("10.0.0.1").allowed);
        let last = limiter.check("10.0.0.1");
        assert!(last.allowed);
        assert_eq!(last.remaining, 0);
        assert!(!limiter.check("10.0.0.1").allowed);

        assert!(limiter.check("10.0.0.2").allowed);
        assert_eq!(limiter.tracked(), 2);
    }

    #[test]
    fn test_expired_window_starts_over() {
        let limiter = RateLimiter::with_window(1, Duration::ZERO);

        assert!(limiter.check("10.0.0.1").allowed);
        assert!(limiter.check("10.0.0.1").allowed);

        limiter.cleanup();
        assert_eq!(limiter.tracked(), 0);
    }

    #[test]
    fn test_sanitize_for_log() {
        assert_eq!(sanitize_for_log("short"), "*****");
        assert_eq!(sanitize_for_log("203.0.113.77"), "203....3.77");
    }

    #[test]
    fn test_protected_prefixes() {
        let config = SecurityMiddlewareConfig::default();

        assert!(config.is_protected("/admin/clerks/tallybot"));
        assert!(config.is_protected("/clerk/tallybot/execute"));
        assert!(!config.is_protected("/health"));
        assert!(!config.is_protected("/ledger/actions"));
    }

    #[test]
    fn test_presented_key_sources() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer op-key"));
        assert_eq!(presented_key(&headers), Some("op-key"));

        headers.insert("x-api-key", HeaderValue::from_static("direct-key"));
        assert_eq!(presented_key(&headers), Some("direct-key"));

        let mut basic = HeaderMap::new();
        basic.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(presented_key(&basic), None);
    }

    #[test]
    fn test_client_ip_sources() {
        let forwarded = axum::http::Request::builder()
            .header("x-forwarded-for", "10.0.0.1, 10.0.0.2")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&forwarded), "10.0.0.1");

        let mut direct = axum::http::Request::builder().body(Body::empty()).unwrap();
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        direct.extensions_mut().insert(ConnectInfo(addr));
        assert_eq!(client_ip(&direct), "127.0.0.1");

        let bare = axum::http::Request::builder().body(Body::empty()).unwrap();
        assert_eq!(client_ip(&bare), "unknown");
    }
}
