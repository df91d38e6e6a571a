//! Router, handlers and the serve loop.
//!
//! # Contracts
//!
//! - [CTR-SV001] Every admission runs on the blocking pool; the async
//!   reactor never waits on the store's writer section.
//! - [CTR-SV002] All rejections render the same `403` view. The reason only
//!   reaches the alert sink.
//! - [CTR-SV003] The client IP comes from `client_ip_header` only when one is
//!   configured and its first entry parses as an IP address; otherwise the
//!   transport peer is used.

use std::fmt::Write as _;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::Router;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::header::{COOKIE, InvalidHeaderName, SET_COOKIE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use chrono::{DateTime, Duration, Utc};
use pagegate_core::{AdmissionRequest, PageGate};
use tokio::net::TcpListener;
use tracing::debug;

use crate::config::CookieConfig;
use crate::error::ServerError;
use crate::render::ContentRenderer;

/// Shared state of all handlers.
#[derive(Debug)]
pub struct AppState {
    gate: PageGate,
    renderer: ContentRenderer,
    cookie: CookieConfig,
    client_ip_header: Option<HeaderName>,
}

impl AppState {
    /// Creates handler state.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidHeaderName`] if `client_ip_header` is not a valid
    /// header name.
    pub fn new(
        gate: PageGate,
        renderer: ContentRenderer,
        cookie: CookieConfig,
        client_ip_header: Option<&str>,
    ) -> Result<Self, InvalidHeaderName> {
        let client_ip_header = client_ip_header
            .map(|name| HeaderName::from_bytes(name.trim().as_bytes()))
            .transpose()?;
        Ok(Self {
            gate,
            renderer,
            cookie,
            client_ip_header,
        })
    }
}

/// Builds the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/page", get(page))
        .with_state(state)
}

/// Serves `state` on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns the I/O error that ended the accept loop.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

async fn index(State(state): State<Arc<AppState>>) -> Result<Html<String>, ServerError> {
    Ok(Html(state.renderer.index().await?))
}

async fn page(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(params): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> Result<Response, ServerError> {
    let remote_ip = client_ip(&headers, state.client_ip_header.as_ref(), peer);
    let mut request = AdmissionRequest::new(remote_ip.to_string());
    if let Some(name) = first_param(params, "name") {
        request = request.with_name(name);
    }
    if let Some(cookie) = read_cookie(&headers, &state.cookie.name) {
        request = request.with_cookie(cookie);
    }

    let gate = state.gate.clone();
    let outcome = tokio::task::spawn_blocking(move || gate.handle(&request))
        .await
        .map_err(|e| ServerError::Internal(format!("admission task failed: {e}")))??;

    match outcome {
        Ok(admission) => {
            let body = state.renderer.page(&admission.content).await?;
            let cookie = set_cookie_header(&state.cookie, &admission.cookie, Utc::now());
            let cookie = HeaderValue::from_str(&cookie)
                .map_err(|e| ServerError::Internal(format!("invalid cookie header: {e}")))?;
            Ok(([(SET_COOKIE, cookie)], Html(body)).into_response())
        },
        Err(rejection) => {
            debug!(reason = %rejection.reason, "rendering forbidden view");
            Ok((StatusCode::FORBIDDEN, Html(state.renderer.forbidden().await)).into_response())
        },
    }
}

/// First value of query parameter `key`; later repeats are ignored.
#[must_use]
pub fn first_param(params: Vec<(String, String)>, key: &str) -> Option<String> {
    params
        .into_iter()
        .find_map(|(name, value)| (name == key).then_some(value))
}

/// Formats the `Set-Cookie` value for an admitted client.
#[must_use]
pub fn set_cookie_header(config: &CookieConfig, value: &str, now: DateTime<Utc>) -> String {
    let mut header = format!("{}={value}; Path=/; HttpOnly; SameSite=Lax", config.name);
    if config.max_age_days > 0 {
        let max_age = i64::from(config.max_age_days) * 86_400;
        let _ = write!(header, "; Max-Age={max_age}");
        if let Some(expires) = now.checked_add_signed(Duration::seconds(max_age)) {
            let _ = write!(
                header,
                "; Expires={}",
                expires.format("%a, %d %b %Y %H:%M:%S GMT")
            );
        }
    }
    if config.secure {
        header.push_str("; Secure");
    }
    header
}

/// Value of cookie `name` across all `Cookie` headers. Empty values count as
/// absent.
#[must_use]
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

/// Resolves the client address for one request.
#[must_use]
pub fn client_ip(headers: &HeaderMap, header: Option<&HeaderName>, peer: SocketAddr) -> IpAddr {
    header
        .and_then(|name| headers.get(name))
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok())
        .unwrap_or_else(|| peer.ip().to_canonical())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn cookie_config(max_age_days: u32, secure: bool) -> CookieConfig {
        CookieConfig {
            name: "super_secret".to_string(),
            max_age_days,
            secure,
        }
    }

    #[test]
    fn test_set_cookie_long_lived() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let header = set_cookie_header(&cookie_config(1, false), "abc", now);
        assert_eq!(
            header,
            "super_secret=abc; Path=/; HttpOnly; SameSite=Lax; Max-Age=86400; \
             Expires=Tue, 02 Jan 2024 00:00:00 GMT"
        );
    }

    #[test]
    fn test_set_cookie_session_and_secure() {
        let header = set_cookie_header(&cookie_config(0, true), "abc", Utc::now());
        assert_eq!(
            header,
            "super_secret=abc; Path=/; HttpOnly; SameSite=Lax; Secure"
        );
    }

    #[test]
    fn test_set_cookie_out_of_range_expiry_keeps_max_age() {
        let now = DateTime::<Utc>::MAX_UTC - Duration::days(1);
        let header = set_cookie_header(&cookie_config(30, false), "abc", now);
        assert_eq!(
            header,
            "super_secret=abc; Path=/; HttpOnly; SameSite=Lax; Max-Age=2592000"
        );
    }

    #[test]
    fn test_first_param_ignores_repeats() {
        let params = vec![
            ("other".to_string(), "x".to_string()),
            ("name".to_string(), "alpha".to_string()),
            ("name".to_string(), "beta".to_string()),
        ];
        assert_eq!(first_param(params, "name").as_deref(), Some("alpha"));
        assert_eq!(first_param(Vec::new(), "name"), None);
        assert_eq!(
            first_param(vec![("name".to_string(), String::new())], "name").as_deref(),
            Some("")
        );
    }

    #[test]
    fn test_read_cookie() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("theme=dark; super_secret=\"xyz\""));
        assert_eq!(read_cookie(&headers, "super_secret").as_deref(), Some("xyz"));
        assert_eq!(read_cookie(&headers, "missing"), None);

        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("theme=dark"));
        headers.append(COOKIE, HeaderValue::from_static("super_secret=abc"));
        assert_eq!(read_cookie(&headers, "super_secret").as_deref(), Some("abc"));

        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("super_secret="));
        assert_eq!(read_cookie(&headers, "super_secret"), None);
    }

    #[test]
    fn test_client_ip_prefers_configured_header() {
        let peer: SocketAddr = "10.0.0.1:40000".parse().unwrap();
        let header = HeaderName::from_static("x-forwarded-for");
        let mut headers = HeaderMap::new();

        assert_eq!(client_ip(&headers, Some(&header), peer), peer.ip());

        headers.insert(&header, HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        assert_eq!(
            client_ip(&headers, Some(&header), peer),
            "203.0.113.7".parse::<IpAddr>().unwrap()
        );
        assert_eq!(client_ip(&headers, None, peer), peer.ip());

        headers.insert(&header, HeaderValue::from_static("garbage"));
        assert_eq!(client_ip(&headers, Some(&header), peer), peer.ip());
    }

    #[test]
    fn test_client_ip_unmaps_ipv4() {
        let peer: SocketAddr = "[::ffff:192.0.2.1]:80".parse().unwrap();
        assert_eq!(
            client_ip(&HeaderMap::new(), None, peer),
            "192.0.2.1".parse::<IpAddr>().unwrap()
        );
    }
}
