//! HTTP route handlers for the relay.
//!
//! Three groups: the entry/redirect pages, the `/proxy` relay endpoint
//! (stateless fetch or stateful render, chosen per request), and the
//! `/api/*` endpoints driving an existing render session.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Form, Json, Query},
    http::{header, HeaderMap, Method, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Router,
};
use base64::Engine;
use tracing::warn;
use uuid::Uuid;

use super::views;
use crate::browser::{ActionOutcome, PageActions};
use crate::relay::{ForwardedRequest, Forwarder, RelayError};
use crate::secrets::OutboundProxy;
use crate::AppState;

/// Cookie carrying the relay client identifier
pub const SESSION_COOKIE: &str = "portavia_sid";

/// Proxy schemes accepted by the outbound proxy endpoint
const ALLOWED_PROXY_SCHEMES: [&str; 4] = ["socks5", "socks5h", "http", "https"];

/// JSON error response helper
fn err_response(status: StatusCode, msg: &str) -> impl IntoResponse {
    (status, Json(serde_json::json!({ "error": msg })))
}

/// Build the API router with the session-action and proxy-config endpoints.
pub fn api_router() -> Router {
    Router::new()
        .route("/screenshot", get(api_screenshot))
        .route("/click", post(api_click))
        .route("/type", post(api_type))
        .route(
            "/proxy",
            get(get_proxy_config).post(save_proxy_config).delete(delete_proxy_config),
        )
}

// ========== Entry & Redirect Handlers ==========

pub async fn index() -> Html<&'static str> {
    Html(views::entry_page())
}

#[derive(serde::Deserialize)]
pub struct BrowseParams {
    #[serde(default)]
    url: String,
}

/// Whether `target` is an absolute http(s) URL the relay can serve
fn is_web_url(target: &str) -> bool {
    match url::Url::parse(target) {
        Ok(url) => url.scheme() == "http" || url.scheme() == "https",
        Err(_) => false,
    }
}

/// Where a submitted URL should send the client, `None` for the entry page
fn browse_target(raw: &str) -> Option<String> {
    let url = raw.trim();
    if url.is_empty() {
        return None;
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        Some(format!("/proxy?url={}", url))
    } else {
        Some(format!("/proxy?url=https://{}", url))
    }
}

pub async fn browse_get(Query(params): Query<BrowseParams>) -> Redirect {
    match browse_target(&params.url) {
        Some(target) => Redirect::to(&target),
        None => Redirect::to("/"),
    }
}

pub async fn browse_post(Form(params): Form<BrowseParams>) -> Redirect {
    match browse_target(&params.url) {
        Some(target) => Redirect::to(&target),
        None => Redirect::to("/"),
    }
}

// ========== Relay Handler ==========

#[derive(serde::Deserialize)]
pub struct ProxyParams {
    #[serde(default)]
    url: String,
    /// Per-request override of the configured mode: `1` renders, `0` fetches
    render: Option<String>,
}

pub async fn proxy(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<ProxyParams>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // Unusable targets go back to the entry form on both relay paths
    let target = params.url.trim().to_string();
    if target.is_empty() || !is_web_url(&target) {
        return Redirect::to("/").into_response();
    }

    let render = match params.render.as_deref() {
        Some("1") | Some("true") => true,
        Some("0") | Some("false") => false,
        _ => state.config.read().await.render_mode,
    };

    if render {
        render_proxy(&state, &headers, &target).await
    } else {
        forward_proxy(&state, method, headers, target, body).await
    }
}

/// Stateless path: one upstream exchange, rewritten HTML or raw passthrough
async fn forward_proxy(
    state: &AppState,
    method: Method,
    headers: HeaderMap,
    target: String,
    body: Bytes,
) -> Response {
    let request = ForwardedRequest {
        method,
        target: target.clone(),
        cookies: client_cookies(&headers),
        headers,
        body: body.to_vec(),
    };

    let reply = {
        let forwarder = state.forwarder.read().await;
        forwarder.forward(request).await
    };

    match reply {
        Ok(reply) => {
            let mut headers_out = reply.headers;
            for cookie in &reply.cookies {
                match cookie.to_header_value().parse() {
                    Ok(value) => {
                        headers_out.append(header::SET_COOKIE, value);
                    }
                    Err(_) => warn!("Dropping upstream cookie with unusable bytes: {}", cookie.name),
                }
            }
            (reply.status, headers_out, reply.body).into_response()
        }
        // An unusable target goes back to the entry form, like an empty one
        Err(RelayError::InvalidTarget) => Redirect::to("/").into_response(),
        Err(e) => {
            let reason = String::from(e);
            (StatusCode::BAD_GATEWAY, Html(views::error_page(&target, &reason))).into_response()
        }
    }
}

/// Stateful path: acquire the client's render session, navigate, wrap the
/// snapshot. The only handler allowed to create sessions.
async fn render_proxy(state: &AppState, headers: &HeaderMap, target: &str) -> Response {
    let (session_id, minted) = match session_id_from(headers) {
        Some(id) => (id, false),
        None => (Uuid::new_v4().simple().to_string(), true),
    };

    state.render_pool.sweep_idle().await;

    let session = match state.render_pool.acquire(&session_id).await {
        Ok(session) => session,
        Err(e) => {
            let reason = String::from(RelayError::RendererUnavailable(e.to_string()));
            return (StatusCode::INTERNAL_SERVER_ERROR, Html(views::error_page(target, &reason)))
                .into_response();
        }
    };

    match PageActions::navigate(&session, target).await {
        Ok(outcome) => {
            let page = Html(views::snapshot_page(&outcome.url, &outcome.snapshot));
            if minted {
                let cookie = format!("{}={}; Path=/; HttpOnly", SESSION_COOKIE, session_id);
                ([(header::SET_COOKIE, cookie)], page).into_response()
            } else {
                page.into_response()
            }
        }
        Err(e) => {
            let reason = String::from(RelayError::RendererActionFailed(e.to_string()));
            (StatusCode::INTERNAL_SERVER_ERROR, Html(views::error_page(target, &reason)))
                .into_response()
        }
    }
}

// ========== Session Action Handlers ==========

#[derive(serde::Deserialize)]
struct ClickRequest {
    #[serde(default)]
    x: f64,
    #[serde(default)]
    y: f64,
}

#[derive(serde::Deserialize)]
struct TypeRequest {
    #[serde(default)]
    text: String,
}

fn action_json(outcome: &ActionOutcome) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "screenshot": base64::engine::general_purpose::STANDARD.encode(&outcome.snapshot),
        "url": outcome.url,
    }))
}

async fn api_click(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ClickRequest>,
) -> Response {
    let session_id = match session_id_from(&headers) {
        Some(id) => id,
        None => return err_response(StatusCode::BAD_REQUEST, "No session").into_response(),
    };
    let session = match state.render_pool.peek(&session_id).await {
        Some(session) => session,
        None => return err_response(StatusCode::BAD_REQUEST, "No browser session").into_response(),
    };

    match PageActions::click(&session, req.x, req.y).await {
        Ok(outcome) => action_json(&outcome).into_response(),
        Err(e) => err_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()).into_response(),
    }
}

async fn api_type(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<TypeRequest>,
) -> Response {
    let session_id = match session_id_from(&headers) {
        Some(id) => id,
        None => return err_response(StatusCode::BAD_REQUEST, "No session").into_response(),
    };
    let session = match state.render_pool.peek(&session_id).await {
        Some(session) => session,
        None => return err_response(StatusCode::BAD_REQUEST, "No browser session").into_response(),
    };

    match PageActions::type_text(&session, &req.text).await {
        Ok(outcome) => action_json(&outcome).into_response(),
        Err(e) => err_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()).into_response(),
    }
}

async fn api_screenshot(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let session_id = match session_id_from(&headers) {
        Some(id) => id,
        None => return err_response(StatusCode::BAD_REQUEST, "No session").into_response(),
    };
    let session = match state.render_pool.peek(&session_id).await {
        Some(session) => session,
        None => return err_response(StatusCode::BAD_REQUEST, "No browser session").into_response(),
    };

    match PageActions::snapshot(&session).await {
        Ok(outcome) => action_json(&outcome).into_response(),
        Err(e) => err_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()).into_response(),
    }
}

// ========== Outbound Proxy Handlers ==========

async fn get_proxy_config(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    match state.secrets.load_outbound_proxy() {
        Some(proxy) => Json(serde_json::json!({
            "configured": true,
            "type": proxy.scheme,
            "host": proxy.host,
            "port": proxy.port,
            "hasCredentials": proxy.username.is_some(),
        })),
        None => Json(serde_json::json!({ "configured": false })),
    }
}

async fn save_proxy_config(
    Extension(state): Extension<Arc<AppState>>,
    Json(proxy): Json<OutboundProxy>,
) -> Response {
    if proxy.host.trim().is_empty() {
        return err_response(StatusCode::BAD_REQUEST, "Host is required").into_response();
    }
    if !ALLOWED_PROXY_SCHEMES.contains(&proxy.scheme.as_str()) {
        return err_response(StatusCode::BAD_REQUEST, "Unsupported proxy type").into_response();
    }

    // The config is only persisted once it produced a working client
    let forwarder = match Forwarder::new(Some(&proxy)) {
        Ok(forwarder) => forwarder,
        Err(e) => {
            let msg = format!("Invalid proxy configuration: {}", e);
            return err_response(StatusCode::BAD_REQUEST, &msg).into_response();
        }
    };

    state.secrets.store_outbound_proxy(&proxy);
    *state.forwarder.write().await = forwarder;

    Json(serde_json::json!({ "success": true, "message": "Proxy configuration saved" }))
        .into_response()
}

async fn delete_proxy_config(Extension(state): Extension<Arc<AppState>>) -> Response {
    state.secrets.clear_outbound_proxy();

    match Forwarder::new(None) {
        Ok(forwarder) => *state.forwarder.write().await = forwarder,
        Err(e) => {
            let msg = format!("Failed to rebuild upstream client: {}", e);
            return err_response(StatusCode::INTERNAL_SERVER_ERROR, &msg).into_response();
        }
    }

    Json(serde_json::json!({ "success": true, "message": "Proxy configuration deleted" }))
        .into_response()
}

// ========== Cookie Helpers ==========

/// Client cookies destined for upstream, with the relay's own session
/// cookie removed
fn client_cookies(headers: &HeaderMap) -> Vec<(String, String)> {
    let mut cookies = Vec::new();
    for value in headers.get_all(header::COOKIE) {
        if let Ok(raw) = value.to_str() {
            for pair in raw.split(';') {
                if let Some((name, value)) = pair.trim().split_once('=') {
                    if name != SESSION_COOKIE {
                        cookies.push((name.to_string(), value.to_string()));
                    }
                }
            }
        }
    }
    cookies
}

/// Relay client identifier from the request cookies
fn session_id_from(headers: &HeaderMap) -> Option<String> {
    for value in headers.get_all(header::COOKIE) {
        if let Ok(raw) = value.to_str() {
            for pair in raw.split(';') {
                if let Some((name, value)) = pair.trim().split_once('=') {
                    if name == SESSION_COOKIE && !value.is_empty() {
                        return Some(value.to_string());
                    }
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_browse_target_defaults_to_https() {
        assert_eq!(
            browse_target("example.com").as_deref(),
            Some("/proxy?url=https://example.com")
        );
    }

    #[test]
    fn test_browse_target_keeps_explicit_scheme() {
        assert_eq!(
            browse_target("http://x.test/a").as_deref(),
            Some("/proxy?url=http://x.test/a")
        );
        assert_eq!(
            browse_target("  https://x.test  ").as_deref(),
            Some("/proxy?url=https://x.test")
        );
    }

    #[test]
    fn test_browse_target_empty_goes_home() {
        assert_eq!(browse_target(""), None);
        assert_eq!(browse_target("   "), None);
    }

    #[test]
    fn test_web_url_check_requires_absolute_http() {
        assert!(is_web_url("https://example.com/"));
        assert!(is_web_url("http://example.com:8080/a?b=c"));
        assert!(!is_web_url("example.com"));
        assert!(!is_web_url("not a url"));
        assert!(!is_web_url("ftp://example.com/file"));
        assert!(!is_web_url("javascript:alert(1)"));
    }

    #[test]
    fn test_client_cookies_skip_the_relay_session() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("a=1; portavia_sid=abc123; b=2"),
        );
        let cookies = client_cookies(&headers);
        assert_eq!(
            cookies,
            vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]
        );
    }

    #[test]
    fn test_session_id_found_among_other_cookies() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("a=1; portavia_sid=abc123; b=2"),
        );
        assert_eq!(session_id_from(&headers).as_deref(), Some("abc123"));

        let empty = HeaderMap::new();
        assert_eq!(session_id_from(&empty), None);
    }
}
