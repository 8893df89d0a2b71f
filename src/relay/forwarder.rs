//! Upstream request forwarder
//!
//! Performs the stateless half of the relay:
//! 1. Client request arrives with the target URL in the query string
//! 2. Headers are filtered, a browser identity is injected, cookies re-attached
//! 3. One upstream exchange runs, following redirects by hand so each hop's
//!    `Set-Cookie` reaches the next hop, with a 30s bound per hop and no retries
//! 4. HTML comes back rewritten onto the relay, everything else passes through

use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::redirect::Policy;
use reqwest::{Method, StatusCode};
use tracing::{debug, info};
use url::Url;

use crate::rewrite;
use crate::secrets::OutboundProxy;
use super::RelayError;

/// How long one hop of the exchange may take, connect to last body byte.
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Redirect hops followed before giving up.
const MAX_REDIRECTS: usize = 10;

/// Request headers never forwarded upstream.
const DROPPED_REQUEST_HEADERS: &[&str] = &["host", "connection", "content-length", "content-encoding"];

/// Response headers never relayed back to the client.
const DROPPED_RESPONSE_HEADERS: &[&str] =
    &["content-encoding", "content-length", "transfer-encoding", "connection"];

/// A client request captured for forwarding.
pub struct ForwardedRequest {
    /// HTTP method to replay upstream
    pub method: Method,
    /// Absolute URL of the upstream target
    pub target: String,
    /// Client headers, unfiltered
    pub headers: HeaderMap,
    /// Client cookies as name/value pairs, relay-internal ones already removed
    pub cookies: Vec<(String, String)>,
    /// Raw request body
    pub body: Vec<u8>,
}

/// What came back from upstream, filtered and rewritten.
pub struct UpstreamReply {
    /// Upstream status, relayed as-is
    pub status: StatusCode,
    /// Response headers with transport framing removed
    pub headers: HeaderMap,
    /// Upstream cookies translated for the relay origin
    pub cookies: Vec<RelayCookie>,
    /// Response body, rewritten when it was HTML
    pub body: Vec<u8>,
    /// URL the exchange ended on after redirects
    pub final_url: String,
}

/// A cookie translated from an upstream `Set-Cookie` header.
///
/// The upstream `Domain` attribute is dropped so the browser scopes the
/// cookie to the relay origin, and `Secure` is never carried over so the
/// cookie still flows on plain-HTTP deployments.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayCookie {
    pub name: String,
    pub value: String,
    pub path: String,
    pub max_age: Option<String>,
    pub expires: Option<String>,
    pub http_only: bool,
}

impl RelayCookie {
    /// Parse one `Set-Cookie` header value. Returns None when there is no
    /// usable name=value pair at the front.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split(';');
        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let mut cookie = RelayCookie {
            name: name.to_string(),
            value: value.trim().to_string(),
            path: "/".to_string(),
            max_age: None,
            expires: None,
            http_only: false,
        };

        for attr in parts {
            let attr = attr.trim();
            if let Some((key, val)) = attr.split_once('=') {
                let val = val.trim();
                match key.trim().to_ascii_lowercase().as_str() {
                    "path" if !val.is_empty() => cookie.path = val.to_string(),
                    "expires" => cookie.expires = Some(val.to_string()),
                    "max-age" => cookie.max_age = Some(val.to_string()),
                    _ => {}
                }
            } else if attr.eq_ignore_ascii_case("httponly") {
                cookie.http_only = true;
            }
        }

        Some(cookie)
    }

    /// Serialize back into a `Set-Cookie` header value for the relay origin.
    pub fn to_header_value(&self) -> String {
        let mut out = format!("{}={}; Path={}", self.name, self.value, self.path);
        if let Some(ref max_age) = self.max_age {
            out.push_str("; Max-Age=");
            out.push_str(max_age);
        }
        if let Some(ref expires) = self.expires {
            out.push_str("; Expires=");
            out.push_str(expires);
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        out
    }
}

/// Copy client headers for the upstream leg.
///
/// Hop-by-hop and framing headers are dropped, `Cookie` is dropped because
/// the filtered cookie list is re-attached separately, and `Accept-Encoding`
/// is dropped so the client only negotiates encodings this process can
/// decode. A browser `User-Agent` is injected when the client sent none.
pub fn filter_request_headers(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::new();
    for (name, value) in headers {
        if DROPPED_REQUEST_HEADERS.contains(&name.as_str()) {
            continue;
        }
        if *name == header::COOKIE || *name == header::ACCEPT_ENCODING {
            continue;
        }
        filtered.append(name.clone(), value.clone());
    }
    if !filtered.contains_key(header::USER_AGENT) {
        filtered.insert(header::USER_AGENT, HeaderValue::from_static(crate::USER_AGENT));
    }
    filtered
}

/// Copy upstream headers for the client leg, minus transport framing and
/// `Set-Cookie` (re-emitted through [`RelayCookie`] translation).
pub fn filter_response_headers(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::new();
    for (name, value) in headers {
        if DROPPED_RESPONSE_HEADERS.contains(&name.as_str()) {
            continue;
        }
        if *name == header::SET_COOKIE {
            continue;
        }
        filtered.append(name.clone(), value.clone());
    }
    filtered
}

/// Join name/value pairs into a `Cookie` header value.
pub fn build_cookie_header(cookies: &[(String, String)]) -> String {
    cookies
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Stateless upstream client.
///
/// Holds one reqwest client for connection reuse; rebuilt whenever the
/// outbound proxy configuration changes.
pub struct Forwarder {
    client: reqwest::Client,
}

impl Forwarder {
    /// Build the upstream client, optionally routed through an outbound proxy.
    ///
    /// Certificate validation is disabled on purpose: the relay fronts
    /// arbitrary third-party sites and a broken certificate chain upstream
    /// should degrade to the page loading, not to an error view.
    pub fn new(proxy: Option<&OutboundProxy>) -> anyhow::Result<Self> {
        // Redirects are handled in `forward` so hop cookies can be carried.
        let mut builder = reqwest::Client::builder()
            .redirect(Policy::none())
            .danger_accept_invalid_certs(true)
            .timeout(UPSTREAM_TIMEOUT);

        if let Some(proxy) = proxy {
            let proxy_url = proxy.to_url();
            info!(
                "Forwarder routing through proxy: {}",
                proxy_url.split('@').last().unwrap_or("configured")
            );
            builder = builder.proxy(reqwest::Proxy::all(&proxy_url)?);
        }

        Ok(Self { client: builder.build()? })
    }

    /// Run one upstream exchange on the client's behalf.
    ///
    /// Redirects are followed here rather than inside the client so that a
    /// `Set-Cookie` from one hop is presented on the next, the way a fresh
    /// browser profile would. The jar lives for this exchange only, and every
    /// cookie the chain set is translated back for the client.
    pub async fn forward(&self, req: ForwardedRequest) -> Result<UpstreamReply, RelayError> {
        let mut url = Url::parse(&req.target).map_err(|_| RelayError::InvalidTarget)?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(RelayError::InvalidTarget);
        }

        debug!("Forwarding {} {}", req.method, req.target);

        let base_headers = filter_request_headers(&req.headers);
        let mut jar = req.cookies;
        let mut cookies: Vec<RelayCookie> = Vec::new();
        let mut method = req.method;
        let mut body = req.body;
        let mut hops = 0;

        let response = loop {
            let mut request = self
                .client
                .request(method.clone(), url.clone())
                .headers(base_headers.clone());

            if !jar.is_empty() {
                if let Ok(value) = HeaderValue::from_str(&build_cookie_header(&jar)) {
                    request = request.header(header::COOKIE, value);
                }
            }
            if !body.is_empty() {
                request = request.body(body.clone());
            }

            let response = request.send().await.map_err(|e| RelayError::UpstreamUnreachable {
                url: req.target.clone(),
                reason: e.to_string(),
            })?;

            for cookie in response
                .headers()
                .get_all(header::SET_COOKIE)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .filter_map(RelayCookie::parse)
            {
                jar.retain(|(name, _)| name != &cookie.name);
                jar.push((cookie.name.clone(), cookie.value.clone()));
                cookies.retain(|c| c.name != cookie.name);
                cookies.push(cookie);
            }

            if !response.status().is_redirection() {
                break response;
            }
            let location = response
                .headers()
                .get(header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let location = match location {
                Some(location) => location,
                None => break response,
            };
            hops += 1;
            if hops > MAX_REDIRECTS {
                return Err(RelayError::UpstreamUnreachable {
                    url: req.target.clone(),
                    reason: format!("exceeded {} redirects", MAX_REDIRECTS),
                });
            }
            url = url.join(&location).map_err(|e| RelayError::UpstreamUnreachable {
                url: req.target.clone(),
                reason: format!("bad redirect location {:?}: {}", location, e),
            })?;
            // Everything except 307/308 continues as a bodyless GET
            if response.status() != StatusCode::TEMPORARY_REDIRECT
                && response.status() != StatusCode::PERMANENT_REDIRECT
            {
                method = Method::GET;
                body = Vec::new();
            }
            debug!("Redirect hop {} -> {}", hops, url);
        };

        let status = response.status();
        let final_url = response.url().to_string();
        let mut headers = filter_response_headers(response.headers());

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let body = if content_type.contains("text/html") {
            let text = response.text().await.map_err(|e| RelayError::UpstreamUnreachable {
                url: req.target.clone(),
                reason: e.to_string(),
            })?;
            let rewritten = rewrite::rewrite_html(&text, &final_url);
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/html; charset=utf-8"),
            );
            rewrite::inject_banner(&rewritten, &final_url).into_bytes()
        } else {
            let bytes = response.bytes().await.map_err(|e| RelayError::UpstreamUnreachable {
                url: req.target.clone(),
                reason: e.to_string(),
            })?;
            // Static assets are safe to cache; the relay serves them decoded.
            headers.insert(
                header::CACHE_CONTROL,
                HeaderValue::from_static("public, max-age=3600"),
            );
            bytes.to_vec()
        };

        debug!("Upstream {} -> {} ({} bytes)", req.target, status, body.len());

        Ok(UpstreamReply { status, headers, cookies, body, final_url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::routing::{get, post};
    use axum::Router;

    /// Serve a stub upstream on an ephemeral loopback port.
    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn get_request(target: String) -> ForwardedRequest {
        ForwardedRequest {
            method: Method::GET,
            target,
            headers: HeaderMap::new(),
            cookies: Vec::new(),
            body: Vec::new(),
        }
    }

    #[test]
    fn test_request_filter_drops_transport_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("relay.example.com"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("42"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/html"));
        headers.insert("x-custom", HeaderValue::from_static("1"));

        let filtered = filter_request_headers(&headers);
        assert!(filtered.get(header::HOST).is_none());
        assert!(filtered.get(header::CONNECTION).is_none());
        assert!(filtered.get(header::CONTENT_LENGTH).is_none());
        assert_eq!(filtered.get(header::ACCEPT).unwrap(), "text/html");
        assert_eq!(filtered.get("x-custom").unwrap(), "1");
    }

    #[test]
    fn test_request_filter_injects_user_agent() {
        let filtered = filter_request_headers(&HeaderMap::new());
        assert_eq!(filtered.get(header::USER_AGENT).unwrap(), crate::USER_AGENT);
    }

    #[test]
    fn test_request_filter_keeps_client_user_agent() {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_static("curl/8.0"));
        let filtered = filter_request_headers(&headers);
        assert_eq!(filtered.get(header::USER_AGENT).unwrap(), "curl/8.0");
    }

    #[test]
    fn test_response_filter_drops_framing() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("10"));
        headers.insert(header::SET_COOKIE, HeaderValue::from_static("a=b"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/css"));
        headers.insert("x-frame-options", HeaderValue::from_static("DENY"));

        let filtered = filter_response_headers(&headers);
        assert!(filtered.get(header::CONTENT_ENCODING).is_none());
        assert!(filtered.get(header::TRANSFER_ENCODING).is_none());
        assert!(filtered.get(header::CONNECTION).is_none());
        assert!(filtered.get(header::CONTENT_LENGTH).is_none());
        assert!(filtered.get(header::SET_COOKIE).is_none());
        assert_eq!(filtered.get(header::CONTENT_TYPE).unwrap(), "text/css");
        assert_eq!(filtered.get("x-frame-options").unwrap(), "DENY");
    }

    #[test]
    fn test_cookie_header_joins_pairs() {
        let cookies = vec![
            ("sid".to_string(), "abc".to_string()),
            ("theme".to_string(), "dark".to_string()),
        ];
        assert_eq!(build_cookie_header(&cookies), "sid=abc; theme=dark");
    }

    #[test]
    fn test_set_cookie_strips_domain_and_secure() {
        let cookie = RelayCookie::parse(
            "sid=abc123; Domain=.example.com; Path=/app; Secure; HttpOnly; \
             Expires=Wed, 21 Oct 2026 07:28:00 GMT",
        )
        .unwrap();

        assert_eq!(cookie.name, "sid");
        assert_eq!(cookie.value, "abc123");
        assert_eq!(cookie.path, "/app");
        assert!(cookie.http_only);
        assert_eq!(cookie.expires.as_deref(), Some("Wed, 21 Oct 2026 07:28:00 GMT"));

        let header = cookie.to_header_value();
        assert!(!header.contains("Domain"));
        assert!(!header.contains("Secure"));
        assert!(header.contains("Path=/app"));
        assert!(header.ends_with("HttpOnly"));
    }

    #[test]
    fn test_set_cookie_defaults() {
        let cookie = RelayCookie::parse("token=xyz").unwrap();
        assert_eq!(cookie.path, "/");
        assert!(!cookie.http_only);
        assert!(cookie.expires.is_none());
        assert!(cookie.max_age.is_none());
        assert_eq!(cookie.to_header_value(), "token=xyz; Path=/");
    }

    #[test]
    fn test_set_cookie_without_pair_is_rejected() {
        assert!(RelayCookie::parse("garbage").is_none());
        assert!(RelayCookie::parse("=nameless").is_none());
    }

    #[tokio::test]
    async fn test_forward_passes_non_html_through_with_caching() {
        let app = Router::new().route(
            "/logo.png",
            get(|| async { ([(header::CONTENT_TYPE, "image/png")], vec![137u8, 80, 78, 71]) }),
        );
        let base = serve(app).await;

        let forwarder = Forwarder::new(None).unwrap();
        let reply = forwarder.forward(get_request(format!("{}/logo.png", base))).await.unwrap();

        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body, vec![137u8, 80, 78, 71]);
        assert_eq!(reply.headers.get(header::CONTENT_TYPE).unwrap(), "image/png");
        assert_eq!(reply.headers.get(header::CACHE_CONTROL).unwrap(), "public, max-age=3600");
        assert!(reply.cookies.is_empty());
    }

    #[tokio::test]
    async fn test_forward_rewrites_html_against_the_redirected_url() {
        let app = Router::new()
            .route(
                "/start",
                get(|| async {
                    (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, "/pages/home")], "")
                }),
            )
            .route(
                "/pages/home",
                get(|| async {
                    (
                        [(header::CONTENT_TYPE, "text/html")],
                        r#"<html><body><a href="next.html">next</a></body></html>"#,
                    )
                }),
            );
        let base = serve(app).await;

        let forwarder = Forwarder::new(None).unwrap();
        let reply = forwarder.forward(get_request(format!("{}/start", base))).await.unwrap();

        assert_eq!(reply.final_url, format!("{}/pages/home", base));
        assert_eq!(reply.headers.get(header::CONTENT_TYPE).unwrap(), "text/html; charset=utf-8");
        let html = String::from_utf8(reply.body).unwrap();
        // Relative links resolve against where the chain landed, not where it started
        assert!(html.contains(&format!(r#"href="/proxy?url={}/pages/next.html""#, base)));
    }

    #[tokio::test]
    async fn test_forward_carries_hop_cookies_across_redirects() {
        let app = Router::new()
            .route(
                "/a",
                get(|| async {
                    (
                        StatusCode::FOUND,
                        [(header::SET_COOKIE, "hop=1"), (header::LOCATION, "/b")],
                        "",
                    )
                }),
            )
            .route(
                "/b",
                get(|headers: HeaderMap| async move {
                    headers
                        .get(header::COOKIE)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("absent")
                        .to_string()
                }),
            );
        let base = serve(app).await;

        let forwarder = Forwarder::new(None).unwrap();
        let mut request = get_request(format!("{}/a", base));
        request.cookies = vec![("sid".to_string(), "abc".to_string())];
        let reply = forwarder.forward(request).await.unwrap();

        let echoed = String::from_utf8(reply.body).unwrap();
        assert!(echoed.contains("sid=abc"));
        assert!(echoed.contains("hop=1"));
        // The hop cookie also reaches the client, rescoped to the relay
        assert!(reply.cookies.iter().any(|c| c.name == "hop" && c.value == "1"));
    }

    #[tokio::test]
    async fn test_forward_downgrades_post_to_get_after_found() {
        let app = Router::new()
            .route(
                "/login",
                post(|| async {
                    (
                        StatusCode::FOUND,
                        [(header::SET_COOKIE, "session=ok"), (header::LOCATION, "/account")],
                        "",
                    )
                }),
            )
            .route(
                "/account",
                get(|headers: HeaderMap| async move {
                    format!(
                        "cookie={}",
                        headers
                            .get(header::COOKIE)
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("absent")
                    )
                }),
            );
        let base = serve(app).await;

        let forwarder = Forwarder::new(None).unwrap();
        let request = ForwardedRequest {
            method: Method::POST,
            target: format!("{}/login", base),
            headers: HeaderMap::new(),
            cookies: Vec::new(),
            body: b"user=a&pass=b".to_vec(),
        };
        let reply = forwarder.forward(request).await.unwrap();

        // /account only answers GET, so the downgrade is what makes this 200
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.final_url, format!("{}/account", base));
        assert_eq!(String::from_utf8(reply.body).unwrap(), "cookie=session=ok");
        assert!(reply.cookies.iter().any(|c| c.name == "session" && c.value == "ok"));
    }
}
