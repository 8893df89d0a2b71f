//! URL resolution helpers for the rewriter.

use url::{Position, Url};

/// Resolve a reference found in a document against the document's URL.
///
/// Follows what a browser would do with the same markup:
/// - `//host/path` is scheme-relative and gets `https:` prefixed
/// - `/path` keeps the base URL's scheme and authority
/// - anything else without an `http(s)://` prefix resolves relative to the base
/// - absolute URLs pass through untouched
///
/// A base that fails to parse degrades to returning the reference as-is.
pub fn absolutize(reference: &str, base: &str) -> String {
    if reference.starts_with("//") {
        return format!("https:{}", reference);
    }

    if reference.starts_with('/') {
        if let Ok(base_url) = Url::parse(base) {
            return format!("{}{}", &base_url[..Position::BeforePath], reference);
        }
        return reference.to_string();
    }

    if !reference.starts_with("http://") && !reference.starts_with("https://") {
        if let Ok(base_url) = Url::parse(base) {
            if let Ok(joined) = base_url.join(reference) {
                return joined.to_string();
            }
        }
        return reference.to_string();
    }

    reference.to_string()
}

/// Map a URL onto the relay's /proxy endpoint.
///
/// Only absolute and scheme-relative web URLs are wrapped. Everything else
/// (`mailto:`, `javascript:`, `data:`, fragments, paths the rewriter already
/// produced) passes through unchanged, which is what keeps the mapping
/// idempotent.
pub fn relay_path(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") || url.starts_with("//") {
        return format!("/proxy?url={}", url);
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_relative_gets_https() {
        assert_eq!(
            absolutize("//cdn.example.com/a.css", "https://example.com/home"),
            "https://cdn.example.com/a.css"
        );
    }

    #[test]
    fn test_root_relative_keeps_authority() {
        assert_eq!(
            absolutize("/login", "https://example.com/home"),
            "https://example.com/login"
        );
        assert_eq!(
            absolutize("/b", "http://example.com:8080/a"),
            "http://example.com:8080/b"
        );
    }

    #[test]
    fn test_relative_joins_against_base() {
        assert_eq!(
            absolutize("c.html", "https://example.com/a/b.html"),
            "https://example.com/a/c.html"
        );
        assert_eq!(
            absolutize("../up.html", "https://example.com/a/b/c.html"),
            "https://example.com/a/up.html"
        );
    }

    #[test]
    fn test_fragment_appends_to_base() {
        assert_eq!(
            absolutize("#top", "https://example.com/page"),
            "https://example.com/page#top"
        );
    }

    #[test]
    fn test_absolute_passes_through() {
        assert_eq!(
            absolutize("https://other.example.com/x", "https://example.com/"),
            "https://other.example.com/x"
        );
        assert_eq!(
            absolutize("http://plain.example.com/", "https://example.com/"),
            "http://plain.example.com/"
        );
    }

    #[test]
    fn test_non_web_schemes_pass_through() {
        assert_eq!(
            absolutize("mailto:hi@example.com", "https://example.com/"),
            "mailto:hi@example.com"
        );
        assert_eq!(
            absolutize("javascript:void(0)", "https://example.com/"),
            "javascript:void(0)"
        );
    }

    #[test]
    fn test_unparseable_base_degrades() {
        assert_eq!(absolutize("/x", "not a url"), "/x");
        assert_eq!(absolutize("rel", "not a url"), "rel");
    }

    #[test]
    fn test_relay_path_wraps_web_urls() {
        assert_eq!(
            relay_path("https://example.com/login"),
            "/proxy?url=https://example.com/login"
        );
        assert_eq!(
            relay_path("http://example.com/"),
            "/proxy?url=http://example.com/"
        );
        assert_eq!(
            relay_path("//cdn.example.com/a.js"),
            "/proxy?url=//cdn.example.com/a.js"
        );
    }

    #[test]
    fn test_relay_path_leaves_everything_else() {
        assert_eq!(relay_path("mailto:hi@example.com"), "mailto:hi@example.com");
        assert_eq!(relay_path("javascript:void(0)"), "javascript:void(0)");
        assert_eq!(relay_path("#section"), "#section");
        assert_eq!(relay_path("img/logo.png"), "img/logo.png");
    }

    #[test]
    fn test_relay_path_is_idempotent() {
        let once = relay_path("https://example.com/a");
        assert_eq!(relay_path(&once), once);
    }
}
