//! Regex-pass HTML rewriter.
//!
//! The rewriter deliberately works on the raw markup text instead of a parsed
//! DOM: upstream pages are frequently malformed and a tolerant textual pass
//! keeps them rendering. Each pass finds one kind of URL reference, resolves
//! it against the document URL and points it back at the relay.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::resolve::{absolutize, relay_path};

static HREF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"href=["']([^"']+)["']"#).unwrap());
static SRC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"src=["']([^"']+)["']"#).unwrap());
static ACTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"action=["']([^"']+)["']"#).unwrap());
static CSS_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"url\(["']?([^"')\s]+)["']?\)"#).unwrap());
static LOCATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(window\.location|location\.href)\s*=\s*["']([^"']+)["']"#).unwrap()
});

/// Rewrite every URL reference in `html` to go through the relay.
///
/// Five independent passes: `href` attributes, `src` attributes, form
/// `action` attributes, CSS `url(...)` values and inline JS location
/// assignments. `base` is the absolute URL the document was served from.
pub fn rewrite_html(html: &str, base: &str) -> String {
    let html = HREF_RE.replace_all(html, |caps: &Captures| {
        format!(r#"href="{}""#, relay_path(&absolutize(&caps[1], base)))
    });
    let html = SRC_RE.replace_all(&html, |caps: &Captures| {
        format!(r#"src="{}""#, relay_path(&absolutize(&caps[1], base)))
    });
    let html = ACTION_RE.replace_all(&html, |caps: &Captures| {
        format!(r#"action="{}""#, relay_path(&absolutize(&caps[1], base)))
    });
    let html = CSS_URL_RE.replace_all(&html, |caps: &Captures| {
        format!("url({})", relay_path(&absolutize(&caps[1], base)))
    });
    let html = LOCATION_RE.replace_all(&html, |caps: &Captures| {
        format!(r#"{}="{}""#, &caps[1], relay_path(&absolutize(&caps[2], base)))
    });
    html.into_owned()
}

/// Insert the relay status banner before the document's first `<body` tag.
///
/// Documents without a `<body` tag (fragments, XML served as HTML) are
/// returned unchanged.
pub fn inject_banner(html: &str, upstream_url: &str) -> String {
    match html.find("<body") {
        Some(idx) => {
            let banner = banner_html(upstream_url);
            let mut out = String::with_capacity(html.len() + banner.len());
            out.push_str(&html[..idx]);
            out.push_str(&banner);
            out.push_str(&html[idx..]);
            out
        }
        None => html.to_string(),
    }
}

fn banner_html(upstream_url: &str) -> String {
    format!(
        concat!(
            r#"<div style="position: fixed; top: 0; left: 0; right: 0; background: #1d3557; color: white; "#,
            r#"padding: 10px 20px; z-index: 99999; font-family: Arial, sans-serif; font-size: 14px;">"#,
            r#"<div style="display: flex; align-items: center; justify-content: space-between; max-width: 1200px; margin: 0 auto;">"#,
            r#"<div><span style="font-weight: bold;">Relay active</span>"#,
            r#"<span style="opacity: 0.85; margin-left: 10px;">Viewing: {url}</span></div>"#,
            r#"<a href="/" style="background: white; color: #1d3557; padding: 4px 14px; border-radius: 4px; text-decoration: none;">New URL</a>"#,
            r#"</div></div><div style="height: 50px;"></div>"#,
        ),
        url = escape_html(upstream_url)
    )
}

/// Minimal HTML entity escaping for text we interpolate into our own pages.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://example.com/home";

    #[test]
    fn test_rewrites_root_relative_href() {
        let html = r#"<a href="/login">Sign in</a>"#;
        assert_eq!(
            rewrite_html(html, BASE),
            r#"<a href="/proxy?url=https://example.com/login">Sign in</a>"#
        );
    }

    #[test]
    fn test_rewrites_scheme_relative_css_url() {
        let html = "<style>body { background: url(//cdn.example.com/a.css); }</style>";
        assert_eq!(
            rewrite_html(html, BASE),
            "<style>body { background: url(/proxy?url=https://cdn.example.com/a.css); }</style>"
        );
    }

    #[test]
    fn test_rewrites_src_and_action() {
        let html = r#"<img src="logo.png"><form action="/submit">"#;
        let out = rewrite_html(html, "https://example.com/a/page.html");
        assert!(out.contains(r#"src="/proxy?url=https://example.com/a/logo.png""#));
        assert!(out.contains(r#"action="/proxy?url=https://example.com/submit""#));
    }

    #[test]
    fn test_rewrites_location_assignments() {
        let html = r#"<script>window.location="/next"; location.href = '/after';</script>"#;
        let out = rewrite_html(html, BASE);
        assert!(out.contains(r#"window.location="/proxy?url=https://example.com/next""#));
        assert!(out.contains(r#"location.href="/proxy?url=https://example.com/after""#));
    }

    #[test]
    fn test_single_quotes_normalized_to_double() {
        let html = "<a href='/x'>x</a>";
        assert_eq!(
            rewrite_html(html, BASE),
            r#"<a href="/proxy?url=https://example.com/x">x</a>"#
        );
    }

    #[test]
    fn test_non_web_references_survive_untouched() {
        let html = r#"<a href="mailto:hi@example.com">mail</a><a href="javascript:void(0)">js</a>"#;
        let out = rewrite_html(html, BASE);
        assert!(out.contains(r#"href="mailto:hi@example.com""#));
        assert!(out.contains(r#"href="javascript:void(0)""#));
    }

    #[test]
    fn test_data_uri_src_survives() {
        let html = r#"<img src="data:image/png;base64,AAAA">"#;
        assert_eq!(rewrite_html(html, BASE), html);
    }

    #[test]
    fn test_banner_lands_before_body() {
        let html = "<html><head></head><body class=\"x\">hi</body></html>";
        let out = inject_banner(html, "https://example.com/");
        let banner_at = out.find("Relay active").unwrap();
        let body_at = out.find("<body").unwrap();
        assert!(banner_at < body_at);
        assert!(out.contains("Viewing: https://example.com/"));
    }

    #[test]
    fn test_no_body_means_no_banner() {
        let html = "<div>fragment only</div>";
        assert_eq!(inject_banner(html, "https://example.com/"), html);
    }

    #[test]
    fn test_banner_escapes_upstream_url() {
        let out = inject_banner(
            "<body></body>",
            r#"https://example.com/?q="><script>alert(1)</script>"#,
        );
        assert!(!out.contains("<script>alert(1)</script>"));
        assert!(out.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_escape_html_covers_metacharacters() {
        assert_eq!(escape_html(r#"<a href="x">&'"#), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }
}
