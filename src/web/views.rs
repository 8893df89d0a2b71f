//! Server-rendered views
//!
//! All markup is inline, no template engine. Dynamic values pass through
//! `escape_html` before interpolation.

use base64::Engine;

use crate::rewrite::escape_html;

/// Landing page with the URL entry form
pub fn entry_page() -> &'static str {
    concat!(
        "<!DOCTYPE html>\n<html>\n<head>\n",
        r#"<meta charset="UTF-8">"#,
        "\n",
        r#"<meta name="viewport" content="width=device-width, initial-scale=1.0">"#,
        "\n<title>portavia</title>\n</head>\n",
        r#"<body style="margin: 0; font-family: Arial, sans-serif; background: #f5f6fa;">"#,
        "\n",
        r#"<div style="max-width: 560px; margin: 120px auto; background: white; padding: 40px; border-radius: 8px; box-shadow: 0 2px 10px rgba(0,0,0,0.1);">"#,
        "\n",
        r#"<h1 style="margin-top: 0; color: #1d3557;">portavia</h1>"#,
        "\n",
        r#"<p style="color: #555;">Browse any site through this relay. Enter a URL to begin.</p>"#,
        "\n",
        r#"<form method="post" action="/browse" style="display: flex; gap: 10px;">"#,
        "\n",
        r#"<input type="text" name="url" placeholder="example.com" autofocus style="flex: 1; padding: 10px; border: 1px solid #ccc; border-radius: 4px; font-size: 15px;">"#,
        "\n",
        r#"<button type="submit" style="background: #1d3557; color: white; border: none; padding: 10px 24px; border-radius: 4px; font-size: 15px; cursor: pointer;">Go</button>"#,
        "\n</form>\n</div>\n</body>\n</html>\n",
    )
}

/// Error view: what failed and for which target, with a way back
pub fn error_page(target_url: &str, reason: &str) -> String {
    format!(
        concat!(
            "<!DOCTYPE html>\n<html>\n<head>\n",
            r#"<meta charset="UTF-8">"#,
            "\n<title>Relay error</title>\n</head>\n",
            r#"<body style="margin: 0; font-family: Arial, sans-serif; background: #f5f6fa;">"#,
            "\n",
            r#"<div style="max-width: 560px; margin: 120px auto; background: white; padding: 40px; border-radius: 8px; box-shadow: 0 2px 10px rgba(0,0,0,0.1);">"#,
            "\n",
            r#"<h1 style="margin-top: 0; color: #c0392b;">Relay error</h1>"#,
            "\n",
            r#"<p style="color: #333;">{reason}</p>"#,
            "\n",
            r#"<p style="color: #777; font-size: 14px; word-break: break-all;">Target: {url}</p>"#,
            "\n",
            r#"<a href="/" style="background: #1d3557; color: white; padding: 8px 20px; border-radius: 4px; text-decoration: none;">Back to start</a>"#,
            "\n</div>\n</body>\n</html>\n",
        ),
        reason = escape_html(reason),
        url = escape_html(target_url),
    )
}

/// Client-side wiring for the snapshot page: click coordinates scaled from
/// the displayed image to the real viewport, typed text, manual refresh.
const SNAPSHOT_JS: &str = r#"
const shot = document.getElementById('shot');
const viewing = document.getElementById('viewing');

function apply(data) {
    if (data.error) { alert(data.error); return; }
    shot.src = 'data:image/png;base64,' + data.screenshot;
    if (data.url) { viewing.textContent = 'Viewing: ' + data.url; }
}

function post(path, payload) {
    fetch(path, {
        method: 'POST',
        headers: { 'Content-Type': 'application/json' },
        body: JSON.stringify(payload)
    }).then(function (r) { return r.json(); }).then(apply)
      .catch(function (e) { alert('Relay request failed: ' + e); });
}

shot.addEventListener('click', function (ev) {
    const rect = shot.getBoundingClientRect();
    const x = (ev.clientX - rect.left) * (shot.naturalWidth / rect.width);
    const y = (ev.clientY - rect.top) * (shot.naturalHeight / rect.height);
    post('/api/click', { x: x, y: y });
});

document.getElementById('type-form').addEventListener('submit', function (ev) {
    ev.preventDefault();
    const input = document.getElementById('type-text');
    post('/api/type', { text: input.value });
    input.value = '';
});

document.getElementById('refresh').addEventListener('click', function () {
    fetch('/api/screenshot').then(function (r) { return r.json(); }).then(apply)
        .catch(function (e) { alert('Relay request failed: ' + e); });
});
"#;

/// Wrapper around a rendered-page snapshot: status banner, interaction
/// controls and the screenshot itself as an inline PNG.
pub fn snapshot_page(upstream_url: &str, snapshot_png: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(snapshot_png);
    format!(
        concat!(
            "<!DOCTYPE html>\n<html>\n<head>\n",
            r#"<meta charset="UTF-8">"#,
            "\n",
            r#"<meta name="viewport" content="width=device-width, initial-scale=1.0">"#,
            "\n<title>Rendering {url}</title>\n</head>\n",
            r#"<body style="margin: 0; font-family: Arial, sans-serif; background: #f5f6fa;">"#,
            "\n",
            r#"<div style="position: fixed; top: 0; left: 0; right: 0; background: #1d3557; color: white; padding: 10px 20px; z-index: 99999; font-size: 14px;">"#,
            "\n",
            r#"<div style="display: flex; align-items: center; justify-content: space-between; max-width: 1200px; margin: 0 auto;">"#,
            "\n",
            r#"<div><span style="font-weight: bold;">Render active</span>"#,
            "\n",
            r#"<span id="viewing" style="opacity: 0.85; margin-left: 10px;">Viewing: {url}</span></div>"#,
            "\n",
            r#"<a href="/" style="background: white; color: #1d3557; padding: 4px 14px; border-radius: 4px; text-decoration: none;">New URL</a>"#,
            "\n</div>\n</div>\n",
            r#"<div style="margin: 50px auto 0; padding: 20px; max-width: 1200px;">"#,
            "\n",
            r#"<div style="background: #e8f0fe; padding: 10px; margin-bottom: 10px; border-left: 4px solid #1d3557; border-radius: 4px;">"#,
            "Rendered with full script support. Click the page to interact, ",
            "or send text to the focused element below.</div>\n",
            r#"<form id="type-form" style="display: flex; gap: 10px; margin-bottom: 10px;">"#,
            "\n",
            r#"<input id="type-text" type="text" placeholder="Text for the focused element" style="flex: 1; padding: 8px; border: 1px solid #ccc; border-radius: 4px;">"#,
            "\n",
            r#"<button type="submit" style="background: #1d3557; color: white; border: none; padding: 8px 18px; border-radius: 4px; cursor: pointer;">Type</button>"#,
            "\n",
            r#"<button type="button" id="refresh" style="background: white; color: #1d3557; border: 1px solid #1d3557; padding: 8px 18px; border-radius: 4px; cursor: pointer;">Refresh</button>"#,
            "\n</form>\n",
            r#"<img id="shot" src="data:image/png;base64,{encoded}" alt="Rendered page" style="max-width: 100%; border: 1px solid #ddd; border-radius: 4px; cursor: pointer;">"#,
            "\n</div>\n<script>{js}</script>\n</body>\n</html>\n",
        ),
        url = escape_html(upstream_url),
        encoded = encoded,
        js = SNAPSHOT_JS,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_page_posts_to_browse() {
        let page = entry_page();
        assert!(page.contains(r#"action="/browse""#));
        assert!(page.contains(r#"name="url""#));
    }

    #[test]
    fn test_error_page_escapes_inputs() {
        let page = error_page("https://x.test/?q=<b>", "boom <script>");
        assert!(!page.contains("<script>"));
        assert!(page.contains("boom &lt;script&gt;"));
        assert!(page.contains("q=&lt;b&gt;"));
    }

    #[test]
    fn test_snapshot_page_embeds_png_and_controls() {
        let page = snapshot_page("https://example.com/", &[137, 80, 78, 71]);
        assert!(page.contains("data:image/png;base64,iVBORw=="));
        assert!(page.contains("Viewing: https://example.com/"));
        assert!(page.contains("/api/click"));
        assert!(page.contains("/api/type"));
        assert!(page.contains("/api/screenshot"));
    }
}
