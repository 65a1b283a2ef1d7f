//! Redirect stub content: building it, recognising it and extracting its target.

use regex::Regex;
use std::sync::LazyLock;

static REDIRECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)^\s*REDIRECT\s+<a\b[^>]*\bhref="([^"]+)"[^>]*>"#)
        .expect("redirect pattern is valid")
});

/// Content of a redirect stub pointing at `url`.
pub fn redirect_html(url: &str, title: &str) -> String {
    format!(
        r#"REDIRECT <a class="redirect" href="{}">{}</a>"#,
        html_escape(url),
        html_escape(title)
    )
}

pub fn is_redirect_content(content: &str) -> bool {
    REDIRECT_RE.is_match(content)
}

/// Target URL of redirect content, unescaped.
pub fn redirect_url(content: &str) -> Option<String> {
    REDIRECT_RE
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| html_unescape(m.as_str()))
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

fn html_unescape(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
