use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Method;

pub const CSRF_HEADER: &str = "X-CSRFToken";

static META_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<meta\s+[^>]*name\s*=\s*["']csrf-token["'][^>]*>"#)
        .expect("Failed to compile csrf meta regex")
});

static CONTENT_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)content\s*=\s*["']([^"']*)["']"#).expect("Failed to compile content regex")
});

/// Anti-forgery token the backend expects on every mutating request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfToken(String);

impl CsrfToken {
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            None
        } else {
            Some(CsrfToken(token))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reads `<meta name="csrf-token" content="…">` from a served page
    pub fn from_meta(html: &str) -> Option<Self> {
        let tag = META_TAG.find(html)?;
        let content = CONTENT_ATTR.captures(tag.as_str())?;
        Self::new(content.get(1)?.as_str())
    }

    /// Reads the named cookie out of a `Cookie` header value
    pub fn from_cookie(cookie_header: &str, name: &str) -> Option<Self> {
        cookie_header
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| key.trim() == name)
            .and_then(|(_, value)| Self::new(value.trim()))
    }

    /// The meta tag wins over the cookie when both are present
    pub fn resolve(html: Option<&str>, cookie_header: Option<&str>, cookie_name: &str) -> Option<Self> {
        html.and_then(Self::from_meta)
            .or_else(|| cookie_header.and_then(|c| Self::from_cookie(c, cookie_name)))
    }
}

/// Whether the token must be attached to a request with this method
pub fn is_mutating(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::DELETE)
}
