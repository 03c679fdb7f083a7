//! Minimal request/response model for the host page's network calls.
//!
//! Interceptors are [`Fetch`] decorators: each wraps the "original" fetch and
//! decides per request whether to observe, substitute, or simply forward.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub url: String,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
        }
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self {
            method: "POST".to_string(),
            url: url.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, status_text: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            status,
            status_text: status_text.into(),
            headers: Vec::new(),
            body,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Same status line and headers, different body.
    pub fn with_body(&self, body: Vec<u8>) -> Self {
        Self {
            status: self.status,
            status_text: self.status_text.clone(),
            headers: self.headers.clone(),
            body,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),
}

/// Anything that can perform a network call.
pub trait Fetch: Send + Sync {
    fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

impl<T: Fetch + ?Sized> Fetch for Arc<T> {
    fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        (**self).fetch(request)
    }
}

impl<T: Fetch + ?Sized> Fetch for &T {
    fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        (**self).fetch(request)
    }
}

impl<T: Fetch + ?Sized> Fetch for Box<T> {
    fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        (**self).fetch(request)
    }
}

// ============================================================================
// URL parsing
// ============================================================================

/// The parts of a URL the interceptors care about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedUrl {
    pub scheme: String,
    pub host: String,
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl ParsedUrl {
    /// Parse an absolute URL, or a root-relative one (`/path?...`) resolved
    /// against `base`.  Returns `None` for anything that does not parse.
    pub fn parse(raw: &str, base: Option<&str>) -> Option<Self> {
        let raw = raw.trim();
        if raw.starts_with('/') && !raw.starts_with("//") {
            let base = Self::parse(base?, None)?;
            let (path, query) = split_path_query(raw);
            return Some(Self {
                scheme: base.scheme,
                host: base.host,
                path,
                query,
            });
        }

        let (scheme, rest) = raw.split_once("://")?;
        if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c)) {
            return None;
        }
        let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
        let authority = &rest[..authority_end];
        // Drop userinfo and port
        let host_port = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
        let host = match host_port.rsplit_once(':') {
            Some((h, port)) if port.bytes().all(|b| b.is_ascii_digit()) => h,
            _ => host_port,
        };
        if host.is_empty() {
            return None;
        }

        let (mut path, query) = split_path_query(&rest[authority_end..]);
        if path.is_empty() {
            path.push('/');
        }
        Some(Self {
            scheme: scheme.to_ascii_lowercase(),
            host: host.to_ascii_lowercase(),
            path,
            query,
        })
    }

    /// First value of query parameter `name`.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

fn split_path_query(s: &str) -> (String, Vec<(String, String)>) {
    let s = s.split_once('#').map_or(s, |(before, _)| before);
    let (path, query) = s.split_once('?').unwrap_or((s, ""));
    let pairs = query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (decode_component(k), decode_component(v)),
            None => (decode_component(pair), String::new()),
        })
        .collect();
    (path.to_string(), pairs)
}

/// Form-style decoding: `+` is a space, `%XX` is a byte, invalid UTF-8 is
/// replaced.
fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    String::from_utf8_lossy(&urlencoding::decode_binary(spaced.as_bytes())).into_owned()
}

// ============================================================================
// Offline fetch (CLI)
// ============================================================================

/// Serves tile images from a local directory laid out as `<root>/<x>/<y>.png`,
/// matching the last two path segments of a tile URL.  Every other request
/// answers 404.
pub struct OfflineFetch {
    root: PathBuf,
}

impl OfflineFetch {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Fetch for OfflineFetch {
    fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        let not_found = || Ok(Response::new(404, "Not Found", Vec::new()));
        let Some(url) = ParsedUrl::parse(&request.url, None) else {
            return not_found();
        };
        let mut segments = url.path.rsplit('/');
        let (Some(file), Some(dir)) = (segments.next(), segments.next()) else {
            return not_found();
        };
        if dir.is_empty() || dir.contains("..") || file.contains("..") {
            return not_found();
        }
        let path = self.root.join(dir).join(file);
        match fs::read(&path) {
            Ok(body) => Ok(Response::new(200, "OK", body).with_header("content-type", "image/png")),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => not_found(),
            Err(e) => Err(FetchError::Network(format!("{}: {}", path.display(), e))),
        }
    }
}
