//! Tile request interception.
//!
//! [`TileInterceptor`] wraps the page's fetch.  Tile image requests are
//! fetched for real, handed to a compositing step under a fresh correlation
//! id, and answered with whatever body comes back for that id.  Everything
//! else goes straight to the inner fetch.
//!
//! The compositing step runs behind [`CompositorLink`] and is swappable via
//! the [`Compositor`] trait.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use uuid::Uuid;

use crate::config::Settings;
use crate::net::{Fetch, FetchError, ParsedUrl, Request, Response};
use crate::tiles::TileKey;

// ============================================================================
// Matching
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileMatcher {
    pub host: String,
    pub path_prefix: String,
    pub extension: String,
}

impl Default for TileMatcher {
    fn default() -> Self {
        Self::new("backend.wplace.live", "/files/", ".png")
    }
}

impl TileMatcher {
    pub fn new(host: impl Into<String>, path_prefix: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            host: host.into().to_ascii_lowercase(),
            path_prefix: path_prefix.into(),
            extension: extension.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.backend_host.as_str(),
            settings.tile_path_prefix.as_str(),
            settings.tile_extension.as_str(),
        )
    }

    fn matching_path(&self, raw: &str) -> Option<String> {
        let url = ParsedUrl::parse(raw, None)?;
        (url.host == self.host && url.path.starts_with(&self.path_prefix) && url.path.ends_with(&self.extension))
            .then_some(url.path)
    }

    /// Host, path prefix and extension all match.  Unparseable URLs never do.
    pub fn is_tile_url(&self, raw: &str) -> bool {
        self.matching_path(raw).is_some()
    }

    /// `/files/s0/tiles/{x}/{y}.png` → `(x, y)`.
    pub fn tile_key(&self, raw: &str) -> Option<TileKey> {
        let path = self.matching_path(raw)?;
        let stem = path.strip_suffix(self.extension.as_str())?;
        let mut segments = stem.rsplit('/');
        let y = segments.next()?;
        let x = segments.next()?;
        format!("{},{}", x, y).parse().ok()
    }
}

// ============================================================================
// Correlation
// ============================================================================

/// Original tile bytes on their way to the compositor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileRequest {
    pub id: Uuid,
    pub url: String,
    pub tile: Option<TileKey>,
    pub body: Vec<u8>,
}

/// Replacement body for the request with the same id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileReply {
    pub id: Uuid,
    pub body: Vec<u8>,
}

/// Waiters keyed by correlation id.  Each id is resolved at most once.
#[derive(Clone, Default)]
pub struct PendingReplies {
    slots: Arc<Mutex<HashMap<Uuid, SyncSender<Vec<u8>>>>>,
}

impl PendingReplies {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, SyncSender<Vec<u8>>>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&self, id: Uuid) -> Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::sync_channel(1);
        self.slots().insert(id, tx);
        rx
    }

    /// Wake the waiter for `reply.id`.  Unknown or already-settled ids are
    /// ignored and return `false`.
    pub fn resolve(&self, reply: TileReply) -> bool {
        let Some(tx) = self.slots().remove(&reply.id) else {
            return false;
        };
        tx.send(reply.body).is_ok()
    }

    pub fn cancel(&self, id: &Uuid) {
        self.slots().remove(id);
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Compositor-side handle for answering tile requests.
#[derive(Clone)]
pub struct ReplySender {
    pending: PendingReplies,
}

impl ReplySender {
    pub fn send(&self, reply: TileReply) -> bool {
        self.pending.resolve(reply)
    }
}

/// The compositor's end of an interceptor.
pub struct CompositorLink {
    pub requests: Receiver<TileRequest>,
    pub replies: ReplySender,
}

// ============================================================================
// Interceptor
// ============================================================================

pub struct TileInterceptor<F> {
    inner: F,
    matcher: TileMatcher,
    requests: Sender<TileRequest>,
    pending: PendingReplies,
    timeout: Duration,
}

impl<F: Fetch> TileInterceptor<F> {
    /// Wrap `inner`.  `timeout` bounds how long a tile fetch waits for its
    /// composited body before falling back to the original.
    pub fn new(inner: F, matcher: TileMatcher, timeout: Duration) -> (Self, CompositorLink) {
        let (tx, rx) = mpsc::channel();
        let pending = PendingReplies::new();
        let link = CompositorLink {
            requests: rx,
            replies: ReplySender {
                pending: pending.clone(),
            },
        };
        let interceptor = Self {
            inner,
            matcher,
            requests: tx,
            pending,
            timeout,
        };
        (interceptor, link)
    }

    pub fn matcher(&self) -> &TileMatcher {
        &self.matcher
    }

    /// Requests currently waiting on the compositor.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    fn composite(&self, request: &Request, response: Response) -> Response {
        let id = Uuid::new_v4();
        let reply = self.pending.register(id);
        let tile_request = TileRequest {
            id,
            url: request.url.clone(),
            tile: self.matcher.tile_key(&request.url),
            body: response.body.clone(),
        };

        if self.requests.send(tile_request).is_err() {
            self.pending.cancel(&id);
            log_warn!("Compositor gone, serving original tile {}", request.url);
            return response;
        }

        match reply.recv_timeout(self.timeout) {
            Ok(body) => response.with_body(body),
            Err(e) => {
                self.pending.cancel(&id);
                log_warn!("No composited tile for {} ({}): {}", request.url, id, e);
                response
            }
        }
    }
}

impl<F: Fetch> Fetch for TileInterceptor<F> {
    fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        if !self.matcher.is_tile_url(&request.url) {
            return self.inner.fetch(request);
        }
        let response = self.inner.fetch(request)?;
        if !response.is_success() {
            return Ok(response);
        }
        Ok(self.composite(request, response))
    }
}

// ============================================================================
// Compositing
// ============================================================================

/// Produces the body served in place of an original tile.
pub trait Compositor: Send {
    fn composite(&mut self, request: &TileRequest) -> Vec<u8>;
}

/// Serves the original bytes unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct Passthrough;

impl Compositor for Passthrough {
    fn composite(&mut self, request: &TileRequest) -> Vec<u8> {
        request.body.clone()
    }
}

/// Answer every request on `link` with `compositor`, on a named thread, until
/// the interceptor is dropped.
pub fn spawn_compositor<C: Compositor + 'static>(
    link: CompositorLink,
    mut compositor: C,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("tile-compositor".into())
        .spawn(move || {
            for request in link.requests {
                let body = compositor.composite(&request);
                if !link.replies.send(TileReply { id: request.id, body }) {
                    log_warn!("Late composited tile {} dropped", request.id);
                }
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        status: u16,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn new(status: u16) -> Self {
            Self {
                status,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Fetch for Fixed {
        fn fetch(&self, _request: &Request) -> Result<Response, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Response::new(self.status, "Status", b"tile".to_vec()).with_header("etag", "v1"))
        }
    }

    struct Failing;

    impl Fetch for Failing {
        fn fetch(&self, _request: &Request) -> Result<Response, FetchError> {
            Err(FetchError::Network("offline".into()))
        }
    }

    struct Invert;

    impl Compositor for Invert {
        fn composite(&mut self, request: &TileRequest) -> Vec<u8> {
            request.body.iter().map(|b| !b).collect()
        }
    }

    const TILE_URL: &str = "https://backend.wplace.live/files/s0/tiles/12/67.png";

    #[test]
    fn matcher_requires_host_prefix_and_extension() {
        let m = TileMatcher::default();
        assert!(m.is_tile_url(TILE_URL));
        assert!(!m.is_tile_url("https://cdn.example/files/s0/tiles/12/67.png"));
        assert!(!m.is_tile_url("https://backend.wplace.live/s0/tiles/12/67.png"));
        assert!(!m.is_tile_url("https://backend.wplace.live/files/s0/tiles/12/67.webp"));
        assert!(!m.is_tile_url("/files/s0/tiles/12/67.png"));
        assert_eq!(m.tile_key(TILE_URL), Some(TileKey::new(12, 67)));
        assert_eq!(m.tile_key("https://backend.wplace.live/files/s0/x.png"), None);
    }

    #[test]
    fn composited_body_keeps_original_status_line() {
        let inner = Fixed::new(200);
        let (interceptor, link) = TileInterceptor::new(&inner, TileMatcher::default(), Duration::from_secs(5));
        let worker = spawn_compositor(link, Invert).unwrap();

        let resp = interceptor.fetch(&Request::get(TILE_URL)).unwrap();
        assert_eq!(resp.body, b"tile".iter().map(|b| !b).collect::<Vec<_>>());
        assert_eq!(resp.status_text, "Status");
        assert_eq!(resp.headers, vec![("etag".to_string(), "v1".to_string())]);
        assert_eq!(interceptor.in_flight(), 0);

        drop(interceptor);
        worker.join().unwrap();
    }

    #[test]
    fn failures_and_errors_skip_compositing() {
        let inner = Fixed::new(404);
        let (interceptor, link) = TileInterceptor::new(&inner, TileMatcher::default(), Duration::from_secs(5));
        let resp = interceptor.fetch(&Request::get(TILE_URL)).unwrap();
        assert_eq!(resp.status, 404);
        assert!(link.requests.try_recv().is_err());

        let (interceptor, _link) = TileInterceptor::new(Failing, TileMatcher::default(), Duration::from_secs(5));
        assert_eq!(
            interceptor.fetch(&Request::get(TILE_URL)),
            Err(FetchError::Network("offline".into()))
        );
    }

    #[test]
    fn silent_compositor_times_out_to_original() {
        let inner = Fixed::new(200);
        let (interceptor, _link) = TileInterceptor::new(&inner, TileMatcher::default(), Duration::from_millis(20));
        let resp = interceptor.fetch(&Request::get(TILE_URL)).unwrap();
        assert_eq!(resp.body, b"tile");
        assert_eq!(interceptor.in_flight(), 0);
    }

    #[test]
    fn dropped_compositor_serves_original() {
        let inner = Fixed::new(200);
        let (interceptor, link) = TileInterceptor::new(&inner, TileMatcher::default(), Duration::from_secs(5));
        drop(link);
        assert_eq!(interceptor.fetch(&Request::get(TILE_URL)).unwrap().body, b"tile");
    }

    #[test]
    fn resolve_only_wakes_matching_id() {
        let pending = PendingReplies::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let rx_a = pending.register(a);
        let rx_b = pending.register(b);

        assert!(pending.resolve(TileReply { id: b, body: vec![2] }));
        assert_eq!(rx_b.try_recv(), Ok(vec![2]));
        assert!(rx_a.try_recv().is_err());
        assert!(!pending.resolve(TileReply { id: b, body: vec![3] }));
        assert!(!pending.resolve(TileReply { id: Uuid::new_v4(), body: vec![] }));
        assert_eq!(pending.len(), 1);
    }
}
