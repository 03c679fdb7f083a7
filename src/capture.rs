//! Coordinate capture: learn the user's canvas position from the host's own
//! pixel-placement calls.
//!
//! Two halves share nothing but a [`CaptureFlag`] and an event channel:
//!
//! * [`PixelTap`] wraps the page's fetch.  While armed it inspects every
//!   outgoing request and emits a [`CaptureEvent`] for pixel-placement URLs.
//!   Requests are always forwarded untouched.
//! * [`CoordinateCapture`] consumes those events in arrival order, drops
//!   repeats, persists the coordinate and pushes it to subscribers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::net::{Fetch, FetchError, ParsedUrl, Request, Response};
use crate::store::{self, Store};
use crate::tiles::{GlobalCoordinate, TileKey};

/// Store key the cached coordinate is persisted under.
pub const COORDINATES_KEY: &str = "coordinates";

/// Path shape of the host's pixel-placement endpoint: `/s0/pixel/{tx}/{ty}`.
const PIXEL_PATH: [&str; 2] = ["s0", "pixel"];

// ============================================================================
// Shared flag
// ============================================================================

/// Capture on/off switch readable from both halves.
#[derive(Clone, Debug, Default)]
pub struct CaptureFlag(Arc<AtomicBool>);

impl CaptureFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_armed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, armed: bool) {
        self.0.store(armed, Ordering::Release);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureState {
    Disabled,
    Armed,
}

// ============================================================================
// Page half
// ============================================================================

/// Tile and in-tile pixel of one placement call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelPlacement {
    pub chunk: TileKey,
    pub pixel: (u32, u32),
    pub global: GlobalCoordinate,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CaptureEvent {
    pub chunk: TileKey,
    pub pixel: (u32, u32),
    pub global: GlobalCoordinate,
    pub url: String,
    pub timestamp: DateTime<Utc>,
}

impl CaptureEvent {
    pub fn new(placement: PixelPlacement, url: impl Into<String>) -> Self {
        Self {
            chunk: placement.chunk,
            pixel: placement.pixel,
            global: placement.global,
            url: url.into(),
            timestamp: Utc::now(),
        }
    }

    fn same_spot(&self, chunk: TileKey, pixel: (u32, u32)) -> bool {
        self.chunk == chunk && self.pixel == pixel
    }
}

/// Recognise a pixel-placement URL on `host`.
///
/// Anything that fails to parse, targets another host or path, carries a
/// non-numeric component, or overflows the coordinate space is not ours and
/// yields `None`.  Absent or empty `x`/`y` parameters count as 0.
pub fn parse_pixel_url(raw: &str, base: Option<&str>, host: &str) -> Option<PixelPlacement> {
    let url = ParsedUrl::parse(raw, base)?;
    if !url.host.eq_ignore_ascii_case(host) {
        return None;
    }

    let mut segments = url.path.rsplit('/');
    let ty = parse_digits(segments.next()?)?;
    let tx = parse_digits(segments.next()?)?;
    if segments.next()? != PIXEL_PATH[1] || segments.next()? != PIXEL_PATH[0] {
        return None;
    }

    let px = query_number(&url, "x")?;
    let py = query_number(&url, "y")?;
    let global = GlobalCoordinate::from_tile_pixel((tx, ty), (px, py))?;
    Some(PixelPlacement {
        chunk: TileKey::new(tx, ty),
        pixel: (px, py),
        global,
    })
}

fn parse_digits(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn query_number(url: &ParsedUrl, name: &str) -> Option<u32> {
    match url.query_param(name) {
        None | Some("") => Some(0),
        Some(v) => parse_digits(v),
    }
}

/// Observation-only fetch decorator for the page context.
pub struct PixelTap<F> {
    inner: F,
    flag: CaptureFlag,
    host: String,
    base_url: Option<String>,
    events: Sender<CaptureEvent>,
}

impl<F: Fetch> PixelTap<F> {
    pub fn new(inner: F, flag: CaptureFlag, host: impl Into<String>, events: Sender<CaptureEvent>) -> Self {
        Self {
            inner,
            flag,
            host: host.into(),
            base_url: None,
            events,
        }
    }

    /// Resolve root-relative request URLs against `base`.
    pub fn with_base_url(mut self, base: impl Into<String>) -> Self {
        self.base_url = Some(base.into());
        self
    }
}

impl<F: Fetch> Fetch for PixelTap<F> {
    fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        if self.flag.is_armed()
            && let Some(placement) = parse_pixel_url(&request.url, self.base_url.as_deref(), &self.host)
        {
            // A closed listener only means nobody is interested anymore
            let _ = self.events.send(CaptureEvent::new(placement, request.url.clone()));
        }
        self.inner.fetch(request)
    }
}

// ============================================================================
// Privileged half
// ============================================================================

struct Inner {
    last: Option<(TileKey, (u32, u32))>,
    current: Option<GlobalCoordinate>,
    subscribers: Vec<Sender<GlobalCoordinate>>,
}

struct Shared<S> {
    store: S,
    flag: CaptureFlag,
    inner: Mutex<Inner>,
    changed: Condvar,
}

/// Holds the cached anchor coordinate for one tab.
pub struct CoordinateCapture<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for CoordinateCapture<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: Store> CoordinateCapture<S> {
    pub fn new(store: S, flag: CaptureFlag) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                flag,
                inner: Mutex::new(Inner {
                    last: None,
                    current: None,
                    subscribers: Vec::new(),
                }),
                changed: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicked writer cannot leave Inner half-updated, so keep going
        self.shared
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn flag(&self) -> &CaptureFlag {
        &self.shared.flag
    }

    pub fn state(&self) -> CaptureState {
        if self.shared.flag.is_armed() {
            CaptureState::Armed
        } else {
            CaptureState::Disabled
        }
    }

    /// Flip capture, or force it to `force`.  Returns the new state.
    pub fn toggle(&self, force: Option<bool>) -> CaptureState {
        let armed = force.unwrap_or(!self.shared.flag.is_armed());
        self.shared.flag.set(armed);
        if armed {
            log_info!("Coordinate capture armed");
        } else {
            log_info!("Coordinate capture disabled");
        }
        self.state()
    }

    /// Page unload.
    pub fn shutdown(&self) {
        self.shared.flag.set(false);
    }

    /// Restore the persisted coordinate into the cache.  Subscribers are not
    /// notified.
    pub fn load(&self) -> Result<Option<GlobalCoordinate>, store::StoreError> {
        let saved: Option<GlobalCoordinate> = store::load_typed(&self.shared.store, COORDINATES_KEY)?;
        if let Some(coord) = saved {
            let mut inner = self.lock();
            inner.current = Some(coord);
            self.shared.changed.notify_all();
            log_info!("Restored saved coordinate {}", coord);
        }
        Ok(saved)
    }

    pub fn current(&self) -> Option<GlobalCoordinate> {
        self.lock().current
    }

    /// Receives every coordinate applied after this call.
    pub fn subscribe(&self) -> Receiver<GlobalCoordinate> {
        let (tx, rx) = mpsc::channel();
        self.lock().subscribers.push(tx);
        rx
    }

    /// Apply one capture.  Returns `false` when it repeats the previous
    /// capture's chunk and pixel.
    pub fn handle_event(&self, event: &CaptureEvent) -> bool {
        let mut inner = self.lock();
        if let Some((chunk, pixel)) = inner.last
            && event.same_spot(chunk, pixel)
        {
            return false;
        }
        inner.last = Some((event.chunk, event.pixel));
        log_info!(
            "Captured {} (tile {} pixel {},{}) from {}",
            event.global,
            event.chunk,
            event.pixel.0,
            event.pixel.1,
            event.url
        );
        self.apply(&mut inner, event.global);
        true
    }

    /// User-typed coordinate.  Goes through the same persistence path, and
    /// the next automatic capture always replaces it.
    pub fn set_manual(&self, coord: GlobalCoordinate) {
        let mut inner = self.lock();
        inner.last = None;
        log_info!("Manual coordinate {}", coord);
        self.apply(&mut inner, coord);
    }

    fn apply(&self, inner: &mut Inner, coord: GlobalCoordinate) {
        inner.current = Some(coord);
        if let Err(e) = store::save_typed(&self.shared.store, COORDINATES_KEY, &coord) {
            log_err!("Failed to persist coordinate {}: {}", coord, e);
        }
        inner.subscribers.retain(|tx| tx.send(coord).is_ok());
        self.shared.changed.notify_all();
    }

    /// Block until a coordinate is cached, at most `timeout`.
    pub fn wait_for_coordinate(&self, timeout: Duration) -> Option<GlobalCoordinate> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        while inner.current.is_none() {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            inner = match self.shared.changed.wait_timeout(inner, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        inner.current
    }
}

impl<S: Store + 'static> CoordinateCapture<S> {
    /// Process `events` in arrival order on a named worker thread until every
    /// sender is dropped.
    pub fn spawn_listener(&self, events: Receiver<CaptureEvent>) -> std::io::Result<JoinHandle<()>> {
        let capture = self.clone();
        thread::Builder::new()
            .name("coordinate-capture".into())
            .spawn(move || {
                for event in events {
                    capture.handle_event(&event);
                }
                log_info!("Coordinate capture listener stopped");
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError};
    use serde_json::Value;
    use std::sync::atomic::AtomicUsize;

    const HOST: &str = "backend.wplace.live";

    struct CountingStore {
        saves: AtomicUsize,
        inner: MemoryStore,
    }

    impl CountingStore {
        fn new() -> Self {
            Self {
                saves: AtomicUsize::new(0),
                inner: MemoryStore::new(),
            }
        }
    }

    impl Store for CountingStore {
        fn load(&self, key: &str) -> Result<Option<Value>, StoreError> {
            self.inner.load(key)
        }
        fn save(&self, key: &str, value: &Value) -> Result<(), StoreError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            self.inner.save(key, value)
        }
        fn remove(&self, key: &str) -> Result<(), StoreError> {
            self.inner.remove(key)
        }
    }

    struct Echo(AtomicUsize);

    impl Fetch for Echo {
        fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Response::new(200, "OK", request.url.clone().into_bytes()))
        }
    }

    fn event(url: &str) -> CaptureEvent {
        CaptureEvent::new(parse_pixel_url(url, None, HOST).unwrap(), url)
    }

    #[test]
    fn parses_pixel_placement() {
        let p = parse_pixel_url("https://backend.wplace.live/s0/pixel/12/67?x=345&y=6", None, HOST).unwrap();
        assert_eq!(p.chunk, TileKey::new(12, 67));
        assert_eq!(p.pixel, (345, 6));
        assert_eq!(p.global, GlobalCoordinate::new(12_345, 67_006));
    }

    #[test]
    fn encoded_query_digits_are_read() {
        let p = parse_pixel_url("https://backend.wplace.live/s0/pixel/1/2?x=%31%32&y=5", None, HOST).unwrap();
        assert_eq!(p.pixel, (12, 5));
        assert_eq!(p.global, GlobalCoordinate::new(1012, 2005));
    }

    #[test]
    fn missing_query_defaults_to_zero() {
        let p = parse_pixel_url("/s0/pixel/3/4", Some("https://backend.wplace.live/"), HOST).unwrap();
        assert_eq!(p.global, GlobalCoordinate::new(3000, 4000));
        let p = parse_pixel_url("https://backend.wplace.live/s0/pixel/3/4?x=&y=9", None, HOST).unwrap();
        assert_eq!(p.pixel, (0, 9));
    }

    #[test]
    fn foreign_or_malformed_urls_are_ignored() {
        for url in [
            "https://other.host/s0/pixel/1/2?x=1&y=1",
            "https://backend.wplace.live/s0/pixel/1?x=1&y=1",
            "https://backend.wplace.live/s1/pixel/1/2?x=1&y=1",
            "https://backend.wplace.live/s0/pixel/a/2?x=1&y=1",
            "https://backend.wplace.live/s0/pixel/1/2?x=one&y=1",
            "https://backend.wplace.live/s0/pixel/9999999/2?x=1&y=1",
            "https://backend.wplace.live/files/s0/tiles/1/2.png",
            "::garbage::",
        ] {
            assert_eq!(parse_pixel_url(url, None, HOST), None, "{}", url);
        }
    }

    #[test]
    fn tap_emits_only_while_armed_and_always_forwards() {
        let flag = CaptureFlag::new();
        let (tx, rx) = mpsc::channel();
        let inner = Echo(AtomicUsize::new(0));
        let tap = PixelTap::new(&inner, flag.clone(), HOST, tx);
        let req = Request::post("https://backend.wplace.live/s0/pixel/1/2?x=3&y=4");

        let resp = tap.fetch(&req).unwrap();
        assert_eq!(resp.body, req.url.as_bytes());
        assert!(rx.try_recv().is_err());

        flag.set(true);
        tap.fetch(&req).unwrap();
        tap.fetch(&Request::get("https://backend.wplace.live/me")).unwrap();
        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.global, GlobalCoordinate::new(1003, 2004));
        assert!(rx.try_recv().is_err());
        assert_eq!(inner.0.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn repeated_capture_persists_once() {
        let capture = CoordinateCapture::new(CountingStore::new(), CaptureFlag::new());
        let updates = capture.subscribe();
        let url = "https://backend.wplace.live/s0/pixel/1/1?x=10&y=20";

        assert!(capture.handle_event(&event(url)));
        assert!(!capture.handle_event(&event(url)));

        assert_eq!(capture.shared.store.saves.load(Ordering::SeqCst), 1);
        assert_eq!(updates.try_iter().collect::<Vec<_>>(), vec![GlobalCoordinate::new(1010, 1020)]);

        assert!(capture.handle_event(&event("https://backend.wplace.live/s0/pixel/1/1?x=11&y=20")));
        assert_eq!(capture.shared.store.saves.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn manual_override_persists_and_yields_to_next_capture() {
        let store = Arc::new(MemoryStore::new());
        let capture = CoordinateCapture::new(Arc::clone(&store), CaptureFlag::new());
        let url = "https://backend.wplace.live/s0/pixel/0/0?x=5&y=5";
        capture.handle_event(&event(url));
        capture.set_manual(GlobalCoordinate::new(42, 43));
        assert_eq!(capture.current(), Some(GlobalCoordinate::new(42, 43)));

        assert!(capture.handle_event(&event(url)));
        assert_eq!(capture.current(), Some(GlobalCoordinate::new(5, 5)));

        let reopened = CoordinateCapture::new(store, CaptureFlag::new());
        assert_eq!(reopened.load().unwrap(), Some(GlobalCoordinate::new(5, 5)));
    }

    #[test]
    fn toggle_drives_the_shared_flag() {
        let flag = CaptureFlag::new();
        let capture = CoordinateCapture::new(MemoryStore::new(), flag.clone());
        assert_eq!(capture.state(), CaptureState::Disabled);
        assert_eq!(capture.toggle(None), CaptureState::Armed);
        assert!(flag.is_armed());
        assert_eq!(capture.toggle(Some(true)), CaptureState::Armed);
        capture.shutdown();
        assert!(!flag.is_armed());
    }

    #[test]
    fn listener_thread_feeds_waiters() {
        let capture = CoordinateCapture::new(MemoryStore::new(), CaptureFlag::new());
        assert_eq!(capture.wait_for_coordinate(Duration::from_millis(10)), None);

        let (tx, rx) = mpsc::channel();
        let handle = capture.spawn_listener(rx).unwrap();
        tx.send(event("https://backend.wplace.live/s0/pixel/2/0?x=1&y=1")).unwrap();
        assert_eq!(
            capture.wait_for_coordinate(Duration::from_secs(5)),
            Some(GlobalCoordinate::new(2001, 1))
        );
        drop(tx);
        handle.join().unwrap();
    }
}
