use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use pixel_overlay::intercept::{TileInterceptor, TileMatcher, TileReply};
use pixel_overlay::net::{Fetch, FetchError, Request, Response};
use pixel_overlay::tiles::TileKey;

/// Answers with the request URL as body and counts calls.
#[derive(Default)]
struct CountingFetch {
    calls: AtomicUsize,
}

impl Fetch for CountingFetch {
    fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Response::new(200, "OK", request.url.clone().into_bytes()).with_header("cache-control", "no-cache"))
    }
}

const TILE_A: &str = "https://backend.wplace.live/files/s0/tiles/1/2.png";
const TILE_B: &str = "https://backend.wplace.live/files/s0/tiles/3/4.png";

#[test]
fn non_matching_request_passes_through_once() {
    let inner = Arc::new(CountingFetch::default());
    let (interceptor, link) = TileInterceptor::new(Arc::clone(&inner), TileMatcher::default(), Duration::from_secs(5));

    let url = "https://elsewhere.example/files/s0/tiles/1/2.png";
    let direct = CountingFetch::default().fetch(&Request::get(url)).unwrap();
    let resp = interceptor.fetch(&Request::get(url)).unwrap();

    assert_eq!(resp, direct);
    assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    assert!(link.requests.try_recv().is_err());
}

#[test]
fn replies_resolve_only_their_own_request() {
    let inner = Arc::new(CountingFetch::default());
    let (interceptor, link) = TileInterceptor::new(Arc::clone(&inner), TileMatcher::default(), Duration::from_secs(10));
    let interceptor = Arc::new(interceptor);

    let spawn = |url: &'static str| {
        let interceptor = Arc::clone(&interceptor);
        thread::spawn(move || interceptor.fetch(&Request::get(url)).unwrap())
    };
    let first = spawn(TILE_A);
    let req_a = link.requests.recv_timeout(Duration::from_secs(5)).unwrap();
    let second = spawn(TILE_B);
    let req_b = link.requests.recv_timeout(Duration::from_secs(5)).unwrap();

    assert_ne!(req_a.id, req_b.id);
    assert_eq!(req_a.tile, Some(TileKey::new(1, 2)));
    assert_eq!(req_b.tile, Some(TileKey::new(3, 4)));
    assert_eq!(req_a.body, TILE_A.as_bytes());

    assert!(link.replies.send(TileReply { id: req_b.id, body: b"second".to_vec() }));
    let resp_b = second.join().unwrap();
    assert_eq!(resp_b.body, b"second");
    assert_eq!(resp_b.headers, vec![("cache-control".to_string(), "no-cache".to_string())]);

    // The first request is still waiting on its own id
    assert!(!first.is_finished());
    assert_eq!(interceptor.in_flight(), 1);

    assert!(link.replies.send(TileReply { id: req_a.id, body: b"first".to_vec() }));
    assert_eq!(first.join().unwrap().body, b"first");
    assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
}
