//! Local HTTP fixture server for engine integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::Response;
use parking_lot::Mutex;

#[derive(Clone)]
pub struct Route {
    pub status: StatusCode,
    pub body: Vec<u8>,
    pub content_type: &'static str,
    pub delay: Duration,
}

impl Route {
    pub fn ok(body: impl Into<Vec<u8>>, content_type: &'static str) -> Self {
        Self {
            status: StatusCode::OK,
            body: body.into(),
            content_type,
            delay: Duration::ZERO,
        }
    }

    pub fn playlist(text: impl Into<String>) -> Self {
        Self::ok(text.into().into_bytes(), "application/vnd.apple.mpegurl")
    }

    pub fn segment(body: impl Into<Vec<u8>>) -> Self {
        Self::ok(body, "video/mp2t")
    }

    pub fn html(text: impl Into<String>) -> Self {
        Self::ok(text.into().into_bytes(), "text/html; charset=utf-8")
    }

    pub fn status(status: StatusCode) -> Self {
        Self {
            status,
            body: Vec::new(),
            content_type: "text/plain",
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(mut self, millis: u64) -> Self {
        self.delay = Duration::from_millis(millis);
        self
    }
}

#[derive(Default)]
pub struct Fixture {
    routes: Mutex<HashMap<String, Route>>,
    hits: Mutex<HashMap<String, usize>>,
    user_agents: Mutex<HashMap<String, String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Decrements the in-flight gauge even when the handler is dropped mid-delay.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn serve_fixture(
    State(fixture): State<Arc<Fixture>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let path = uri.path().to_string();
    *fixture.hits.lock().entry(path.clone()).or_default() += 1;
    if let Some(agent) = headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok()) {
        fixture.user_agents.lock().insert(path.clone(), agent.to_string());
    }

    let route = fixture.routes.lock().get(&path).cloned();
    let Some(route) = route else {
        return Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::empty())
            .unwrap();
    };

    let now = fixture.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    let _guard = InFlight(&fixture.in_flight);
    fixture.max_in_flight.fetch_max(now, Ordering::SeqCst);
    if !route.delay.is_zero() {
        tokio::time::sleep(route.delay).await;
    }

    Response::builder()
        .status(route.status)
        .header(header::CONTENT_TYPE, route.content_type)
        .body(Body::from(route.body))
        .unwrap()
}

pub struct TestServer {
    pub base: String,
    pub fixture: Arc<Fixture>,
}

impl TestServer {
    pub async fn start() -> Self {
        let fixture = Arc::new(Fixture::default());
        let app = Router::new()
            .fallback(serve_fixture)
            .with_state(fixture.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let addr = listener.local_addr().expect("Listener has no address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Test server failed");
        });
        Self {
            base: format!("http://{addr}"),
            fixture,
        }
    }

    pub fn route(&self, path: &str, route: Route) -> &Self {
        self.fixture.routes.lock().insert(path.to_string(), route);
        self
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    pub fn hits(&self, path: &str) -> usize {
        self.fixture.hits.lock().get(path).copied().unwrap_or(0)
    }

    /// User agent of the latest request for `path`.
    pub fn user_agent(&self, path: &str) -> Option<String> {
        self.fixture.user_agents.lock().get(path).cloned()
    }

    pub fn total_hits(&self) -> usize {
        self.fixture.hits.lock().values().sum()
    }

    pub fn max_in_flight(&self) -> usize {
        self.fixture.max_in_flight.load(Ordering::SeqCst)
    }
}

/// A VOD playlist over `(duration, uri)` pairs.
pub fn media_playlist(segments: &[(f32, &str)]) -> String {
    let mut text = String::from("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:10\n");
    for (duration, uri) in segments {
        text.push_str(&format!("#EXTINF:{duration:.3},\n{uri}\n"));
    }
    text.push_str("#EXT-X-ENDLIST\n");
    text
}
