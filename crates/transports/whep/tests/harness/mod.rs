//! WHEP integration test harness
//!
//! Provides:
//! - An embedded axum WHEP endpoint on a random port that records every offer
//!   and answers with a scripted response
//! - State-change collectors with timeouts
//! - Shared logging setup
//!
//! Tests pair the server with `MockResourceFactory`, so the HTTP exchange is
//! real while the peer connection is scripted.

#![allow(dead_code)]

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, LOCATION};
use axum::http::{HeaderMap, HeaderName, StatusCode, Uri};
use axum::response::Response;
use axum::routing::{delete, post};
use axum::Router;
use gateview_whep::peer::mock::{MockBehavior, MockResourceFactory};
use gateview_whep::{
    ConnectionState, ResourceFactory, ResourceLifecycleManager, StateChange, Subscription,
    WhepConfig,
};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::info;

/// Minimal valid SDP answer with one video section
pub const VALID_ANSWER: &str = "v=0\r\n\
o=- 3912 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:0\r\n\
a=sendonly\r\n\
a=rtpmap:96 H264/90000\r\n";

/// Path of the session resource returned in `Location`
pub const SESSION_PATH: &str = "/whep/session/1";

/// Default wait for an expected state change
pub const CHANGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Initialize test logging (call once per test)
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,gateview_whep=debug")
        .with_test_writer()
        .try_init();
}

/// Scripted response of the test endpoint
#[derive(Debug, Clone)]
pub struct WhepResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub delay: Duration,
    pub location: Option<String>,
}

impl WhepResponse {
    /// `201 Created` with [`VALID_ANSWER`] and a `Location`
    pub fn answer() -> Self {
        Self {
            status: 201,
            body: VALID_ANSWER.as_bytes().to_vec(),
            delay: Duration::ZERO,
            location: Some(SESSION_PATH.to_string()),
        }
    }

    pub fn status(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.as_bytes().to_vec(),
            delay: Duration::ZERO,
            location: None,
        }
    }

    pub fn with_body(mut self, body: &[u8]) -> Self {
        self.body = body.to_vec();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn without_location(mut self) -> Self {
        self.location = None;
        self
    }
}

/// One offer received by the test endpoint
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub content_type: Option<String>,
    pub authorization: Option<String>,
    pub body: String,
    pub received_at: Instant,
}

struct ServerState {
    response: Mutex<WhepResponse>,
    requests: Mutex<Vec<RecordedRequest>>,
    deletes: AtomicUsize,
}

/// Embedded WHEP endpoint
pub struct WhepTestServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    handle: JoinHandle<()>,
}

impl WhepTestServer {
    /// Start a server on a random available port
    pub async fn start(response: WhepResponse) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test server");
        let addr = listener.local_addr().expect("Failed to get local addr");

        let state = Arc::new(ServerState {
            response: Mutex::new(response),
            requests: Mutex::new(Vec::new()),
            deletes: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/:camera/whep", post(handle_offer))
            .route("/whep/session/:id", delete(handle_delete))
            .with_state(Arc::clone(&state));

        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        info!("WHEP test server listening on {}", addr);

        Self {
            addr,
            state,
            handle,
        }
    }

    /// Endpoint URL for `camera`
    pub fn endpoint(&self, camera: &str) -> String {
        format!("http://{}/{}/whep", self.addr, camera)
    }

    pub fn set_response(&self, response: WhepResponse) {
        *self.state.response.lock() = response;
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.requests.lock().len()
    }

    pub fn delete_count(&self) -> usize {
        self.state.deletes.load(Ordering::SeqCst)
    }
}

impl Drop for WhepTestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_offer(
    State(state): State<Arc<ServerState>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header = |name: HeaderName| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };

    state.requests.lock().push(RecordedRequest {
        path: uri.path().to_string(),
        content_type: header(CONTENT_TYPE),
        authorization: header(AUTHORIZATION),
        body: String::from_utf8_lossy(&body).into_owned(),
        received_at: Instant::now(),
    });

    let response = state.response.lock().clone();
    if !response.delay.is_zero() {
        tokio::time::sleep(response.delay).await;
    }

    let mut builder = axum::http::Response::builder()
        .status(StatusCode::from_u16(response.status).expect("valid status"))
        .header(CONTENT_TYPE, "application/sdp");
    if let Some(location) = &response.location {
        builder = builder.header(LOCATION, location.as_str());
    }

    builder
        .body(Body::from(response.body))
        .expect("valid response")
}

async fn handle_delete(State(state): State<Arc<ServerState>>) -> StatusCode {
    state.deletes.fetch_add(1, Ordering::SeqCst);
    StatusCode::OK
}

/// Manager wired to a mock factory
pub fn mock_manager(
    config: WhepConfig,
    behavior: MockBehavior,
) -> (ResourceLifecycleManager, Arc<MockResourceFactory>) {
    let factory = Arc::new(MockResourceFactory::new(behavior));
    let dyn_factory: Arc<dyn ResourceFactory> = Arc::clone(&factory) as Arc<dyn ResourceFactory>;
    let manager =
        ResourceLifecycleManager::with_factory(config, dyn_factory).expect("valid config");
    (manager, factory)
}

/// Test configuration: no STUN, short bounds
pub fn test_config() -> WhepConfig {
    WhepConfig {
        stun_servers: Vec::new(),
        ice_gathering_timeout_ms: 1000,
        negotiation_timeout_ms: Some(5000),
        request_timeout_ms: 3000,
        ..Default::default()
    }
}

/// Next state change, panicking after [`CHANGE_TIMEOUT`]
pub async fn next_change(changes: &mut Subscription<StateChange>) -> StateChange {
    tokio::time::timeout(CHANGE_TIMEOUT, changes.recv())
        .await
        .expect("timed out waiting for state change")
        .expect("state change stream ended")
}

/// Collect changes until one lands in a state matching `done`
pub async fn collect_until(
    changes: &mut Subscription<StateChange>,
    done: impl Fn(ConnectionState) -> bool,
) -> Vec<StateChange> {
    let mut collected = Vec::new();
    loop {
        let change = next_change(changes).await;
        let finished = done(change.to);
        collected.push(change);
        if finished {
            return collected;
        }
    }
}

/// `(from, to)` pairs of `changes`
pub fn transitions(changes: &[StateChange]) -> Vec<(ConnectionState, ConnectionState)> {
    changes.iter().map(|c| (c.from, c.to)).collect()
}

/// Assert no further change arrives within `quiet`
pub async fn assert_no_change(changes: &mut Subscription<StateChange>, quiet: Duration) {
    if let Ok(Some(change)) = tokio::time::timeout(quiet, changes.recv()).await {
        panic!("unexpected state change: {:?} -> {:?}", change.from, change.to);
    }
}

/// Poll `condition` until it holds, panicking after `timeout`
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + timeout;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within {:?}", timeout);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A loopback port with nothing listening on it
pub async fn closed_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let port = listener.local_addr().expect("Failed to get local addr").port();
    drop(listener);
    port
}
