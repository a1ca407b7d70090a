use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use url::Url;

#[derive(Debug, Default)]
struct FeedState {
    body: Mutex<String>,
    failure: Mutex<Option<StatusCode>>,
    delay: Mutex<Option<Duration>>,
    hits: AtomicU64,
}

/// Throwaway upstream serving a CSV body on `/counters`, reconfigurable mid-test.
pub struct FeedServer {
    addr: std::net::SocketAddr,
    state: Arc<FeedState>,
    handle: tokio::task::JoinHandle<()>,
}

impl FeedServer {
    pub async fn start(body: &str) -> Self {
        let state = Arc::new(FeedState {
            body: Mutex::new(body.to_string()),
            ..FeedState::default()
        });
        let app = Router::new()
            .route("/counters", get(counters))
            .with_state(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind feed server");
        let addr = listener.local_addr().expect("feed server addr");
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn url(&self) -> Url {
        Url::parse(&format!("http://{}/counters", self.addr)).expect("feed url")
    }

    pub fn set_body(&self, body: &str) {
        *self.state.body.lock().unwrap() = body.to_string();
        *self.state.failure.lock().unwrap() = None;
    }

    pub fn fail_with(&self, status: StatusCode) {
        *self.state.failure.lock().unwrap() = Some(status);
    }

    pub fn delay_by(&self, delay: Duration) {
        *self.state.delay.lock().unwrap() = Some(delay);
    }

    pub fn hits(&self) -> u64 {
        self.state.hits.load(Ordering::SeqCst)
    }
}

impl Drop for FeedServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn counters(State(state): State<Arc<FeedState>>) -> (StatusCode, String) {
    state.hits.fetch_add(1, Ordering::SeqCst);
    let delay = *state.delay.lock().unwrap();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    if let Some(status) = *state.failure.lock().unwrap() {
        return (status, "upstream failure".to_string());
    }
    (StatusCode::OK, state.body.lock().unwrap().clone())
}

/// A URL on a local port nothing is listening on.
pub async fn unused_local_url() -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind probe");
    let addr = listener.local_addr().expect("probe addr");
    drop(listener);
    Url::parse(&format!("http://{addr}/counters")).expect("unused url")
}
