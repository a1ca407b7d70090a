use crate::feed::{self, FeedClient, FeedError};
use crate::store::{Snapshot, SnapshotStore};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Per-cycle outcome counters, so a stale snapshot can be explained.
#[derive(Debug, Default)]
pub struct IngestStats {
    pub cycles: AtomicU64,
    pub successes: AtomicU64,
    pub transport_failures: AtomicU64,
    pub parse_failures: AtomicU64,
    pub last_success_unix_ms: AtomicU64,
    pub last_error: Mutex<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestStatus {
    pub cycles: u64,
    pub successes: u64,
    pub transport_failures: u64,
    pub parse_failures: u64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl IngestStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_success(&self, at: DateTime<Utc>) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        let millis = u64::try_from(at.timestamp_millis()).unwrap_or_default();
        self.last_success_unix_ms.store(millis, Ordering::Relaxed);
        self.clear_error();
    }

    fn record_failure(&self, err: &FeedError) {
        let counter = match err {
            FeedError::Transport(_) => &self.transport_failures,
            FeedError::Parse(_) => &self.parse_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = Some(err.to_string());
        }
    }

    fn clear_error(&self) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = None;
        }
    }

    pub fn status(&self) -> IngestStatus {
        let last_success_ms = self.last_success_unix_ms.load(Ordering::Relaxed);
        let last_success_at = if last_success_ms == 0 {
            None
        } else {
            i64::try_from(last_success_ms)
                .ok()
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        };
        IngestStatus {
            cycles: self.cycles.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            last_success_at,
            last_error: self.last_error.lock().ok().and_then(|guard| guard.clone()),
        }
    }
}

/// Drives fetch -> parse -> replace on a fixed cadence. The only writer of the store.
pub struct Ingestor {
    client: FeedClient,
    source: Url,
    interval: Duration,
    store: Arc<SnapshotStore>,
    stats: Arc<IngestStats>,
}

impl Ingestor {
    pub fn new(
        client: FeedClient,
        source: Url,
        interval: Duration,
        store: Arc<SnapshotStore>,
    ) -> Self {
        Self {
            client,
            source,
            interval,
            store,
            stats: Arc::new(IngestStats::new()),
        }
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        self.stats.clone()
    }

    async fn run_cycle(&self) -> Result<Arc<Snapshot>, FeedError> {
        let raw = self.client.fetch(&self.source).await?;
        let table = feed::parse(&raw)?;
        Ok(self.store.update(table))
    }

    /// One poll cycle. Failures are logged and counted; the store is only touched on
    /// full success.
    pub async fn poll_once(&self) -> Option<Arc<Snapshot>> {
        self.stats.cycles.fetch_add(1, Ordering::Relaxed);
        match self.run_cycle().await {
            Ok(snapshot) => {
                if let Some(taken_at) = snapshot.taken_at() {
                    self.stats.record_success(taken_at);
                }
                tracing::debug!(
                    generation = snapshot.generation(),
                    entities = snapshot.len(),
                    "telemetry snapshot installed"
                );
                Some(snapshot)
            }
            Err(err) => {
                self.stats.record_failure(&err);
                let kind = match &err {
                    FeedError::Transport(_) => "transport",
                    FeedError::Parse(_) => "parse",
                };
                tracing::warn!(
                    error = %err,
                    kind,
                    source = %self.source,
                    generation = self.store.read().generation(),
                    "telemetry poll failed; keeping previous snapshot"
                );
                None
            }
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            source = %self.source,
            interval_ms = self.interval.as_millis() as u64,
            timeout_ms = self.client.timeout().as_millis() as u64,
            "telemetry ingestion started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.poll_once() => {}
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        tracing::info!("telemetry ingestion stopped");
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::MetricsQuery;
    use crate::test_support::{unused_local_url, FeedServer};
    use axum::http::StatusCode;

    const FEED: &str = "switch_id,bandwidth_mbps,latency_ms\nsw1,8000,1.5\nsw2,9000,0.7\n";

    fn ingestor(source: Url, interval: Duration) -> (Arc<SnapshotStore>, Ingestor) {
        let store = Arc::new(SnapshotStore::new());
        let client = FeedClient::new(Duration::from_millis(500)).unwrap();
        let ingestor = Ingestor::new(client, source, interval, store.clone());
        (store, ingestor)
    }

    async fn wait_for(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn successful_cycle_installs_snapshot() {
        let server = FeedServer::start(FEED).await;
        let (store, ingestor) = ingestor(server.url(), Duration::from_secs(10));

        let installed = ingestor.poll_once().await.expect("cycle should succeed");

        assert!(Arc::ptr_eq(&installed, &store.read()));
        assert_eq!(installed.len(), 2);
        assert_eq!(installed.metrics("sw2").unwrap()["latency_ms"], 0.7);

        let status = ingestor.stats().status();
        assert_eq!(status.cycles, 1);
        assert_eq!(status.successes, 1);
        assert_eq!(
            status.last_success_at.map(|ts| ts.timestamp_millis()),
            installed.taken_at().map(|ts| ts.timestamp_millis())
        );
        assert_eq!(status.last_error, None);
    }

    #[tokio::test]
    async fn transport_failure_keeps_previous_snapshot() {
        let server = FeedServer::start(FEED).await;
        let (store, ingestor) = ingestor(server.url(), Duration::from_secs(10));
        let query = MetricsQuery::new(store.clone());

        ingestor.poll_once().await.expect("first cycle should succeed");
        let before = query.list_all();

        server.fail_with(StatusCode::INTERNAL_SERVER_ERROR);
        assert!(ingestor.poll_once().await.is_none());

        let after = query.list_all();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.generation(), 1);

        let status = ingestor.stats().status();
        assert_eq!(status.cycles, 2);
        assert_eq!(status.transport_failures, 1);
        assert!(status.last_error.unwrap().contains("500"));
    }

    #[tokio::test]
    async fn unreachable_source_leaves_store_empty() {
        let (store, ingestor) = ingestor(unused_local_url().await, Duration::from_secs(10));

        assert!(ingestor.poll_once().await.is_none());
        assert!(store.read().is_empty());
        assert_eq!(ingestor.stats().status().transport_failures, 1);
    }

    #[tokio::test]
    async fn parse_failure_keeps_previous_snapshot() {
        let server = FeedServer::start(FEED).await;
        let (store, ingestor) = ingestor(server.url(), Duration::from_secs(10));

        ingestor.poll_once().await.expect("first cycle should succeed");
        let before = store.read();

        server.set_body("switch_id,latency_ms\nsw1,1.0\nsw2,abc\n");
        assert!(ingestor.poll_once().await.is_none());

        assert!(Arc::ptr_eq(&before, &store.read()));
        let status = ingestor.stats().status();
        assert_eq!(status.parse_failures, 1);
        assert_eq!(status.successes, 1);
    }

    #[tokio::test]
    async fn success_clears_last_error() {
        let server = FeedServer::start(FEED).await;
        server.fail_with(StatusCode::BAD_GATEWAY);
        let (_store, ingestor) = ingestor(server.url(), Duration::from_secs(10));

        assert!(ingestor.poll_once().await.is_none());
        assert!(ingestor.stats().status().last_error.is_some());

        server.set_body(FEED);
        assert!(ingestor.poll_once().await.is_some());
        assert_eq!(ingestor.stats().status().last_error, None);
    }

    #[tokio::test]
    async fn loop_survives_failures_and_picks_up_recovery() {
        let server = FeedServer::start(FEED).await;
        server.fail_with(StatusCode::SERVICE_UNAVAILABLE);
        let (store, ingestor) = ingestor(server.url(), Duration::from_millis(20));
        let stats = ingestor.stats();
        let cancel = CancellationToken::new();
        let handle = ingestor.spawn(cancel.clone());

        wait_for(|| server.hits() >= 3).await;
        assert!(store.read().is_empty());

        server.set_body(FEED);
        wait_for(|| store.read().generation() >= 1).await;
        assert_eq!(store.read().metrics("sw1").unwrap()["bandwidth_mbps"], 8000.0);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop should stop after cancel")
            .unwrap();

        let status = stats.status();
        assert!(status.transport_failures >= 3);
        assert!(status.successes >= 1);
    }

    #[tokio::test]
    async fn cancel_interrupts_sleep() {
        let server = FeedServer::start(FEED).await;
        let (store, ingestor) = ingestor(server.url(), Duration::from_secs(3600));
        let cancel = CancellationToken::new();
        let handle = ingestor.spawn(cancel.clone());

        wait_for(|| store.read().generation() == 1).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop should stop during sleep")
            .unwrap();
        assert_eq!(server.hits(), 1);
    }
}
