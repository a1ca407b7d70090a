use anyhow::{Context, Result};
use metrics_server::config::Config;
use metrics_server::feed::FeedClient;
use metrics_server::http::{self, HttpState};
use metrics_server::ingest::Ingestor;
use metrics_server::query::MetricsQuery;
use metrics_server::store::SnapshotStore;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

fn init_tracing(config: &Config) -> Result<()> {
    let level = &config.log_level;
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("{level},metrics_server={level}").into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

async fn bind_listener(addr: &str) -> Result<TcpListener> {
    match TcpListener::bind(addr).await {
        Ok(listener) => Ok(listener),
        Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
            anyhow::bail!("failed to bind {addr}: port already in use; set METRICS_HTTP_BIND");
        }
        Err(err) => Err(err).with_context(|| format!("failed to bind listener on {addr}")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config)?;

    let store = Arc::new(SnapshotStore::new());
    let client = FeedClient::new(config.fetch_timeout).context("failed to build feed client")?;
    let ingestor = Ingestor::new(
        client,
        config.source_url.clone(),
        config.poll_interval,
        store.clone(),
    );
    let stats = ingestor.stats();

    let cancel = CancellationToken::new();
    let ingest_handle = ingestor.spawn(cancel.clone());

    let app = http::router(HttpState {
        query: MetricsQuery::new(store),
        stats,
    });
    let listener = bind_listener(&config.http_bind).await?;
    tracing::info!(bind = %config.http_bind, "metrics-server HTTP listening");

    let shutdown = cancel.clone();
    let mut http_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
        res = &mut http_handle => {
            match res {
                Ok(Err(err)) => tracing::error!(error = %err, "HTTP server exited with error"),
                Err(err) => tracing::error!(error = %err, "HTTP task failed"),
                Ok(Ok(())) => tracing::warn!("HTTP server exited"),
            }
        }
    }

    cancel.cancel();
    if let Err(err) = ingest_handle.await {
        tracing::warn!(error = %err, "ingest task failed");
    }
    if !http_handle.is_finished() {
        let _ = http_handle.await;
    }

    Ok(())
}
