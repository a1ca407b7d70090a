use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} timed out after {timeout:?}")]
    Timeout { url: Url, timeout: Duration },
    #[error("request to {url} failed: {source}")]
    Request {
        url: Url,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status { url: Url, status: StatusCode },
    #[error("failed to read body from {url}: {source}")]
    Body {
        url: Url,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Single-shot HTTP fetch of the telemetry feed. Retrying is left to the poll cadence.
#[derive(Clone, Debug)]
pub struct FeedClient {
    http: Client,
    timeout: Duration,
}

impl FeedClient {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(TransportError::Client)?;
        Ok(Self { http, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn fetch(&self, url: &Url) -> Result<String, TransportError> {
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|err| self.classify(url, err, false))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.clone(),
                status,
            });
        }

        response
            .text()
            .await
            .map_err(|err| self.classify(url, err, true))
    }

    fn classify(&self, url: &Url, err: reqwest::Error, reading_body: bool) -> TransportError {
        let url = url.clone();
        if err.is_timeout() {
            TransportError::Timeout {
                url,
                timeout: self.timeout,
            }
        } else if reading_body {
            TransportError::Body { url, source: err }
        } else {
            TransportError::Request { url, source: err }
        }
    }
}
