use anyhow::{anyhow, bail, Context, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const DEFAULT_CONFIG_PATH: &str = "./config/config.json";
const DEFAULT_GENERATOR_HOST: &str = "127.0.0.1";
const DEFAULT_GENERATOR_PORT: u16 = 9001;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
const DEFAULT_FETCH_TIMEOUT_MS: u64 = 2000;
const DEFAULT_HTTP_BIND: &str = "127.0.0.1:8000";
const DEFAULT_LOG_LEVEL: &str = "info";

/// Optional JSON config file. Values here only apply when the matching env var is unset.
#[derive(Debug, Clone, Default, Deserialize)]
struct FileOverrides {
    #[serde(default)]
    source_url: Option<String>,
    #[serde(default)]
    poll_interval_secs: Option<u64>,
    #[serde(default)]
    fetch_timeout_ms: Option<u64>,
    #[serde(default)]
    http_bind: Option<String>,
    #[serde(default)]
    logging: Option<LoggingOverrides>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct LoggingOverrides {
    #[serde(default)]
    level: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub source_url: Url,
    pub poll_interval: Duration,
    pub fetch_timeout: Duration,
    pub http_bind: String,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let path = env_optional("METRICS_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        let file = load_file_overrides(&path);
        Self::resolve(env_optional, file.unwrap_or_default())
    }

    fn resolve(lookup: impl Fn(&str) -> Option<String>, file: FileOverrides) -> Result<Self> {
        let source_url = match lookup("METRICS_SOURCE_URL").or(file.source_url) {
            Some(raw) => raw,
            None => {
                let host = lookup("GENERATOR_HOST")
                    .unwrap_or_else(|| DEFAULT_GENERATOR_HOST.to_string());
                let port = match lookup("GENERATOR_PORT") {
                    Some(raw) => raw.parse::<u16>().context("invalid GENERATOR_PORT")?,
                    None => DEFAULT_GENERATOR_PORT,
                };
                format!("http://{host}:{port}/counters")
            }
        };
        let source_url = parse_source_url(&source_url)?;

        let poll_interval_secs = lookup_u64(&lookup, "METRICS_POLL_INTERVAL_SECS")?
            .or(file.poll_interval_secs)
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
        if poll_interval_secs == 0 {
            bail!("poll interval must be at least one second");
        }

        let fetch_timeout_ms = lookup_u64(&lookup, "METRICS_FETCH_TIMEOUT_MS")?
            .or(file.fetch_timeout_ms)
            .unwrap_or(DEFAULT_FETCH_TIMEOUT_MS);
        if fetch_timeout_ms == 0 {
            bail!("fetch timeout must be non-zero");
        }

        let http_bind = lookup("METRICS_HTTP_BIND")
            .or(file.http_bind)
            .unwrap_or_else(|| DEFAULT_HTTP_BIND.to_string());

        let log_level = lookup("METRICS_LOG_LEVEL")
            .or(file.logging.and_then(|logging| logging.level))
            .map(|level| level.to_ascii_lowercase())
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        Ok(Self {
            source_url,
            poll_interval: Duration::from_secs(poll_interval_secs),
            fetch_timeout: Duration::from_millis(fetch_timeout_ms),
            http_bind,
            log_level,
        })
    }
}

fn load_file_overrides(path: &Path) -> Option<FileOverrides> {
    if !path.exists() {
        return None;
    }
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to read config file; using env defaults"
            );
            return None;
        }
    };
    match serde_json::from_str(&contents) {
        Ok(overrides) => Some(overrides),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to parse config file; using env defaults"
            );
            None
        }
    }
}

fn parse_source_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).with_context(|| format!("invalid source url {raw:?}"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(anyhow!("source url must be http or https, got {other}")),
    }
}

fn lookup_u64(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u64>> {
    lookup(key)
        .map(|value| value.parse::<u64>().with_context(|| format!("invalid {key}")))
        .transpose()
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
