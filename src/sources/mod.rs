//! Speech source adapters.
//!
//! Each provider implements the `verify`/`fetch` capability set and returns
//! normalized records; a failing adapter returns an error value instead of
//! poisoning the sweep. Registration happens once at startup via
//! [`SourceRegistry::from_config`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::Serialize;
use thiserror::Error;

use crate::config::Config;
use crate::store::NewSpeech;

pub mod archive;
pub mod cspan;
pub mod whitehouse;
pub mod youtube;

/// Per-request network budget for adapter calls.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
/// Budget for a `verify` probe.
pub const VERIFY_TIMEOUT: Duration = Duration::from_secs(5);

const DESKTOP_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("http error: {0}")]
    Http(String),

    #[error("unexpected response: {0}")]
    Parse(String),

    #[error("{0} is not configured")]
    NotConfigured(&'static str),
}

/// Result of a `verify()` probe.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// How the adapter reached the provider ("api" or "scrape").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<&'static str>,
}

impl SourceStatus {
    pub fn ok(status: u16, method: &'static str) -> Self {
        Self {
            available: true,
            status: Some(status),
            error: None,
            method: Some(method),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            available: false,
            status: None,
            error: Some(error.into()),
            method: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    pub limit: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self { limit: 50 }
    }
}

#[async_trait]
pub trait SpeechSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Cheap availability probe. Must come back within [`VERIFY_TIMEOUT`];
    /// the ingestion engine enforces the budget with a watchdog regardless.
    async fn verify(&self) -> SourceStatus;

    /// Fetch up to `options.limit` normalized records. Zero items is not an
    /// error. Every record carries `source` and a source-prefixed `id`.
    async fn fetch(&self, options: FetchOptions) -> Result<Vec<NewSpeech>, SourceError>;
}

/// Retrying client for ingest traffic. Fetches are idempotent reads, so the
/// exponential-backoff middleware is safe here (unlike the LLM path).
pub(crate) fn build_http_client() -> ClientWithMiddleware {
    let client = reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .connect_timeout(Duration::from_secs(5))
        .user_agent(DESKTOP_UA)
        .build()
        .expect("failed to build HTTP client");

    let retry_policy = ExponentialBackoff::builder().build_with_max_retries(2);
    ClientBuilder::new(client)
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build()
}

// ── Normalization helpers ────────────────────────────────────

/// Normalize heterogeneous provider dates to `YYYY-MM-DD`. Raw strings that
/// cannot be parsed become `None` — never passed through as-is.
pub fn normalize_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    // Timestamps: keep the calendar date.
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(dt.format("%Y-%m-%d").to_string());
    }

    let formats = ["%Y-%m-%d", "%B %d, %Y", "%b %d, %Y", "%m/%d/%Y", "%d %B %Y"];
    for fmt in formats {
        if let Ok(date) = chrono::NaiveDate::parse_from_str(raw, fmt) {
            return Some(date.format("%Y-%m-%d").to_string());
        }
    }

    // "2020-02-19T00:00:00" without offset.
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.format("%Y-%m-%d").to_string());
    }

    None
}

static LOCATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:[Rr]ally|[Ss]peech|[Rr]emarks|[Aa]ddress)\s+(?:in|at)\s+([A-Z][A-Za-z.\- ]+(?:,\s*[A-Z]{2})?)")
        .expect("location regex")
});

/// Best-effort location extraction from a title. No detectable location
/// yields `None`, never an empty string.
pub fn location_from_title(title: &str) -> Option<String> {
    LOCATION_RE
        .captures(title)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().trim_end_matches('.').to_string())
        .filter(|s| !s.is_empty())
}

// ── Registry ─────────────────────────────────────────────────

/// Closed family of adapters, addressable by name.
pub struct SourceRegistry {
    sources: Vec<Arc<dyn SpeechSource>>,
}

impl SourceRegistry {
    pub fn from_config(cfg: &Config) -> Self {
        let mut sources: Vec<Arc<dyn SpeechSource>> = vec![
            Arc::new(archive::ArchiveSource::new()),
            Arc::new(whitehouse::WhiteHouseSource::new()),
            Arc::new(cspan::CSpanSource::new(cfg.subject.clone())),
        ];
        // YouTube needs a key; without one the adapter is simply absent.
        if let Some(key) = &cfg.youtube_api_key {
            sources.push(Arc::new(youtube::YouTubeSource::new(
                key.clone(),
                cfg.subject.clone(),
            )));
        }
        Self { sources }
    }

    #[cfg(test)]
    pub fn with_sources(sources: Vec<Arc<dyn SpeechSource>>) -> Self {
        Self { sources }
    }

    pub fn all(&self) -> &[Arc<dyn SpeechSource>] {
        &self.sources
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SpeechSource>> {
        self.sources.iter().find(|s| s.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.name()).collect()
    }
}
