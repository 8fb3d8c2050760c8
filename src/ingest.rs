//! Ingestion engine: fans out to every registered source, aggregates with
//! per-source error isolation, and upserts the union into the catalog.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::sources::{FetchOptions, SourceRegistry, SourceStatus, VERIFY_TIMEOUT};
use crate::store::{NewSpeech, Store, StoreError};

/// An archive with more rows than this is considered populated and the
/// startup ingest becomes a no-op.
pub const POPULATE_THRESHOLD: i64 = 10;

/// Default per-source fetch size for a full populate pass.
const POPULATE_FETCH_LIMIT: usize = 50;

#[derive(Debug, Clone, Serialize)]
pub struct SourceFailure {
    pub source: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub existing: i64,
    pub inserted: u64,
    pub total: i64,
    pub errors: Vec<SourceFailure>,
    pub skipped: bool,
}

pub struct IngestEngine {
    store: Store,
    registry: Arc<SourceRegistry>,
    /// Last-known availability per source, refreshed by `verify_all`.
    availability: DashMap<String, SourceStatus>,
}

impl IngestEngine {
    pub fn new(store: Store, registry: Arc<SourceRegistry>) -> Self {
        Self {
            store,
            registry,
            availability: DashMap::new(),
        }
    }

    /// Probe every source concurrently under the 5-second budget and refresh
    /// the availability snapshot.
    pub async fn verify_all(&self) -> BTreeMap<String, SourceStatus> {
        let probes = self.registry.all().iter().map(|src| {
            let src = src.clone();
            async move {
                let status = match tokio::time::timeout(VERIFY_TIMEOUT, src.verify()).await {
                    Ok(status) => status,
                    Err(_) => SourceStatus::failed("verification timed out"),
                };
                (src.name().to_string(), status)
            }
        });

        let results: BTreeMap<String, SourceStatus> =
            futures::future::join_all(probes).await.into_iter().collect();

        for (name, status) in &results {
            self.availability.insert(name.clone(), status.clone());
        }
        results
    }

    /// Snapshot of the last verification pass; empty before the first one.
    pub fn availability_snapshot(&self) -> BTreeMap<String, SourceStatus> {
        self.availability
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Fetch from each source in turn. One source failing never discards
    /// another's results.
    pub async fn fetch_all(&self, limit: usize) -> (Vec<NewSpeech>, Vec<SourceFailure>) {
        let mut records = Vec::new();
        let mut errors = Vec::new();

        for src in self.registry.all() {
            match src.fetch(FetchOptions { limit }).await {
                Ok(batch) => {
                    tracing::info!(source = src.name(), count = batch.len(), "source fetched");
                    records.extend(batch);
                }
                Err(e) => {
                    tracing::warn!(source = src.name(), error = %e, "source fetch failed");
                    errors.push(SourceFailure {
                        source: src.name().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        (records, errors)
    }

    /// Populate the catalog unless it already holds enough speeches.
    pub async fn populate_archive(&self) -> Result<IngestReport, StoreError> {
        let existing = self.store.count_speeches().await?;
        if existing > POPULATE_THRESHOLD {
            tracing::info!(existing, "archive already populated, skipping ingest");
            return Ok(IngestReport {
                existing,
                inserted: 0,
                total: existing,
                errors: Vec::new(),
                skipped: true,
            });
        }
        self.refresh().await
    }

    /// Unconditional sweep: verify, fetch from every source, upsert.
    /// Backs the explicit refresh endpoint.
    pub async fn refresh(&self) -> Result<IngestReport, StoreError> {
        let existing = self.store.count_speeches().await?;
        self.verify_all().await;
        let (records, errors) = self.fetch_all(POPULATE_FETCH_LIMIT).await;
        let inserted = self.store.upsert_speeches(&records).await?;
        let total = self.store.count_speeches().await?;

        tracing::info!(existing, inserted, total, failures = errors.len(), "ingest complete");
        Ok(IngestReport {
            existing,
            inserted,
            total,
            errors,
            skipped: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::sources::{SourceError, SpeechSource};

    struct FixedSource {
        name: &'static str,
        records: Vec<NewSpeech>,
        fail: bool,
    }

    #[async_trait]
    impl SpeechSource for FixedSource {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn verify(&self) -> SourceStatus {
            if self.fail {
                SourceStatus::failed("unreachable")
            } else {
                SourceStatus::ok(200, "api")
            }
        }

        async fn fetch(&self, _options: FetchOptions) -> Result<Vec<NewSpeech>, SourceError> {
            if self.fail {
                Err(SourceError::Http("boom".into()))
            } else {
                Ok(self.records.clone())
            }
        }
    }

    fn record(id: &str, title: &str, date: Option<&str>) -> NewSpeech {
        NewSpeech {
            id: id.into(),
            title: title.into(),
            date: date.map(String::from),
            source: "archive".into(),
            ..NewSpeech::default()
        }
    }

    async fn engine_with(sources: Vec<Arc<dyn SpeechSource>>) -> IngestEngine {
        let store = Store::connect("sqlite::memory:").await.unwrap();
        store.migrate().await.unwrap();
        IngestEngine::new(store, Arc::new(SourceRegistry::with_sources(sources)))
    }

    #[tokio::test]
    async fn failing_source_does_not_block_others() {
        let engine = engine_with(vec![
            Arc::new(FixedSource {
                name: "archive",
                records: vec![
                    record("archive_a", "Rally in Phoenix, AZ", Some("2020-02-19")),
                    record("archive_b", "Address", None),
                ],
                fail: false,
            }),
            Arc::new(FixedSource {
                name: "cspan",
                records: vec![],
                fail: true,
            }),
        ])
        .await;

        let report = engine.populate_archive().await.unwrap();
        assert!(!report.skipped);
        assert_eq!(report.inserted, 2);
        assert_eq!(report.total, 2);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].source, "cspan");
    }

    #[tokio::test]
    async fn populate_twice_inserts_nothing_new() {
        let engine = engine_with(vec![Arc::new(FixedSource {
            name: "archive",
            records: vec![record("archive_a", "Rally", Some("2020-02-19"))],
            fail: false,
        })])
        .await;

        let first = engine.populate_archive().await.unwrap();
        assert_eq!(first.inserted, 1);

        let second = engine.populate_archive().await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.total, 1);
    }

    #[tokio::test]
    async fn populate_skips_when_archive_is_full() {
        let records: Vec<NewSpeech> = (0..=POPULATE_THRESHOLD)
            .map(|i| record(&format!("archive_{i}"), "Speech", None))
            .collect();
        let engine = engine_with(vec![Arc::new(FixedSource {
            name: "archive",
            records: records.clone(),
            fail: false,
        })])
        .await;
        engine.store.upsert_speeches(&records).await.unwrap();

        let report = engine.populate_archive().await.unwrap();
        assert!(report.skipped);
        assert_eq!(report.inserted, 0);
    }

    #[tokio::test]
    async fn verify_all_updates_snapshot() {
        let engine = engine_with(vec![
            Arc::new(FixedSource {
                name: "archive",
                records: vec![],
                fail: false,
            }),
            Arc::new(FixedSource {
                name: "cspan",
                records: vec![],
                fail: true,
            }),
        ])
        .await;

        assert!(engine.availability_snapshot().is_empty());
        let statuses = engine.verify_all().await;
        assert!(statuses["archive"].available);
        assert!(!statuses["cspan"].available);
        assert_eq!(engine.availability_snapshot().len(), 2);
    }
}
