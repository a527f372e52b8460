//! ---
//! corelay_section: "03-correlation-store"
//! corelay_subsection: "module"
//! corelay_type: "source"
//! corelay_scope: "code"
//! corelay_description: "Prometheus instrumentation for correlation stores."
//! corelay_version: "v0.1.0"
//! corelay_owner: "tbd"
//! ---
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use corelay_msg::RequestId;
use prometheus::{IntCounterVec, Opts, Registry};

use crate::{CorrelationRecord, CorrelationStore, Result};

/// Metrics published by correlation stores.
#[derive(Clone)]
pub struct StoreMetrics {
    written: IntCounterVec,
    reads: IntCounterVec,
    purged: IntCounterVec,
}

impl StoreMetrics {
    /// Register all store metrics with the provided registry.
    pub fn register(registry: &Registry) -> std::result::Result<Self, prometheus::Error> {
        let metrics = Self::unregistered()?;
        registry.register(Box::new(metrics.written.clone()))?;
        registry.register(Box::new(metrics.reads.clone()))?;
        registry.register(Box::new(metrics.purged.clone()))?;
        Ok(metrics)
    }

    /// Metrics that are recorded but not exported.
    pub fn unregistered() -> std::result::Result<Self, prometheus::Error> {
        Ok(Self {
            written: IntCounterVec::new(
                Opts::new(
                    "corelay_records_written_total",
                    "Correlation records upserted",
                ),
                &["backend"],
            )?,
            reads: IntCounterVec::new(
                Opts::new(
                    "corelay_record_reads_total",
                    "Correlation record lookups, by whether a record was found",
                ),
                &["backend", "hit"],
            )?,
            purged: IntCounterVec::new(
                Opts::new(
                    "corelay_records_purged_total",
                    "Correlation records removed by retention",
                ),
                &["backend"],
            )?,
        })
    }

    /// Record a successful write.
    pub fn record_written(&self, backend: &str) {
        self.written.with_label_values(&[backend]).inc();
    }

    /// Record a lookup.
    pub fn record_read(&self, backend: &str, hit: bool) {
        let hit = if hit { "true" } else { "false" };
        self.reads.with_label_values(&[backend, hit]).inc();
    }

    /// Record purged records.
    pub fn record_purged(&self, backend: &str, count: usize) {
        self.purged
            .with_label_values(&[backend])
            .inc_by(u64::try_from(count).unwrap_or(u64::MAX));
    }
}

impl std::fmt::Debug for StoreMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreMetrics").finish_non_exhaustive()
    }
}

/// Store decorator that records [`StoreMetrics`] around every call.
#[derive(Clone)]
pub struct MeteredStore {
    inner: Arc<dyn CorrelationStore>,
    metrics: StoreMetrics,
}

impl MeteredStore {
    /// Wrap `inner`.
    pub fn new(inner: Arc<dyn CorrelationStore>, metrics: StoreMetrics) -> Self {
        Self { inner, metrics }
    }
}

impl std::fmt::Debug for MeteredStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeteredStore")
            .field("backend", &self.inner.backend())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CorrelationStore for MeteredStore {
    async fn get(&self, request_id: &RequestId) -> Result<Option<CorrelationRecord>> {
        let record = self.inner.get(request_id).await?;
        self.metrics
            .record_read(self.inner.backend(), record.is_some());
        Ok(record)
    }

    async fn upsert(&self, record: CorrelationRecord) -> Result<()> {
        self.inner.upsert(record).await?;
        self.metrics.record_written(self.inner.backend());
        Ok(())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let removed = self.inner.purge_older_than(cutoff).await?;
        self.metrics.record_purged(self.inner.backend(), removed);
        Ok(removed)
    }

    fn backend(&self) -> &'static str {
        self.inner.backend()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryCorrelationStore;
    use corelay_msg::OperationResult;
    use serde_json::json;

    fn counter(registry: &Registry, name: &str) -> f64 {
        registry
            .gather()
            .iter()
            .filter(|family| family.get_name() == name)
            .flat_map(|family| family.get_metric().iter())
            .map(|metric| metric.get_counter().get_value())
            .sum()
    }

    #[tokio::test]
    async fn decorator_counts_reads_writes_and_purges() {
        let registry = Registry::new();
        let metrics = StoreMetrics::register(&registry).unwrap();
        let store = MeteredStore::new(Arc::new(InMemoryCorrelationStore::new()), metrics);

        let id = RequestId::from("r-1");
        assert!(store.get(&id).await.unwrap().is_none());
        store
            .upsert(CorrelationRecord::new(
                id.clone(),
                OperationResult::success(json!(1)),
            ))
            .await
            .unwrap();
        assert!(store.get(&id).await.unwrap().is_some());
        let removed = store
            .purge_older_than(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();

        assert_eq!(removed, 1);
        assert_eq!(store.backend(), "memory");
        assert_eq!(counter(&registry, "corelay_records_written_total"), 1.0);
        assert_eq!(counter(&registry, "corelay_record_reads_total"), 2.0);
        assert_eq!(counter(&registry, "corelay_records_purged_total"), 1.0);
    }
}
