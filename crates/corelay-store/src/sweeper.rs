//! ---
//! corelay_section: "03-correlation-store"
//! corelay_subsection: "module"
//! corelay_type: "source"
//! corelay_scope: "code"
//! corelay_description: "Scheduled retention cleanup for correlation records."
//! corelay_version: "v0.1.0"
//! corelay_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use corelay_common::time::duration_to_millis;
use corelay_common::StoreConfig;
use corelay_msg::shutdown_requested;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::{CorrelationStore, Result};

/// Periodically purges records older than the retention window.
///
/// Submitters only read; this is the single path by which records leave the store.
#[derive(Clone)]
pub struct RetentionSweeper {
    store: Arc<dyn CorrelationStore>,
    retention: Duration,
    interval: Duration,
}

impl RetentionSweeper {
    /// Build a sweeper. A zero `retention` disables purging.
    pub fn new(store: Arc<dyn CorrelationStore>, retention: Duration, interval: Duration) -> Self {
        Self {
            store,
            retention,
            interval,
        }
    }

    /// Build a sweeper from the store configuration block.
    pub fn from_config(store: Arc<dyn CorrelationStore>, config: &StoreConfig) -> Self {
        Self::new(store, config.retention, config.sweep_interval)
    }

    /// Whether the sweeper has anything to do.
    pub fn is_enabled(&self) -> bool {
        !self.retention.is_zero() && !self.interval.is_zero()
    }

    /// Oldest timestamp a record may carry at `now` and survive.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - ChronoDuration::milliseconds(duration_to_millis(self.retention))
    }

    /// Purge expired records immediately.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<usize> {
        if !self.is_enabled() {
            return Ok(0);
        }
        let removed = self.store.purge_older_than(self.cutoff(now)).await?;
        if removed > 0 {
            info!(backend = self.store.backend(), removed, "expired correlation records purged");
        } else {
            debug!(backend = self.store.backend(), "retention sweep found nothing to purge");
        }
        Ok(removed)
    }

    /// Sweep on a fixed interval until shutdown.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            if !self.is_enabled() {
                debug!("retention sweeper disabled");
                return;
            }
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_requested(&mut shutdown) => break,
                    _ = ticker.tick() => {
                        if let Err(err) = self.sweep_once(Utc::now()).await {
                            warn!(error = %err, "retention sweep failed");
                        }
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for RetentionSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionSweeper")
            .field("backend", &self.store.backend())
            .field("retention", &self.retention)
            .field("interval", &self.interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CorrelationRecord, InMemoryCorrelationStore};
    use corelay_msg::{OperationResult, RequestId};
    use serde_json::json;

    async fn seeded(now: DateTime<Utc>) -> Arc<InMemoryCorrelationStore> {
        let store = Arc::new(InMemoryCorrelationStore::new());
        for (id, age_hours) in [("a", 1), ("b", 25), ("c", 48)] {
            store
                .upsert(CorrelationRecord::at(
                    RequestId::from(id),
                    OperationResult::success(json!(id)),
                    now - ChronoDuration::hours(age_hours),
                ))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn sweep_removes_records_past_retention() {
        let now = Utc::now();
        let store = seeded(now).await;
        let sweeper = RetentionSweeper::new(
            store.clone(),
            Duration::from_secs(24 * 3600),
            Duration::from_secs(300),
        );
        assert_eq!(sweeper.sweep_once(now).await.unwrap(), 2);
        assert_eq!(store.len(), 1);
        assert!(store.get(&RequestId::from("a")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn zero_retention_keeps_everything() {
        let now = Utc::now();
        let store = seeded(now).await;
        let sweeper = RetentionSweeper::new(store.clone(), Duration::ZERO, Duration::from_secs(1));
        assert!(!sweeper.is_enabled());
        assert_eq!(sweeper.sweep_once(now).await.unwrap(), 0);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn background_sweeper_runs_until_shutdown() {
        let now = Utc::now();
        let store = seeded(now).await;
        let sweeper = RetentionSweeper::new(
            store.clone(),
            Duration::from_secs(24 * 3600),
            Duration::from_secs(60),
        );
        let (stop, shutdown) = watch::channel(false);
        let task = sweeper.spawn(shutdown);

        // first tick fires immediately
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.len(), 1);

        stop.send(true).unwrap();
        task.await.unwrap();
    }
}
