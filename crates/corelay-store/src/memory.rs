//! ---
//! corelay_section: "03-correlation-store"
//! corelay_subsection: "module"
//! corelay_type: "source"
//! corelay_scope: "code"
//! corelay_description: "In-process correlation store."
//! corelay_version: "v0.1.0"
//! corelay_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use corelay_msg::RequestId;
use parking_lot::RwLock;

use crate::{CorrelationRecord, CorrelationStore, Result, StoreError};

/// Correlation store held in a process-local map.
///
/// `set_unavailable` and `fail_next_writes` simulate backend outages.
#[derive(Debug, Default)]
pub struct InMemoryCorrelationStore {
    records: RwLock<HashMap<RequestId, CorrelationRecord>>,
    unavailable: AtomicBool,
    failing_writes: AtomicU32,
}

impl InMemoryCorrelationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Fail every operation with [`StoreError::Unavailable`] while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail the next `count` upserts, then recover.
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CorrelationStore for InMemoryCorrelationStore {
    async fn get(&self, request_id: &RequestId) -> Result<Option<CorrelationRecord>> {
        self.check_available()?;
        Ok(self.records.read().get(request_id).cloned())
    }

    async fn upsert(&self, record: CorrelationRecord) -> Result<()> {
        self.check_available()?;
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable("injected write failure".into()));
        }
        self.records
            .write()
            .insert(record.request_id.clone(), record);
        Ok(())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.check_available()?;
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, record| record.timestamp >= cutoff);
        Ok(before - records.len())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
