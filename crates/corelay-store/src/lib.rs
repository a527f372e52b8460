//! ---
//! corelay_section: "03-correlation-store"
//! corelay_subsection: "module"
//! corelay_type: "source"
//! corelay_scope: "code"
//! corelay_description: "Correlation store abstraction and storage backends."
//! corelay_version: "v0.1.0"
//! corelay_owner: "tbd"
//! ---
#![warn(missing_docs)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use corelay_common::{StoreBackend, StoreConfig};
use corelay_msg::RequestId;

/// Result alias used throughout the store crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Error type for correlation store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Wrapper for IO errors encountered while reading/writing record files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// The request id cannot be used as a storage key.
    #[error("invalid record key '{0}'")]
    InvalidKey(String),
    /// The backend is temporarily unable to serve requests.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, StoreError::InvalidKey(_))
    }
}

pub mod file;
pub mod memory;
pub mod metrics;
pub mod record;
pub mod sweeper;

pub use file::FileCorrelationStore;
pub use memory::InMemoryCorrelationStore;
pub use metrics::{MeteredStore, StoreMetrics};
pub use record::CorrelationRecord;
pub use sweeper::RetentionSweeper;

/// Keyed storage for correlation records.
///
/// Writers upsert by request id; readers never remove or modify records. Removal happens
/// only through [`CorrelationStore::purge_older_than`].
#[async_trait]
pub trait CorrelationStore: Send + Sync {
    /// Fetch the record for `request_id`, if one has been written.
    async fn get(&self, request_id: &RequestId) -> Result<Option<CorrelationRecord>>;

    /// Insert or overwrite the record keyed by its request id.
    async fn upsert(&self, record: CorrelationRecord) -> Result<()>;

    /// Remove every record stored strictly before `cutoff`, returning how many were removed.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Short backend label for logs and metrics.
    fn backend(&self) -> &'static str;
}

#[async_trait]
impl<S: CorrelationStore + ?Sized> CorrelationStore for Arc<S> {
    async fn get(&self, request_id: &RequestId) -> Result<Option<CorrelationRecord>> {
        (**self).get(request_id).await
    }

    async fn upsert(&self, record: CorrelationRecord) -> Result<()> {
        (**self).upsert(record).await
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        (**self).purge_older_than(cutoff).await
    }

    fn backend(&self) -> &'static str {
        (**self).backend()
    }
}

/// Open the backend selected by configuration.
pub async fn open(config: &StoreConfig) -> Result<Arc<dyn CorrelationStore>> {
    let store: Arc<dyn CorrelationStore> = match config.backend {
        StoreBackend::Memory => Arc::new(InMemoryCorrelationStore::new()),
        StoreBackend::File => Arc::new(FileCorrelationStore::open(&config.directory).await?),
    };
    tracing::info!(backend = store.backend(), "correlation store opened");
    Ok(store)
}
