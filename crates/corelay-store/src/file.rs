//! ---
//! corelay_section: "03-correlation-store"
//! corelay_subsection: "module"
//! corelay_type: "source"
//! corelay_scope: "code"
//! corelay_description: "Directory-backed correlation store, one JSON file per record."
//! corelay_version: "v0.1.0"
//! corelay_owner: "tbd"
//! ---
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use corelay_msg::RequestId;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{CorrelationRecord, CorrelationStore, Result, StoreError};

const RECORD_EXTENSION: &str = "json";
const MAX_KEY_LEN: usize = 128;

/// Stores each record as `<requestId>.json` inside a directory.
///
/// Writes go to a temporary file that is renamed over the target, so a reader sees
/// either the previous record or the new one.
#[derive(Debug, Clone)]
pub struct FileCorrelationStore {
    root: PathBuf,
}

impl FileCorrelationStore {
    /// Open (creating if needed) the record directory.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Directory holding the record files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, request_id: &RequestId) -> Result<PathBuf> {
        validate_key(request_id.as_str())?;
        Ok(self
            .root
            .join(format!("{}.{RECORD_EXTENSION}", request_id.as_str())))
    }
}

/// Keys become file names, so only a conservative character set is accepted.
fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && !key.starts_with('.')
        && key
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_owned()))
    }
}

#[async_trait]
impl CorrelationStore for FileCorrelationStore {
    async fn get(&self, request_id: &RequestId) -> Result<Option<CorrelationRecord>> {
        let path = self.record_path(request_id)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn upsert(&self, record: CorrelationRecord) -> Result<()> {
        let path = self.record_path(&record.request_id)?;
        let bytes = serde_json::to_vec(&record)?;
        let staging = self.root.join(format!(".{}.{}.tmp", record.request_id, Uuid::new_v4()));
        fs::write(&staging, &bytes).await?;
        if let Err(err) = fs::rename(&staging, &path).await {
            let _ = fs::remove_file(&staging).await;
            return Err(err.into());
        }
        debug!(path = %path.display(), "correlation record written");
        Ok(())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            let record: CorrelationRecord = match fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice(&bytes) {
                    Ok(record) => record,
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "skipping unreadable record");
                        continue;
                    }
                },
                // raced with another purge
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            if record.timestamp < cutoff {
                match fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(err) if err.kind() == ErrorKind::NotFound => {}
                    Err(err) => return Err(err.into()),
                }
            }
        }
        Ok(removed)
    }

    fn backend(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use corelay_msg::{FailureKind, OperationResult};
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = FileCorrelationStore::open(dir.path().join("records"))
            .await
            .unwrap();
        let record = CorrelationRecord::new(
            RequestId::from("3f2c-11"),
            OperationResult::failure(FailureKind::EngineError, "boom"),
        );
        store.upsert(record.clone()).await.unwrap();
        store.upsert(record.clone()).await.unwrap();

        assert_eq!(store.get(&record.request_id).await.unwrap(), Some(record));
        let files = std::fs::read_dir(store.root()).unwrap().count();
        assert_eq!(files, 1, "no staging files left behind");
    }

    #[tokio::test]
    async fn missing_record_is_none() {
        let dir = tempdir().unwrap();
        let store = FileCorrelationStore::open(dir.path()).await.unwrap();
        assert!(store.get(&RequestId::from("absent")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn path_like_keys_are_rejected() {
        let dir = tempdir().unwrap();
        let store = FileCorrelationStore::open(dir.path()).await.unwrap();
        for key in ["../escape", "a/b", ".hidden", ""] {
            let err = store
                .upsert(CorrelationRecord::new(
                    RequestId::from(key),
                    OperationResult::success(json!(null)),
                ))
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::InvalidKey(_)), "{key}");
            assert!(!err.is_transient());
        }
    }

    #[tokio::test]
    async fn purge_uses_record_timestamps() {
        let dir = tempdir().unwrap();
        let store = FileCorrelationStore::open(dir.path()).await.unwrap();
        let now = Utc::now();
        for (id, age) in [("old", Duration::days(2)), ("fresh", Duration::minutes(1))] {
            store
                .upsert(CorrelationRecord::at(
                    RequestId::from(id),
                    OperationResult::success(json!({})),
                    now - age,
                ))
                .await
                .unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let removed = store.purge_older_than(now - Duration::days(1)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get(&RequestId::from("old")).await.unwrap().is_none());
        assert!(store.get(&RequestId::from("fresh")).await.unwrap().is_some());
        assert!(dir.path().join("notes.txt").exists());
    }
}
