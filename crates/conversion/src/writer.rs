//! Store writer: commits assembled timesteps with exactly-once visibility.
//!
//! Every write for a timestamp runs under that timestamp's lease, so two
//! writers never interleave check → stage → commit for the same coordinate.
//! Distinct timestamps proceed independently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sat_common::{coordinate_key, TimestepFrame};
use storage::{ChunkStore, CommitMode, StagedWrite};
use tracing::{info, instrument, warn};

use crate::config::OverwritePolicy;
use crate::error::{ConversionError, Result};

/// Handle to a record staged in a backend but not yet visible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedRecord {
    pub timestamp: DateTime<Utc>,
    pub coordinate: String,
    /// Backend-specific transaction id.
    pub transaction: String,
    pub bytes: u64,
}

/// A chunked, time-indexed store with stage-then-commit writes.
///
/// `commit` must make the staged record visible atomically. A failed commit
/// leaves the record staged; [`StoreWriter`] then discards it with `abort`.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    async fn exists(&self, timestamp: DateTime<Utc>) -> Result<bool>;

    async fn stage_write(&self, frame: TimestepFrame) -> Result<StagedRecord>;

    /// Fails with [`ConversionError::DuplicateTimestep`] under
    /// [`CommitMode::CreateOnly`] when a record is already committed.
    async fn commit(&self, staged: &StagedRecord, mode: CommitMode) -> Result<()>;

    async fn abort(&self, staged: StagedRecord) -> Result<()>;

    /// Publish a snapshot of the newest committed record. Returns its
    /// timestamp, or `None` when the backend has nothing to publish.
    async fn publish_latest(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(None)
    }
}

/// [`StoreBackend`] over [`storage::ChunkStore`].
pub struct ChunkStoreBackend {
    store: ChunkStore,
    staged: Mutex<HashMap<String, StagedWrite>>,
}

impl ChunkStoreBackend {
    pub fn new(store: ChunkStore) -> Self {
        Self {
            store,
            staged: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    fn take_staged(&self, staged: &StagedRecord) -> Result<StagedWrite> {
        self.staged
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&staged.transaction)
            .ok_or_else(|| {
                ConversionError::store_unavailable(format!(
                    "unknown staged transaction {} for {}",
                    staged.transaction, staged.coordinate
                ))
            })
    }
}

#[async_trait]
impl StoreBackend for ChunkStoreBackend {
    async fn exists(&self, timestamp: DateTime<Utc>) -> Result<bool> {
        Ok(self.store.exists(timestamp).await?)
    }

    async fn stage_write(&self, frame: TimestepFrame) -> Result<StagedRecord> {
        let staged = self.store.stage_write(frame).await?;
        let record = StagedRecord {
            timestamp: staged.timestamp(),
            coordinate: staged.coordinate().to_string(),
            transaction: staged.transaction().to_string(),
            bytes: staged.bytes(),
        };
        self.staged
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(record.transaction.clone(), staged);
        Ok(record)
    }

    async fn commit(&self, staged: &StagedRecord, mode: CommitMode) -> Result<()> {
        let write = self.take_staged(staged)?;
        match self.store.commit(&write, mode).await {
            Ok(_) => Ok(()),
            Err(e) => {
                // Still staged; keep it so abort can remove the objects
                self.staged
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .insert(staged.transaction.clone(), write);
                Err(e.into())
            }
        }
    }

    async fn abort(&self, staged: StagedRecord) -> Result<()> {
        let staged = self.take_staged(&staged)?;
        Ok(self.store.abort(staged).await?)
    }

    async fn publish_latest(&self) -> Result<Option<DateTime<Utc>>> {
        let receipt = self.store.publish_latest().await?;
        Ok(receipt.map(|r| r.timestamp))
    }
}

/// Result of a successful write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    pub timestamp: DateTime<Utc>,
    pub channels: Vec<String>,
    pub missing: Vec<String>,
    pub bytes: u64,
}

/// Serializes writes per timestamp and applies the overwrite policy.
pub struct StoreWriter {
    backend: Arc<dyn StoreBackend>,
    policy: OverwritePolicy,
    leases: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl StoreWriter {
    pub fn new(backend: Arc<dyn StoreBackend>, policy: OverwritePolicy) -> Self {
        Self {
            backend,
            policy,
            leases: Mutex::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> &Arc<dyn StoreBackend> {
        &self.backend
    }

    /// Commit one assembled timestep.
    ///
    /// Under the reject policy a pre-existing record fails with
    /// [`ConversionError::DuplicateTimestep`] before anything is staged.
    #[instrument(skip(self, frame), fields(coordinate = %coordinate_key(frame.timestamp())))]
    pub async fn write(&self, frame: TimestepFrame) -> Result<WriteOutcome> {
        let coordinate = coordinate_key(frame.timestamp());
        let lease = self.lease(&coordinate);
        let result = {
            let _guard = lease.lock().await;
            self.write_leased(frame, coordinate.clone()).await
        };
        self.release(&coordinate, lease);
        result
    }

    async fn write_leased(&self, frame: TimestepFrame, coordinate: String) -> Result<WriteOutcome> {
        let timestamp = frame.timestamp();

        let mode = match self.policy {
            OverwritePolicy::Reject => {
                if self.backend.exists(timestamp).await? {
                    return Err(ConversionError::DuplicateTimestep(coordinate));
                }
                CommitMode::CreateOnly
            }
            OverwritePolicy::Overwrite => CommitMode::Overwrite,
        };

        let channels: Vec<String> = frame.channels().keys().cloned().collect();
        let missing = frame.missing().to_vec();

        let staged = self.backend.stage_write(frame).await?;
        let bytes = staged.bytes;
        if let Err(e) = self.backend.commit(&staged, mode).await {
            warn!(error = %e, "Commit failed, discarding staged record");
            if let Err(abort) = self.backend.abort(staged).await {
                warn!(error = %abort, "Failed to discard staged record");
            }
            return Err(e);
        }

        info!(
            channels = channels.len(),
            missing = missing.len(),
            bytes,
            "Timestep committed"
        );

        Ok(WriteOutcome {
            timestamp,
            channels,
            missing,
            bytes,
        })
    }

    fn lease(&self, coordinate: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.leases
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(coordinate.to_string())
            .or_default()
            .clone()
    }

    /// Drop the lease entry once no other writer holds or awaits it.
    fn release(&self, coordinate: &str, lease: Arc<tokio::sync::Mutex<()>>) {
        let mut leases = self
            .leases
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // The map's reference plus ours
        if Arc::strong_count(&lease) == 2 {
            leases.remove(coordinate);
        }
    }

    /// Number of coordinates with a live lease.
    pub fn active_leases(&self) -> usize {
        self.leases
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}
