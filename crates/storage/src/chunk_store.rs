//! Time-indexed record store with stage-then-commit writes.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use grid_processor::{GridProcessorConfig, ZarrRecordReader, ZarrWriter};
use sat_common::{coordinate_key, parse_coordinate_key, GridDefinition, TimestepFrame};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use zarrs_filesystem::FilesystemStore;

use crate::error::{Result, StorageError};
use crate::manifest::{
    data_prefix, index_path, RecordManifest, StoreMetadata, STORE_FORMAT_VERSION,
};
use crate::object_store::{CreateOutcome, ObjectStorage};
use crate::snapshot::{pack_zip, SnapshotReceipt, LATEST_SNAPSHOT_PATH};
use crate::target::StoreTarget;
use crate::upload::{download_objects, fetch_verified, upload_directory};

const STORE_METADATA_PATH: &str = "store.json";

/// How a commit treats an already committed record at the same timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// Fail with [`StorageError::AlreadyCommitted`].
    CreateOnly,
    /// Replace the existing record in one pointer swap.
    Overwrite,
}

/// A record uploaded under its own transaction prefix but not yet visible.
#[derive(Debug)]
pub struct StagedWrite {
    manifest: RecordManifest,
    prefix: String,
}

impl StagedWrite {
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.manifest.timestamp
    }

    pub fn coordinate(&self) -> &str {
        &self.manifest.coordinate
    }

    pub fn transaction(&self) -> &str {
        &self.manifest.transaction
    }

    pub fn manifest(&self) -> &RecordManifest {
        &self.manifest
    }

    pub fn bytes(&self) -> u64 {
        self.manifest.total_bytes()
    }
}

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitReceipt {
    pub timestamp: DateTime<Utc>,
    pub coordinate: String,
    pub transaction: String,
    pub bytes_written: u64,
    /// Transaction of the record this commit replaced, if any.
    pub replaced: Option<String>,
}

/// The persistent, chunked record store.
///
/// Every record shares the grid fixed in `store.json`. Chunks follow the
/// grid's tile shape.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    storage: ObjectStorage,
    grid: GridDefinition,
    zarr: GridProcessorConfig,
}

impl ChunkStore {
    /// Connect to `target` and open (or create) the store for `grid`.
    pub async fn open(
        target: &StoreTarget,
        grid: GridDefinition,
        zarr: GridProcessorConfig,
    ) -> Result<Self> {
        let storage = target.connect()?;
        Self::open_with(storage, grid, zarr).await
    }

    /// Open the store on an already connected backend.
    ///
    /// Fails with [`StorageError::GridMismatch`] if the store was created for
    /// a different grid.
    #[instrument(skip_all, fields(store = %storage.label()))]
    pub async fn open_with(
        storage: ObjectStorage,
        grid: GridDefinition,
        zarr: GridProcessorConfig,
    ) -> Result<Self> {
        grid.validate()
            .map_err(|e| StorageError::InvalidTarget(e.to_string()))?;
        zarr.validate().map_err(StorageError::InvalidTarget)?;

        let existing = match storage.get_opt(STORE_METADATA_PATH).await? {
            Some(bytes) => Some(parse_store_metadata(&bytes)?),
            None => {
                let metadata = StoreMetadata {
                    format_version: STORE_FORMAT_VERSION,
                    grid: grid.clone(),
                    created_at: Utc::now(),
                };
                let body = serde_json::to_vec_pretty(&metadata)
                    .map_err(|e| StorageError::Encoding(e.to_string()))?;
                match storage
                    .put_if_absent(STORE_METADATA_PATH, Bytes::from(body))
                    .await?
                {
                    CreateOutcome::Created => {
                        info!(projection = grid.projection.identifier(), rows = grid.rows, cols = grid.cols, "Created record store");
                        None
                    }
                    // Lost a creation race; check against the winner
                    CreateOutcome::AlreadyExists => {
                        let bytes = storage.get(STORE_METADATA_PATH).await?;
                        Some(parse_store_metadata(&bytes)?)
                    }
                }
            }
        };

        if let Some(metadata) = existing {
            if metadata.format_version != STORE_FORMAT_VERSION {
                return Err(StorageError::Corrupt(format!(
                    "unsupported store format version {}",
                    metadata.format_version
                )));
            }
            if metadata.grid != grid {
                return Err(StorageError::GridMismatch(format!(
                    "store holds {} {}x{} grid, run requested {} {}x{}",
                    metadata.grid.projection.identifier(),
                    metadata.grid.rows,
                    metadata.grid.cols,
                    grid.projection.identifier(),
                    grid.rows,
                    grid.cols
                )));
            }
        }

        Ok(Self {
            storage,
            grid,
            zarr,
        })
    }

    pub fn grid(&self) -> &GridDefinition {
        &self.grid
    }

    pub fn storage(&self) -> &ObjectStorage {
        &self.storage
    }

    /// Encode a timestep and upload it under a fresh transaction prefix.
    ///
    /// Nothing becomes visible to readers until [`ChunkStore::commit`].
    #[instrument(skip_all, fields(coordinate = %coordinate_key(frame.timestamp())))]
    pub async fn stage_write(&self, frame: TimestepFrame) -> Result<StagedWrite> {
        for channel in frame.channels().values() {
            if channel.shape() != self.grid.shape() {
                return Err(StorageError::Encoding(format!(
                    "channel {} is {:?}, grid is {:?}",
                    channel.channel(),
                    channel.shape(),
                    self.grid.shape()
                )));
            }
        }

        let coordinate = coordinate_key(frame.timestamp());
        let transaction = Uuid::new_v4().simple().to_string();
        let prefix = data_prefix(&coordinate, &transaction);

        let scratch = tempfile::tempdir()?;
        let scratch_path = scratch.path().to_path_buf();
        let writer = ZarrWriter::new(self.zarr.clone());
        let grid = self.grid.clone();

        let written = tokio::task::spawn_blocking(move || -> Result<_> {
            let store = FilesystemStore::new(&scratch_path)
                .map_err(|e| StorageError::Encoding(e.to_string()))?;
            writer
                .write_record(store, &grid, &frame)
                .map_err(StorageError::from)
        })
        .await
        .map_err(|e| StorageError::Encoding(format!("encoder task failed: {}", e)))??;

        let objects = match upload_directory(&self.storage, scratch.path(), &prefix).await {
            Ok(objects) => objects,
            Err(e) => {
                self.cleanup_prefix(&prefix).await;
                return Err(e);
            }
        };

        let attributes = written.attributes;
        let manifest = RecordManifest {
            format_version: STORE_FORMAT_VERSION,
            coordinate,
            timestamp: attributes.timestamp,
            transaction,
            channels: attributes.channels,
            missing: attributes.missing_channels,
            objects,
            provenance: attributes.provenance,
            committed_at: None,
        };

        debug!(
            transaction = %manifest.transaction,
            objects = manifest.objects.len(),
            bytes = manifest.total_bytes(),
            "Staged record"
        );

        Ok(StagedWrite { manifest, prefix })
    }

    /// Make a staged record visible with a single pointer write.
    ///
    /// On failure nothing changes for readers and the staged objects stay in
    /// place; the caller discards them with [`ChunkStore::abort`].
    #[instrument(skip_all, fields(coordinate = %staged.coordinate(), transaction = %staged.transaction()))]
    pub async fn commit(&self, staged: &StagedWrite, mode: CommitMode) -> Result<CommitReceipt> {
        let mut manifest = staged.manifest.clone();
        manifest.committed_at = Some(Utc::now());
        let body = serde_json::to_vec_pretty(&manifest)
            .map(Bytes::from)
            .map_err(|e| StorageError::Encoding(e.to_string()))?;
        let pointer = index_path(&manifest.coordinate);

        let replaced = match mode {
            CommitMode::CreateOnly => match self.storage.put_if_absent(&pointer, body).await? {
                CreateOutcome::Created => None,
                CreateOutcome::AlreadyExists => {
                    return Err(StorageError::AlreadyCommitted(manifest.coordinate));
                }
            },
            CommitMode::Overwrite => {
                let previous = self.manifest(manifest.timestamp).await?;
                self.storage.put(&pointer, body).await?;
                match previous {
                    Some(previous) if previous.transaction != manifest.transaction => {
                        self.cleanup_prefix(&data_prefix(
                            &previous.coordinate,
                            &previous.transaction,
                        ))
                        .await;
                        Some(previous.transaction)
                    }
                    _ => None,
                }
            }
        };

        info!(
            bytes = manifest.total_bytes(),
            channels = manifest.channels.len(),
            replaced = replaced.is_some(),
            "Committed record"
        );

        Ok(CommitReceipt {
            timestamp: manifest.timestamp,
            bytes_written: manifest.total_bytes(),
            coordinate: manifest.coordinate,
            transaction: manifest.transaction,
            replaced,
        })
    }

    /// Discard a staged record.
    pub async fn abort(&self, staged: StagedWrite) -> Result<()> {
        let removed = self.storage.delete_prefix(&staged.prefix).await?;
        debug!(coordinate = %staged.coordinate(), removed, "Aborted staged record");
        Ok(())
    }

    /// Whether a record is committed at `timestamp`.
    pub async fn exists(&self, timestamp: DateTime<Utc>) -> Result<bool> {
        self.storage
            .exists(&index_path(&coordinate_key(timestamp)))
            .await
    }

    /// The committed manifest at `timestamp`, if any.
    pub async fn manifest(&self, timestamp: DateTime<Utc>) -> Result<Option<RecordManifest>> {
        let path = index_path(&coordinate_key(timestamp));
        match self.storage.get_opt(&path).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StorageError::Corrupt(format!("{}: {}", path, e))),
            None => Ok(None),
        }
    }

    /// Read one channel of a committed record as a row-major grid.
    pub async fn read_channel(&self, timestamp: DateTime<Utc>, channel: &str) -> Result<Vec<f32>> {
        let coordinate = coordinate_key(timestamp);
        let manifest = self
            .manifest(timestamp)
            .await?
            .ok_or_else(|| StorageError::NotFound(coordinate.clone()))?;
        if !manifest.channels.iter().any(|c| c == channel) {
            return Err(StorageError::NotFound(format!("{}/{}", coordinate, channel)));
        }

        let scratch = tempfile::tempdir()?;
        let prefix = data_prefix(&manifest.coordinate, &manifest.transaction);
        download_objects(
            &self.storage,
            &prefix,
            manifest.channel_objects(channel),
            scratch.path(),
        )
        .await?;

        let channel = channel.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<f32>> {
            let store = FilesystemStore::new(scratch.path())
                .map_err(|e| StorageError::Encoding(e.to_string()))?;
            let reader = ZarrRecordReader::open(store)?;
            Ok(reader.read_channel(&channel)?)
        })
        .await
        .map_err(|e| StorageError::Encoding(format!("decoder task failed: {}", e)))?
    }

    /// Timestamps of all committed records, ascending.
    pub async fn list_committed(&self) -> Result<Vec<DateTime<Utc>>> {
        let mut timestamps: Vec<_> = self
            .storage
            .list("index")
            .await?
            .iter()
            .filter_map(|meta| {
                let name = meta.location.filename()?;
                parse_coordinate_key(name.strip_suffix(".json")?)
            })
            .collect();
        timestamps.sort();
        Ok(timestamps)
    }

    /// Publish the newest committed record as a zip archive at
    /// [`LATEST_SNAPSHOT_PATH`], replacing the previous snapshot.
    ///
    /// Returns `None` when nothing is committed yet.
    #[instrument(skip_all, fields(store = %self.storage.label()))]
    pub async fn publish_latest(&self) -> Result<Option<SnapshotReceipt>> {
        let Some(latest) = self.list_committed().await?.pop() else {
            return Ok(None);
        };
        // A concurrent overwrite may have swapped the record since listing
        let manifest = self
            .manifest(latest)
            .await?
            .ok_or_else(|| StorageError::NotFound(coordinate_key(latest)))?;

        let prefix = data_prefix(&manifest.coordinate, &manifest.transaction);
        let mut entries = Vec::with_capacity(manifest.objects.len());
        for object in &manifest.objects {
            let data = fetch_verified(&self.storage, &prefix, object).await?;
            entries.push((object.path.clone(), data));
        }

        let archive = tokio::task::spawn_blocking(move || pack_zip(&entries))
            .await
            .map_err(|e| StorageError::Encoding(format!("snapshot task failed: {}", e)))??;
        let bytes = archive.len() as u64;
        self.storage
            .put(LATEST_SNAPSHOT_PATH, Bytes::from(archive))
            .await?;

        info!(coordinate = %manifest.coordinate, bytes, "Published latest snapshot");
        Ok(Some(SnapshotReceipt {
            timestamp: manifest.timestamp,
            entries: manifest.objects.len(),
            coordinate: manifest.coordinate,
            transaction: manifest.transaction,
            bytes,
        }))
    }

    async fn cleanup_prefix(&self, prefix: &str) {
        if let Err(e) = self.storage.delete_prefix(prefix).await {
            warn!(prefix, error = %e, "Failed to remove record objects");
        }
    }
}

fn parse_store_metadata(bytes: &[u8]) -> Result<StoreMetadata> {
    serde_json::from_slice(bytes)
        .map_err(|e| StorageError::Corrupt(format!("{}: {}", STORE_METADATA_PATH, e)))
}
