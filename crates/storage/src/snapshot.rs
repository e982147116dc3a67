//! Zip snapshot of the newest committed record.
//!
//! Consumers that only want "the latest image" download one object instead
//! of resolving the index. The archive holds the record's Zarr group with
//! paths relative to the group root, so it unpacks to a readable record.

use std::io::{Cursor, Write};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{Result, StorageError};

/// Object the snapshot is published to, at the store root.
pub const LATEST_SNAPSHOT_PATH: &str = "latest.zarr.zip";

/// What a published snapshot contains.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotReceipt {
    pub timestamp: DateTime<Utc>,
    pub coordinate: String,
    pub transaction: String,
    pub entries: usize,
    pub bytes: u64,
}

/// Pack `(path, data)` entries into an uncompressed zip archive.
///
/// Chunks are already compressed by the Zarr codec chain.
pub fn pack_zip(entries: &[(String, Bytes)]) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Stored);

    for (path, data) in entries {
        zip.start_file(path.as_str(), options)
            .map_err(|e| StorageError::Encoding(format!("zip entry {}: {}", path, e)))?;
        zip.write_all(data)?;
    }

    let cursor = zip
        .finish()
        .map_err(|e| StorageError::Encoding(format!("zip finish: {}", e)))?;
    Ok(cursor.into_inner())
}
