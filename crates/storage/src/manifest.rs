//! Metadata documents kept next to the record data.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sat_common::{ChannelProvenance, GridDefinition};
use serde::{Deserialize, Serialize};

/// Version of the on-store layout written by this crate.
pub const STORE_FORMAT_VERSION: u32 = 1;

/// Contents of `store.json`, written once when the store is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreMetadata {
    pub format_version: u32,
    pub grid: GridDefinition,
    pub created_at: DateTime<Utc>,
}

/// One staged object belonging to a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectEntry {
    /// Path relative to the transaction prefix, e.g. `IR_108/c/0/1`.
    pub path: String,
    pub size: u64,
    pub crc32: u32,
}

/// Commit pointer for one timestamp, stored at `index/{coordinate}.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordManifest {
    pub format_version: u32,
    pub coordinate: String,
    pub timestamp: DateTime<Utc>,
    /// Transaction whose data prefix this pointer makes visible.
    pub transaction: String,
    pub channels: Vec<String>,
    #[serde(default)]
    pub missing: Vec<String>,
    pub objects: Vec<ObjectEntry>,
    pub provenance: BTreeMap<String, ChannelProvenance>,
    /// Set when the pointer is written.
    #[serde(default)]
    pub committed_at: Option<DateTime<Utc>>,
}

impl RecordManifest {
    /// Total size of the record's objects in bytes.
    pub fn total_bytes(&self) -> u64 {
        self.objects.iter().map(|o| o.size).sum()
    }

    /// Objects needed to read one channel: the group and array metadata
    /// plus the channel's chunks.
    pub fn channel_objects<'a>(&'a self, channel: &'a str) -> impl Iterator<Item = &'a ObjectEntry> {
        self.objects.iter().filter(move |o| {
            o.path == "zarr.json"
                || o.path
                    .strip_prefix(channel)
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}

pub(crate) fn index_path(coordinate: &str) -> String {
    format!("index/{}.json", coordinate)
}

pub(crate) fn data_prefix(coordinate: &str, transaction: &str) -> String {
    format!("data/{}/{}", coordinate, transaction)
}
