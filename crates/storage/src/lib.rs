//! Persistent record store for converted timesteps.
//!
//! Records are keyed by nominal timestamp and laid out as:
//!
//! ```text
//! store.json                               grid definition, fixed for the store's lifetime
//! index/{YYYYmmddTHHMMSSZ}.json            commit pointer (record manifest)
//! data/{YYYYmmddTHHMMSSZ}/{txn}/zarr.json  staged Zarr group
//! data/{YYYYmmddTHHMMSSZ}/{txn}/{channel}/ channel arrays, chunked by grid tile
//! latest.zarr.zip                          zip of the newest committed record
//! ```
//!
//! Writers stage a record under a fresh transaction prefix and make it
//! visible with a single pointer write. Readers only ever resolve records
//! through `index/`, so a staged but uncommitted transaction is invisible.

pub mod chunk_store;
pub mod error;
pub mod manifest;
pub mod object_store;
pub mod snapshot;
pub mod target;
pub mod upload;

pub use self::object_store::ObjectStorage;
pub use chunk_store::{ChunkStore, CommitMode, CommitReceipt, StagedWrite};
pub use error::{Result, StorageError};
pub use snapshot::{SnapshotReceipt, LATEST_SNAPSHOT_PATH};
pub use manifest::{ObjectEntry, RecordManifest, StoreMetadata, STORE_FORMAT_VERSION};
pub use target::StoreTarget;
