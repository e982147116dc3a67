//! Moving encoded records between a scratch directory and the object store.

use std::path::Path;

use bytes::Bytes;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Result, StorageError};
use crate::manifest::ObjectEntry;
use crate::object_store::ObjectStorage;

/// Upload every file under `local_dir` to `prefix`, preserving relative paths.
///
/// Returns one entry per uploaded object, sorted by path.
pub async fn upload_directory(
    storage: &ObjectStorage,
    local_dir: &Path,
    prefix: &str,
) -> Result<Vec<ObjectEntry>> {
    let mut entries = Vec::new();

    for entry in WalkDir::new(local_dir) {
        let entry = entry.map_err(|e| {
            StorageError::unavailable(format!("Failed to walk {}: {}", local_dir.display(), e))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let rel_path = entry.path().strip_prefix(local_dir).map_err(|e| {
            StorageError::unavailable(format!("Failed to get relative path: {}", e))
        })?;
        let rel = rel_path
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let data = tokio::fs::read(entry.path()).await?;
        let size = data.len() as u64;
        let crc32 = crc32fast::hash(&data);

        let object_path = format!("{}/{}", prefix, rel);
        storage.put(&object_path, Bytes::from(data)).await?;
        debug!(path = %object_path, size, "Uploaded record object");

        entries.push(ObjectEntry {
            path: rel,
            size,
            crc32,
        });
    }

    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

/// Read one object from `prefix`, checking it against its recorded size and
/// checksum.
pub async fn fetch_verified(
    storage: &ObjectStorage,
    prefix: &str,
    object: &ObjectEntry,
) -> Result<Bytes> {
    let data = storage.get(&format!("{}/{}", prefix, object.path)).await?;
    if data.len() as u64 != object.size || crc32fast::hash(&data) != object.crc32 {
        return Err(StorageError::Corrupt(format!(
            "{}/{} does not match its manifest entry",
            prefix, object.path
        )));
    }
    Ok(data)
}

/// Download the given objects from `prefix` into `local_dir`, checking each
/// against its recorded size and checksum.
pub async fn download_objects<'a>(
    storage: &ObjectStorage,
    prefix: &str,
    objects: impl IntoIterator<Item = &'a ObjectEntry>,
    local_dir: &Path,
) -> Result<u64> {
    let mut total = 0u64;

    for object in objects {
        let data = fetch_verified(storage, prefix, object).await?;

        let local = local_dir.join(&object.path);
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&local, &data).await?;
        total += object.size;
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use object_store::memory::InMemory;

    use super::*;

    fn memory_storage() -> ObjectStorage {
        ObjectStorage::new(Arc::new(InMemory::new()), "memory://")
    }

    #[tokio::test]
    async fn test_upload_directory_preserves_layout() {
        let storage = memory_storage();
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("IR_108/c/0")).unwrap();
        std::fs::write(dir.path().join("zarr.json"), b"{}").unwrap();
        std::fs::write(dir.path().join("IR_108/c/0/0"), b"chunk").unwrap();

        let entries = upload_directory(&storage, dir.path(), "data/x/txn").await.unwrap();
        let paths: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["IR_108/c/0/0", "zarr.json"]);
        assert_eq!(entries[0].crc32, crc32fast::hash(b"chunk"));
        assert_eq!(storage.get("data/x/txn/IR_108/c/0/0").await.unwrap().as_ref(), b"chunk");
    }

    #[tokio::test]
    async fn test_upload_directory_reports_walk_errors() {
        let storage = memory_storage();
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("never-written");

        let err = upload_directory(&storage, &missing, "data/x/txn").await.unwrap_err();
        assert!(err.to_string().contains("never-written"));
        assert!(storage.list("data").await.unwrap().is_empty());
    }
}
