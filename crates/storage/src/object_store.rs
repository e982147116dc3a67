//! Thin wrapper over an `object_store` backend (local disk, S3, memory).

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::{path::Path, ObjectMeta, ObjectStore, PutMode, PutOptions};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::error::{Result, StorageError};

/// Outcome of a create-only write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Object storage client used by the record store.
#[derive(Clone)]
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    label: String,
}

impl std::fmt::Debug for ObjectStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStorage")
            .field("label", &self.label)
            .finish()
    }
}

impl ObjectStorage {
    /// Wrap an existing backend. `label` only appears in logs and errors.
    pub fn new(store: Arc<dyn ObjectStore>, label: impl Into<String>) -> Self {
        Self {
            store,
            label: label.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Write bytes to a path, replacing any existing object.
    #[instrument(skip(self, data), fields(store = %self.label, path = %path))]
    pub async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        let location = Path::from(path);
        debug!(size = data.len(), "Writing object");

        self.store
            .put(&location, data)
            .await
            .map_err(|e| StorageError::unavailable(format!("Failed to write {}: {}", path, e)))?;

        Ok(())
    }

    /// Write bytes only if nothing exists at the path yet.
    ///
    /// Uses the backend's conditional put. Backends without one (S3 unless
    /// `AWS_CONDITIONAL_PUT` is configured) fall back to head-then-put. That
    /// fallback is exclusive only among writers in this process, where the
    /// store writer's per-timestamp lease serializes them; two processes
    /// racing on the same path can both report `Created`.
    #[instrument(skip(self, data), fields(store = %self.label, path = %path))]
    pub async fn put_if_absent(&self, path: &str, data: Bytes) -> Result<CreateOutcome> {
        let location = Path::from(path);
        let opts = PutOptions::from(PutMode::Create);

        match self.store.put_opts(&location, data.clone(), opts).await {
            Ok(_) => Ok(CreateOutcome::Created),
            Err(object_store::Error::AlreadyExists { .. }) => Ok(CreateOutcome::AlreadyExists),
            Err(object_store::Error::NotImplemented) => {
                warn!("Backend has no conditional put, falling back to head-then-put");
                if self.exists(path).await? {
                    return Ok(CreateOutcome::AlreadyExists);
                }
                self.put(path, data).await?;
                Ok(CreateOutcome::Created)
            }
            Err(e) => Err(StorageError::unavailable(format!(
                "Failed to create {}: {}",
                path, e
            ))),
        }
    }

    /// Read bytes from a path.
    #[instrument(skip(self), fields(store = %self.label, path = %path))]
    pub async fn get(&self, path: &str) -> Result<Bytes> {
        match self.get_opt(path).await? {
            Some(bytes) => Ok(bytes),
            None => Err(StorageError::NotFound(path.to_string())),
        }
    }

    /// Read bytes from a path, `None` if the object does not exist.
    pub async fn get_opt(&self, path: &str) -> Result<Option<Bytes>> {
        let location = Path::from(path);

        let result = match self.store.get(&location).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => {
                return Err(StorageError::unavailable(format!(
                    "Failed to read {}: {}",
                    path, e
                )))
            }
        };

        let bytes = result
            .bytes()
            .await
            .map_err(|e| StorageError::unavailable(format!("Failed to read bytes: {}", e)))?;

        debug!(path, size = bytes.len(), "Read object");
        Ok(Some(bytes))
    }

    /// Check if an object exists.
    pub async fn exists(&self, path: &str) -> Result<bool> {
        let location = Path::from(path);

        match self.store.head(&location).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(StorageError::unavailable(format!(
                "Failed to check {}: {}",
                path, e
            ))),
        }
    }

    /// List objects with a given prefix.
    pub async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let prefix_path = Path::from(prefix);
        let mut objects = Vec::new();

        let mut stream = self.store.list(Some(&prefix_path));
        while let Some(meta) = stream
            .try_next()
            .await
            .map_err(|e| StorageError::unavailable(format!("List failed: {}", e)))?
        {
            objects.push(meta);
        }

        Ok(objects)
    }

    /// Delete an object. Deleting a missing object is not an error.
    #[instrument(skip(self), fields(store = %self.label, path = %path))]
    pub async fn delete(&self, path: &str) -> Result<()> {
        let location = Path::from(path);

        match self.store.delete(&location).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(StorageError::unavailable(format!(
                "Failed to delete {}: {}",
                path, e
            ))),
        }
    }

    /// Delete every object under a prefix, returning how many were removed.
    pub async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let objects = self.list(prefix).await?;
        for meta in &objects {
            self.delete(meta.location.as_ref()).await?;
        }
        Ok(objects.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    fn storage() -> ObjectStorage {
        ObjectStorage::new(Arc::new(InMemory::new()), "memory")
    }

    #[tokio::test]
    async fn test_put_if_absent_only_creates_once() {
        let storage = storage();
        let first = storage
            .put_if_absent("index/a.json", Bytes::from_static(b"one"))
            .await
            .unwrap();
        let second = storage
            .put_if_absent("index/a.json", Bytes::from_static(b"two"))
            .await
            .unwrap();

        assert_eq!(first, CreateOutcome::Created);
        assert_eq!(second, CreateOutcome::AlreadyExists);
        assert_eq!(storage.get("index/a.json").await.unwrap(), Bytes::from_static(b"one"));
    }

    #[tokio::test]
    async fn test_get_missing() {
        let storage = storage();
        assert!(storage.get_opt("nope").await.unwrap().is_none());
        assert!(matches!(
            storage.get("nope").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(!storage.exists("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_prefix() {
        let storage = storage();
        for path in ["data/t/a/zarr.json", "data/t/a/IR/zarr.json", "data/t/b/zarr.json"] {
            storage.put(path, Bytes::from_static(b"{}")).await.unwrap();
        }

        assert_eq!(storage.delete_prefix("data/t/a").await.unwrap(), 2);
        assert_eq!(storage.list("data").await.unwrap().len(), 1);
        // Missing objects are fine
        storage.delete("data/t/a/zarr.json").await.unwrap();
    }
}
