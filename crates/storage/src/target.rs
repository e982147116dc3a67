//! Parsing of store target strings into object store backends.
//!
//! Accepted forms:
//!
//! - `/some/dir` or `file:///some/dir` - local directory (created if missing)
//! - `s3://bucket/optional/prefix` - S3 or S3-compatible endpoint
//! - `memory://` - process-local store, mainly for tests

use std::path::PathBuf;
use std::sync::Arc;

use object_store::aws::{AmazonS3, AmazonS3Builder, AmazonS3ConfigKey};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::prefix::PrefixStore;
use object_store::ObjectStore;
use tracing::{info, warn};

use crate::error::{Result, StorageError};
use crate::object_store::ObjectStorage;

const DEFAULT_REGION: &str = "eu-west-1";

/// Where committed records live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreTarget {
    Local(PathBuf),
    S3 { bucket: String, prefix: String },
    Memory,
}

impl StoreTarget {
    pub fn parse(target: &str) -> Result<Self> {
        let target = target.trim();
        if target.is_empty() {
            return Err(StorageError::InvalidTarget("empty store target".to_string()));
        }

        if target == "memory://" || target == "memory" {
            return Ok(Self::Memory);
        }

        if let Some(rest) = target.strip_prefix("s3://") {
            let rest = rest.trim_end_matches('/');
            let (bucket, prefix) = match rest.split_once('/') {
                Some((bucket, prefix)) => (bucket, prefix.trim_matches('/')),
                None => (rest, ""),
            };
            if bucket.is_empty() {
                return Err(StorageError::InvalidTarget(format!(
                    "missing bucket in {}",
                    target
                )));
            }
            return Ok(Self::S3 {
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
            });
        }

        if let Some(path) = target.strip_prefix("file://") {
            return Ok(Self::Local(PathBuf::from(path)));
        }

        if target.contains("://") {
            return Err(StorageError::InvalidTarget(format!(
                "unsupported scheme in {}",
                target
            )));
        }

        Ok(Self::Local(PathBuf::from(target)))
    }

    /// Connect to the backend.
    ///
    /// S3 credentials come from `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`;
    /// `AWS_REGION` defaults to `eu-west-1` and `AWS_ENDPOINT_URL` selects an
    /// S3-compatible endpoint. `AWS_CONDITIONAL_PUT=etag` enables the
    /// conditional put that makes create-only commits exclusive across
    /// processes; without it S3 commits use the head-then-put fallback of
    /// [`ObjectStorage::put_if_absent`].
    pub fn connect(&self) -> Result<ObjectStorage> {
        match self {
            Self::Memory => Ok(ObjectStorage::new(Arc::new(InMemory::new()), "memory://")),
            Self::Local(dir) => {
                std::fs::create_dir_all(dir)?;
                let store = LocalFileSystem::new_with_prefix(dir).map_err(|e| {
                    StorageError::InvalidTarget(format!("{}: {}", dir.display(), e))
                })?;
                info!(path = %dir.display(), "Using local record store");
                Ok(ObjectStorage::new(
                    Arc::new(store),
                    dir.display().to_string(),
                ))
            }
            Self::S3 { bucket, prefix } => {
                let (s3, region) = build_s3(bucket, |name| std::env::var(name).ok())?;

                info!(bucket = %bucket, prefix = %prefix, region = %region, "Using S3 record store");

                let store: Arc<dyn ObjectStore> = if prefix.is_empty() {
                    Arc::new(s3)
                } else {
                    Arc::new(PrefixStore::new(s3, Path::from(prefix.as_str())))
                };
                Ok(ObjectStorage::new(store, format!("s3://{}/{}", bucket, prefix)))
            }
        }
    }
}

impl std::fmt::Display for StoreTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::S3 { bucket, prefix } if prefix.is_empty() => write!(f, "s3://{}", bucket),
            Self::S3 { bucket, prefix } => write!(f, "s3://{}/{}", bucket, prefix),
            Self::Memory => write!(f, "memory://"),
        }
    }
}

/// Build the S3 client for `bucket` from the variables `env` resolves.
fn build_s3(bucket: &str, env: impl Fn(&str) -> Option<String>) -> Result<(AmazonS3, String)> {
    let required = |name: &str| {
        env(name).ok_or_else(|| {
            StorageError::InvalidTarget(format!("{} must be set for S3 targets", name))
        })
    };
    let access_key = required("AWS_ACCESS_KEY_ID")?;
    let secret_key = required("AWS_SECRET_ACCESS_KEY")?;
    let region = env("AWS_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string());

    let mut builder = AmazonS3Builder::new()
        .with_bucket_name(bucket)
        .with_access_key_id(access_key)
        .with_secret_access_key(secret_key)
        .with_region(&region);

    if let Some(endpoint) = env("AWS_ENDPOINT_URL") {
        if endpoint.starts_with("http://") {
            builder = builder.with_allow_http(true);
        }
        builder = builder.with_endpoint(endpoint);
    }

    match env("AWS_CONDITIONAL_PUT") {
        Some(mode) => builder = builder.with_config(AmazonS3ConfigKey::ConditionalPut, mode),
        None => warn!(
            bucket,
            "AWS_CONDITIONAL_PUT not set, create-only commits are not exclusive across processes"
        ),
    }

    let s3 = builder.build().map_err(|e| {
        StorageError::InvalidTarget(format!("Failed to create S3 client: {}", e))
    })?;
    Ok((s3, region))
}
