//! Acquisition stage: fetch granules to local disk with retry and
//! completeness checks.
//!
//! Files are fetched into `<work_dir>/partial/{identifier}.partial`, verified
//! against the size and checksum the transport declared, then moved to
//! `<work_dir>/granules/{identifier}`. A granule already present there is
//! reused without fetching.

mod http;
mod local;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use sat_common::SourceFileRef;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::RetryConfig;
use crate::error::{ConversionError, Result};

pub use http::HttpTransport;
pub use local::LocalTransport;

/// What a transport reports about a file it wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedFile {
    /// Byte size announced by the source, if any.
    pub declared_size: Option<u64>,
    /// CRC32 announced by the source, if any.
    pub declared_crc32: Option<u32>,
}

/// Transport failure classification.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Worth retrying (timeouts, 5xx, truncated bodies).
    #[error("transient: {0}")]
    Transient(String),
    /// Retrying cannot help (missing file, access denied).
    #[error("permanent: {0}")]
    Permanent(String),
}

/// Moves one remote file to a local path.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch `locator` into `destination`, replacing anything there.
    async fn fetch(
        &self,
        locator: &str,
        destination: &Path,
    ) -> std::result::Result<FetchedFile, TransportError>;
}

/// A verified granule on local disk, owned by whichever stage holds it.
#[derive(Debug)]
pub struct LocalFile {
    path: PathBuf,
    size: u64,
    retain: bool,
}

impl LocalFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Release the granule once it has been consumed, deleting it unless
    /// downloads are retained.
    pub async fn release(self) {
        if self.retain {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove granule");
            }
        }
    }
}

/// Runs fetches through a [`Transport`] with bounded retries.
pub struct Acquirer {
    transport: Arc<dyn Transport>,
    retry: RetryConfig,
    partial_dir: PathBuf,
    granule_dir: PathBuf,
    retain: bool,
}

impl Acquirer {
    pub fn new(
        transport: Arc<dyn Transport>,
        retry: RetryConfig,
        work_dir: &Path,
        retain: bool,
    ) -> Self {
        Self {
            transport,
            retry,
            partial_dir: work_dir.join("partial"),
            granule_dir: work_dir.join("granules"),
            retain,
        }
    }

    /// Fetch one granule.
    ///
    /// Transient failures (including a size or checksum mismatch) are
    /// retried with exponential backoff. Cancelling `cancel` stops any
    /// further attempt; a transfer already running is allowed to finish.
    #[instrument(skip(self, file, cancel), fields(identifier = %file.identifier))]
    pub async fn acquire(
        &self,
        file: &SourceFileRef,
        cancel: &CancellationToken,
    ) -> Result<LocalFile> {
        let failed = |reason: String| ConversionError::AcquisitionFailed {
            identifier: file.identifier.clone(),
            reason,
        };

        fs::create_dir_all(&self.partial_dir)
            .await
            .map_err(|e| failed(format!("cannot create {}: {}", self.partial_dir.display(), e)))?;
        fs::create_dir_all(&self.granule_dir)
            .await
            .map_err(|e| failed(format!("cannot create {}: {}", self.granule_dir.display(), e)))?;

        let temp_path = self.partial_dir.join(format!("{}.partial", file.identifier));
        let final_path = self.granule_dir.join(&file.identifier);

        if let Ok(meta) = fs::metadata(&final_path).await {
            if meta.is_file() {
                info!(path = %final_path.display(), "Granule already acquired, skipping fetch");
                return Ok(self.local_file(final_path, meta.len()));
            }
        }

        let mut retry_count = 0;
        let mut delay = self.retry.initial_delay();

        loop {
            if cancel.is_cancelled() {
                return Err(failed("run deadline reached".to_string()));
            }

            match self.attempt(&file.locator, &temp_path).await {
                Ok(size) => {
                    move_into_place(&temp_path, &final_path)
                        .await
                        .map_err(|e| failed(format!("cannot move granule into place: {}", e)))?;
                    info!(path = %final_path.display(), bytes = size, retries = retry_count, "Granule acquired");
                    return Ok(self.local_file(final_path, size));
                }
                Err(TransportError::Permanent(reason)) => {
                    let _ = fs::remove_file(&temp_path).await;
                    warn!(reason = %reason, "Acquisition failed permanently");
                    return Err(failed(reason));
                }
                Err(TransportError::Transient(reason)) => {
                    let _ = fs::remove_file(&temp_path).await;
                    retry_count += 1;

                    if retry_count > self.retry.max_retries {
                        warn!(reason = %reason, retries = self.retry.max_retries, "Acquisition retries exhausted");
                        return Err(failed(format!(
                            "gave up after {} retries: {}",
                            self.retry.max_retries, reason
                        )));
                    }

                    let transient = ConversionError::TransientAcquisition {
                        identifier: file.identifier.clone(),
                        reason,
                    };
                    warn!(
                        error = %transient,
                        retry = retry_count,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Fetch failed, retrying"
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => {
                            return Err(failed("run deadline reached".to_string()));
                        }
                    }

                    delay = std::cmp::min(delay * 2, self.retry.max_delay());
                }
            }
        }
    }

    /// One fetch plus verification. A mismatch is transient.
    async fn attempt(
        &self,
        locator: &str,
        temp_path: &Path,
    ) -> std::result::Result<u64, TransportError> {
        let fetched = self.transport.fetch(locator, temp_path).await?;

        let actual = fs::metadata(temp_path)
            .await
            .map_err(|e| TransportError::Transient(format!("fetched file missing: {}", e)))?
            .len();

        if let Some(expected) = fetched.declared_size {
            if actual != expected {
                return Err(TransportError::Transient(format!(
                    "size mismatch: expected {} bytes, got {}",
                    expected, actual
                )));
            }
        }

        if let Some(expected) = fetched.declared_crc32 {
            let crc = file_crc32(temp_path)
                .await
                .map_err(|e| TransportError::Transient(format!("cannot checksum: {}", e)))?;
            if crc != expected {
                return Err(TransportError::Transient(format!(
                    "checksum mismatch: expected {:08x}, got {:08x}",
                    expected, crc
                )));
            }
        }

        debug!(bytes = actual, "Fetched file verified");
        Ok(actual)
    }

    fn local_file(&self, path: PathBuf, size: u64) -> LocalFile {
        LocalFile {
            path,
            size,
            retain: self.retain,
        }
    }
}

async fn move_into_place(from: &Path, to: &Path) -> std::io::Result<()> {
    if fs::rename(from, to).await.is_err() {
        // Likely a cross-device move
        fs::copy(from, to).await?;
        fs::remove_file(from).await?;
    }
    Ok(())
}

async fn file_crc32(path: &Path) -> std::io::Result<u32> {
    let mut file = fs::File::open(path).await?;
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::{TimeZone, Utc};

    /// Fails transiently `failures` times, then writes `body`.
    struct FlakyTransport {
        failures: u32,
        calls: AtomicU32,
        body: Vec<u8>,
        declared: FetchedFile,
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn fetch(
            &self,
            _locator: &str,
            destination: &Path,
        ) -> std::result::Result<FetchedFile, TransportError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(TransportError::Transient("connection reset".into()));
            }
            fs::write(destination, &self.body)
                .await
                .map_err(|e| TransportError::Transient(e.to_string()))?;
            Ok(self.declared.clone())
        }
    }

    struct MissingTransport;

    #[async_trait]
    impl Transport for MissingTransport {
        async fn fetch(
            &self,
            locator: &str,
            _destination: &Path,
        ) -> std::result::Result<FetchedFile, TransportError> {
            Err(TransportError::Permanent(format!("{} not found", locator)))
        }
    }

    fn retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay_ms: 1,
            max_delay_ms: 4,
        }
    }

    fn source(identifier: &str) -> SourceFileRef {
        SourceFileRef {
            identifier: identifier.to_string(),
            channel: "C13".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            locator: format!("mem://{}", identifier),
        }
    }

    fn flaky(failures: u32, body: &[u8], declared: FetchedFile) -> Arc<FlakyTransport> {
        Arc::new(FlakyTransport {
            failures,
            calls: AtomicU32::new(0),
            body: body.to_vec(),
            declared,
        })
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let dir = tempfile::tempdir().unwrap();
        let transport = flaky(2, b"granule", FetchedFile::default());
        let acquirer = Acquirer::new(transport.clone(), retry(3), dir.path(), false);

        let local = acquirer
            .acquire(&source("a.nc"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
        assert_eq!(local.size(), 7);
        assert_eq!(local.path(), dir.path().join("granules/a.nc"));
        assert!(!dir.path().join("partial/a.nc.partial").exists());
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let dir = tempfile::tempdir().unwrap();
        let transport = flaky(10, b"granule", FetchedFile::default());
        let acquirer = Acquirer::new(transport.clone(), retry(2), dir.path(), false);

        let err = acquirer
            .acquire(&source("a.nc"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ConversionError::AcquisitionFailed { .. }));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let acquirer = Acquirer::new(Arc::new(MissingTransport), retry(5), dir.path(), false);

        let err = acquirer
            .acquire(&source("a.nc"), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            ConversionError::AcquisitionFailed { identifier, reason } => {
                assert_eq!(identifier, "a.nc");
                assert!(reason.contains("not found"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_incomplete_file_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        // Declares more bytes than it ever delivers
        let transport = flaky(
            0,
            b"short",
            FetchedFile {
                declared_size: Some(100),
                declared_crc32: None,
            },
        );
        let acquirer = Acquirer::new(transport.clone(), retry(2), dir.path(), false);

        let err = acquirer
            .acquire(&source("a.nc"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("size mismatch"));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_checksum_verified() {
        let dir = tempfile::tempdir().unwrap();
        let body = b"granule bytes";
        let good = flaky(
            0,
            body,
            FetchedFile {
                declared_size: Some(body.len() as u64),
                declared_crc32: Some(crc32fast::hash(body)),
            },
        );
        let acquirer = Acquirer::new(good, retry(0), dir.path(), false);
        assert!(acquirer
            .acquire(&source("good.nc"), &CancellationToken::new())
            .await
            .is_ok());

        let bad = flaky(
            0,
            body,
            FetchedFile {
                declared_size: None,
                declared_crc32: Some(crc32fast::hash(b"other")),
            },
        );
        let acquirer = Acquirer::new(bad, retry(0), dir.path(), false);
        let err = acquirer
            .acquire(&source("bad.nc"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[tokio::test]
    async fn test_existing_granule_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("granules")).unwrap();
        std::fs::write(dir.path().join("granules/a.nc"), b"cached").unwrap();

        let transport = flaky(0, b"fresh", FetchedFile::default());
        let acquirer = Acquirer::new(transport.clone(), retry(0), dir.path(), true);
        let local = acquirer
            .acquire(&source("a.nc"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
        assert_eq!(local.size(), 6);

        // Retained files survive release
        let path = local.path().to_path_buf();
        local.release().await;
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_release_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let acquirer = Acquirer::new(
            flaky(0, b"x", FetchedFile::default()),
            retry(0),
            dir.path(),
            false,
        );
        let local = acquirer
            .acquire(&source("a.nc"), &CancellationToken::new())
            .await
            .unwrap();
        let path = local.path().to_path_buf();
        local.release().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let transport = flaky(0, b"x", FetchedFile::default());
        let acquirer = Acquirer::new(transport.clone(), retry(0), dir.path(), false);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(acquirer.acquire(&source("a.nc"), &cancel).await.is_err());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }
}
