//! Transport for granules already on a mounted filesystem.

use std::path::Path;

use async_trait::async_trait;
use tokio::fs;

use super::{FetchedFile, Transport, TransportError};

/// Copies `file://` URLs or plain paths.
#[derive(Debug, Default, Clone)]
pub struct LocalTransport;

#[async_trait]
impl Transport for LocalTransport {
    async fn fetch(&self, locator: &str, destination: &Path) -> Result<FetchedFile, TransportError> {
        let source = locator.strip_prefix("file://").unwrap_or(locator);

        let meta = match fs::metadata(source).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TransportError::Permanent(format!("{} not found", source)))
            }
            Err(e) => return Err(TransportError::Transient(format!("{}: {}", source, e))),
        };
        if !meta.is_file() {
            return Err(TransportError::Permanent(format!("{} is not a file", source)));
        }

        fs::copy(source, destination)
            .await
            .map_err(|e| TransportError::Transient(format!("copy {} failed: {}", source, e)))?;

        Ok(FetchedFile {
            declared_size: Some(meta.len()),
            declared_crc32: None,
        })
    }
}
