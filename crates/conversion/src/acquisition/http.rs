//! HTTP(S) transport built on reqwest.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{FetchedFile, Transport, TransportError};

/// Streams a URL to disk. Content-Length, when present, becomes the
/// declared size.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(request_timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(4)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| TransportError::Permanent(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, locator: &str, destination: &Path) -> Result<FetchedFile, TransportError> {
        let response = self
            .client
            .get(locator)
            .send()
            .await
            .map_err(|e| TransportError::Transient(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }

        let declared_size = response.content_length();

        let mut file = File::create(destination)
            .await
            .map_err(|e| TransportError::Transient(format!("Failed to open output file: {}", e)))?;

        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| TransportError::Transient(format!("Error reading response chunk: {}", e)))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| TransportError::Transient(format!("Error writing to file: {}", e)))?;
            written += chunk.len() as u64;
        }

        file.flush()
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))?;
        file.sync_all()
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))?;

        debug!(url = %locator, bytes = written, "Downloaded");

        Ok(FetchedFile {
            declared_size,
            declared_crc32: None,
        })
    }
}

/// Missing or forbidden resources will not appear by retrying.
fn classify_status(status: StatusCode) -> TransportError {
    match status {
        StatusCode::NOT_FOUND | StatusCode::FORBIDDEN | StatusCode::GONE => {
            TransportError::Permanent(format!("HTTP error: {}", status))
        }
        _ => TransportError::Transient(format!("HTTP error: {}", status)),
    }
}
