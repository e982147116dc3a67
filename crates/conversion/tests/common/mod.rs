//! Fakes and fixtures shared by the pipeline tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conversion::{
    ChunkStoreBackend, Collaborators, CommitMode, ConversionConfig, ConversionError,
    ConversionRequest, DecodeFailure, FetchedFile, InstrumentDecoder, KernelResampler,
    SourceCatalog, StagedRecord, StoreBackend, Transport, TransportError,
};
use grid_processor::{GridProcessorConfig, InterpolationMethod, ZarrCompression};
use object_store::memory::InMemory;
use sat_common::{
    DecodedChannelFrame, GridDefinition, SourceFileRef, Swath, TimeInterval, TimestepFrame,
};
use storage::{ChunkStore, ObjectStorage};
use test_utils::{aligned_latlon_frame, nominal_time, small_geographic_grid};

pub const CHANNELS: [&str; 3] = ["IR_108", "WV_062", "VIS006"];
pub const TEMPLATE: &str = "mem://archive/{date}/{channel}_{datetime}";

/// Identifier the catalog derives for (channel, timestamp).
pub fn identifier(channel: &str, ts: DateTime<Utc>) -> String {
    format!("{}_{}", channel, ts.format("%Y%m%d%H%M%S"))
}

/// Serves every locator from memory. Selected identifiers fail
/// permanently or are delayed.
#[derive(Default)]
pub struct FakeTransport {
    missing: HashSet<String>,
    delays: HashMap<String, Duration>,
    calls: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn missing(mut self, identifier: impl Into<String>) -> Self {
        self.missing.insert(identifier.into());
        self
    }

    pub fn delayed(mut self, identifier: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(identifier.into(), delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn fetch(&self, locator: &str, destination: &Path) -> Result<FetchedFile, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let identifier = locator.rsplit('/').next().unwrap_or_default();

        if self.missing.contains(identifier) {
            return Err(TransportError::Permanent(format!("{} not found", locator)));
        }
        if let Some(delay) = self.delays.get(identifier) {
            tokio::time::sleep(*delay).await;
        }

        let body = format!("granule {}", locator);
        tokio::fs::write(destination, body.as_bytes())
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))?;
        Ok(FetchedFile {
            declared_size: Some(body.len() as u64),
            declared_crc32: Some(crc32fast::hash(body.as_bytes())),
        })
    }
}

/// Produces imagery sampled exactly on the target grid's pixel centres.
/// Selected identifiers decode to a swath covering only the grid's
/// top-left 2 x 2 corner.
pub struct FakeDecoder {
    grid: GridDefinition,
    sparse: HashSet<String>,
}

impl FakeDecoder {
    pub fn new(grid: GridDefinition) -> Self {
        Self {
            grid,
            sparse: HashSet::new(),
        }
    }

    pub fn sparse(mut self, identifier: impl Into<String>) -> Self {
        self.sparse.insert(identifier.into());
        self
    }
}

impl InstrumentDecoder for FakeDecoder {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn decode(&self, path: &Path, file: &SourceFileRef) -> Result<DecodedChannelFrame, DecodeFailure> {
        let body = std::fs::read_to_string(path).map_err(|e| DecodeFailure::Corrupt(e.to_string()))?;
        if !body.ends_with(&file.identifier) {
            return Err(DecodeFailure::Corrupt(format!("unexpected content in {}", path.display())));
        }
        let mut frame = aligned_latlon_frame(&self.grid, &file.channel, file.timestamp);
        if self.sparse.contains(&file.identifier) {
            frame.swath = Swath::new(2, 2, vec![250.0; 4]).expect("2 x 2 swath");
        }
        Ok(frame)
    }
}

/// A store whose writes always fail with an outage.
pub struct UnavailableStore;

#[async_trait]
impl StoreBackend for UnavailableStore {
    async fn exists(&self, _timestamp: DateTime<Utc>) -> conversion::Result<bool> {
        Ok(false)
    }

    async fn stage_write(&self, _frame: TimestepFrame) -> conversion::Result<StagedRecord> {
        Err(ConversionError::store_unavailable("connection refused"))
    }

    async fn commit(&self, _staged: &StagedRecord, _mode: CommitMode) -> conversion::Result<()> {
        Err(ConversionError::store_unavailable("connection refused"))
    }

    async fn abort(&self, _staged: StagedRecord) -> conversion::Result<()> {
        Ok(())
    }
}

pub fn zarr_config() -> GridProcessorConfig {
    GridProcessorConfig {
        zarr_compression: ZarrCompression::None,
        interpolation: InterpolationMethod::Nearest,
        ..Default::default()
    }
}

/// A fresh record store held in memory.
pub async fn memory_store() -> ChunkStore {
    let storage = ObjectStorage::new(Arc::new(InMemory::new()), "memory");
    ChunkStore::open_with(storage, small_geographic_grid(), zarr_config())
        .await
        .expect("open in-memory store")
}

/// Four 15-minute slots from 00:00 over the three test channels.
pub fn request() -> ConversionRequest {
    ConversionRequest {
        interval: TimeInterval::new(nominal_time(0, 0), nominal_time(1, 0)).expect("valid interval"),
        step: chrono::Duration::minutes(15),
        channels: CHANNELS.iter().map(|c| c.to_string()).collect(),
        grid: small_geographic_grid(),
        deadline: None,
    }
}

/// Quick retries, nearest-neighbour resampling and a private work dir.
pub fn config(work_dir: &Path) -> ConversionConfig {
    let mut config = ConversionConfig::default();
    config.work_dir = work_dir.to_path_buf();
    config.interpolation = InterpolationMethod::Nearest;
    config.retry.max_retries = 2;
    config.retry.initial_delay_ms = 10;
    config.retry.max_delay_ms = 20;
    config.sweep_interval_ms = 20;
    config
}

pub fn collaborators(transport: Arc<FakeTransport>, store: Arc<dyn StoreBackend>) -> Collaborators {
    Collaborators {
        catalog: SourceCatalog::new(TEMPLATE).expect("valid template"),
        transport,
        decoder: Arc::new(FakeDecoder::new(small_geographic_grid())),
        resampler: Arc::new(KernelResampler::new(InterpolationMethod::Nearest)),
        store,
    }
}

pub fn backend(store: &ChunkStore) -> Arc<dyn StoreBackend> {
    Arc::new(ChunkStoreBackend::new(store.clone()))
}
