//! Zarr V3 writer for timestep records.
//!
//! A record is a Zarr group holding one float32 array per channel. Arrays are
//! chunked along the grid's natural tiling and use NaN as the fill value.
//! Record-level provenance lives in the group attributes.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sat_common::{coordinate_key, ChannelProvenance, GridDefinition, TimestepFrame};
use serde::{Deserialize, Serialize};
use tracing::debug;
use zarrs::array::codec::bytes_to_bytes::blosc::{
    BloscCodec, BloscCompressionLevel, BloscCompressor, BloscShuffleMode,
};
use zarrs::array::{ArrayBuilder, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs::group::GroupBuilder;
use zarrs::storage::{ReadableStorageTraits, WritableStorageTraits};

use crate::config::{GridProcessorConfig, ZarrCompression};
use crate::error::{GridProcessorError, Result};

/// Attributes stored on the record group.
///
/// Together with the channel arrays this is enough to reproduce the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordAttributes {
    /// Nominal timestamp of the record.
    pub timestamp: DateTime<Utc>,
    /// Store coordinate key.
    pub coordinate: String,
    /// Grid every channel is shaped to.
    pub grid: GridDefinition,
    /// Channels present in the record.
    pub channels: Vec<String>,
    /// Required channels that were absent when the record was assembled.
    #[serde(default)]
    pub missing_channels: Vec<String>,
    /// Per-channel source and processing parameters.
    pub provenance: BTreeMap<String, ChannelProvenance>,
    /// Compression codec used for chunks.
    pub compression: String,
}

/// Result of writing a record.
#[derive(Debug)]
pub struct ZarrWriteResult {
    pub attributes: RecordAttributes,
    /// Uncompressed bytes of channel data written.
    pub bytes_written: u64,
}

/// Writer for creating Zarr V3 records from timestep frames.
pub struct ZarrWriter {
    config: GridProcessorConfig,
}

impl ZarrWriter {
    /// Create a new ZarrWriter with the given configuration.
    pub fn new(config: GridProcessorConfig) -> Self {
        Self { config }
    }

    /// Write a timestep frame as a Zarr group rooted at `/`.
    ///
    /// The storage must be empty; every channel becomes the array
    /// `/{channel}` shaped `[rows, cols]`.
    pub fn write_record<S: ReadableStorageTraits + WritableStorageTraits + 'static>(
        &self,
        storage: S,
        grid: &GridDefinition,
        frame: &TimestepFrame,
    ) -> Result<ZarrWriteResult> {
        let store = Arc::new(storage);

        let attributes = RecordAttributes {
            timestamp: frame.timestamp(),
            coordinate: coordinate_key(frame.timestamp()),
            grid: grid.clone(),
            channels: frame.channels().keys().cloned().collect(),
            missing_channels: frame.missing().to_vec(),
            provenance: frame
                .channels()
                .iter()
                .map(|(name, channel)| (name.clone(), channel.provenance().clone()))
                .collect(),
            compression: self.config.zarr_compression.as_str().to_string(),
        };

        let group_attrs = match serde_json::to_value(&attributes)? {
            serde_json::Value::Object(map) => map,
            other => {
                return Err(GridProcessorError::invalid_metadata(format!(
                    "record attributes serialized to {}",
                    other
                )))
            }
        };

        let mut group_builder = GroupBuilder::new();
        group_builder.attributes(group_attrs);
        let group = group_builder
            .build(store.clone(), "/")
            .map_err(|e| GridProcessorError::StorageError(e.to_string()))?;
        group
            .store_metadata()
            .map_err(|e| GridProcessorError::StorageError(e.to_string()))?;

        let mut bytes_written = 0u64;
        for (name, channel) in frame.channels() {
            validate_node_name(name)?;
            if channel.shape() != grid.shape() {
                return Err(GridProcessorError::invalid_metadata(format!(
                    "channel {} is {:?}, grid is {:?}",
                    name,
                    channel.shape(),
                    grid.shape()
                )));
            }

            let array = self.build_array(store.clone(), name, grid, frame.timestamp(), channel.provenance())?;

            array
                .store_metadata()
                .map_err(|e| GridProcessorError::StorageError(e.to_string()))?;

            let subset = ArraySubset::new_with_start_shape(
                vec![0, 0],
                vec![grid.rows as u64, grid.cols as u64],
            )
            .map_err(|e| GridProcessorError::StorageError(e.to_string()))?;

            array
                .store_array_subset_elements(&subset, channel.data())
                .map_err(|e| GridProcessorError::StorageError(e.to_string()))?;

            bytes_written += (channel.data().len() * std::mem::size_of::<f32>()) as u64;
        }

        debug!(
            coordinate = %attributes.coordinate,
            channels = attributes.channels.len(),
            bytes = bytes_written,
            "Wrote Zarr record"
        );

        Ok(ZarrWriteResult {
            attributes,
            bytes_written,
        })
    }

    /// Build a channel array with the configured settings.
    fn build_array<S: ReadableStorageTraits + WritableStorageTraits + 'static>(
        &self,
        storage: Arc<S>,
        channel: &str,
        grid: &GridDefinition,
        timestamp: DateTime<Utc>,
        provenance: &ChannelProvenance,
    ) -> Result<zarrs::array::Array<S>> {
        let mut attrs = serde_json::Map::new();
        attrs.insert("channel".to_string(), serde_json::json!(channel));
        attrs.insert("units".to_string(), serde_json::json!(provenance.units));
        attrs.insert("source".to_string(), serde_json::json!(provenance.source));
        attrs.insert("decoder".to_string(), serde_json::json!(provenance.decoder));
        attrs.insert(
            "interpolation".to_string(),
            serde_json::json!(provenance.interpolation),
        );
        attrs.insert(
            "valid_fraction".to_string(),
            serde_json::json!(provenance.valid_fraction),
        );
        attrs.insert(
            "timestamp".to_string(),
            serde_json::json!(timestamp.to_rfc3339()),
        );
        attrs.insert("_ARRAY_DIMENSIONS".to_string(), serde_json::json!(["y", "x"]));

        let (chunk_rows, chunk_cols) = grid.chunk_shape();
        let chunk_grid: zarrs::array::ChunkGrid = vec![chunk_rows as u64, chunk_cols as u64]
            .try_into()
            .map_err(|e| GridProcessorError::ConfigError(format!("{:?}", e)))?;

        let mut binding = ArrayBuilder::new(
            vec![grid.rows as u64, grid.cols as u64], // shape [rows, cols]
            DataType::Float32,
            chunk_grid,
            FillValue::from(f32::NAN),
        );
        let mut builder = binding.attributes(attrs);

        if self.config.zarr_compression != ZarrCompression::None {
            let codec = self.create_compression_codec()?;
            builder = builder.bytes_to_bytes_codecs(vec![codec]);
        }

        builder
            .build(storage, &format!("/{}", channel))
            .map_err(|e| GridProcessorError::StorageError(e.to_string()))
    }

    /// Create the compression codec based on configuration.
    fn create_compression_codec(
        &self,
    ) -> Result<Arc<dyn zarrs::array::codec::BytesToBytesCodecTraits>> {
        let level = BloscCompressionLevel::try_from(self.config.zarr_compression_level)
            .map_err(|_| GridProcessorError::ConfigError("Invalid compression level".to_string()))?;

        let shuffle = if self.config.zarr_shuffle {
            BloscShuffleMode::Shuffle
        } else {
            BloscShuffleMode::NoShuffle
        };

        // typesize is required when shuffle is enabled
        let typesize = if self.config.zarr_shuffle { Some(4) } else { None };

        let compressor = match self.config.zarr_compression {
            ZarrCompression::None => {
                return Err(GridProcessorError::ConfigError(
                    "No compression configured".to_string(),
                ))
            }
            ZarrCompression::BloscLz4 => BloscCompressor::LZ4,
            ZarrCompression::BloscZstd => BloscCompressor::Zstd,
        };

        let codec = BloscCodec::new(compressor, level, None, shuffle, typesize)
            .map_err(|e| GridProcessorError::ConfigError(e.to_string()))?;

        Ok(Arc::new(codec))
    }
}

/// Channel names become Zarr node names.
fn validate_node_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name.starts_with("__") || name == "." || name == ".." {
        return Err(GridProcessorError::invalid_metadata(format!(
            "channel name '{}' is not a valid Zarr node name",
            name
        )));
    }
    Ok(())
}
