//! Zarr V3 record reader.
//!
//! Opens a record written by [`crate::ZarrWriter`] and reads channel data
//! back, either whole or one chunk at a time.

use std::sync::Arc;

use zarrs::array::Array;
use zarrs::array_subset::ArraySubset;
use zarrs::group::Group;
use zarrs::storage::ReadableStorageTraits;

use crate::error::{GridProcessorError, Result};
use crate::writer::RecordAttributes;

/// Read access to one timestep record.
pub struct ZarrRecordReader<S: ReadableStorageTraits + 'static> {
    storage: Arc<S>,
    attributes: RecordAttributes,
}

impl<S: ReadableStorageTraits + 'static> ZarrRecordReader<S> {
    /// Open the record group at `/` and parse its attributes.
    pub fn open(storage: S) -> Result<Self> {
        let storage = Arc::new(storage);
        let group = Group::open(storage.clone(), "/")
            .map_err(|e| GridProcessorError::open_failed(e.to_string()))?;

        let attributes: RecordAttributes =
            serde_json::from_value(serde_json::Value::Object(group.attributes().clone()))?;

        Ok(Self {
            storage,
            attributes,
        })
    }

    pub fn attributes(&self) -> &RecordAttributes {
        &self.attributes
    }

    fn open_channel(&self, channel: &str) -> Result<Array<S>> {
        if !self.attributes.channels.iter().any(|c| c == channel) {
            return Err(GridProcessorError::read_failed(format!(
                "channel {} not in record {}",
                channel, self.attributes.coordinate
            )));
        }
        Array::open(self.storage.clone(), &format!("/{}", channel))
            .map_err(|e| GridProcessorError::open_failed(e.to_string()))
    }

    /// Read a whole channel in row-major order.
    pub fn read_channel(&self, channel: &str) -> Result<Vec<f32>> {
        let array = self.open_channel(channel)?;
        let subset = ArraySubset::new_with_shape(array.shape().to_vec());
        array
            .retrieve_array_subset_elements::<f32>(&subset)
            .map_err(|e| GridProcessorError::read_failed(e.to_string()))
    }

    /// Read a single chunk of a channel, addressed by chunk row and column.
    ///
    /// Edge chunks are returned trimmed to the grid.
    pub fn read_chunk(&self, channel: &str, chunk_row: usize, chunk_col: usize) -> Result<Vec<f32>> {
        let array = self.open_channel(channel)?;
        let grid = &self.attributes.grid;
        let (chunk_rows, chunk_cols) = grid.chunk_shape();
        let (n_row_chunks, n_col_chunks) = grid.num_chunks();
        if chunk_row >= n_row_chunks || chunk_col >= n_col_chunks {
            return Err(GridProcessorError::read_failed(format!(
                "chunk ({}, {}) outside {}x{} chunk grid",
                chunk_row, chunk_col, n_row_chunks, n_col_chunks
            )));
        }

        let start_row = chunk_row * chunk_rows;
        let start_col = chunk_col * chunk_cols;
        let height = (start_row + chunk_rows).min(grid.rows) - start_row;
        let width = (start_col + chunk_cols).min(grid.cols) - start_col;

        // Zarr uses [row, col] indexing
        let subset = ArraySubset::new_with_start_shape(
            vec![start_row as u64, start_col as u64],
            vec![height as u64, width as u64],
        )
        .map_err(|e| GridProcessorError::read_failed(e.to_string()))?;

        array
            .retrieve_array_subset_elements::<f32>(&subset)
            .map_err(|e| GridProcessorError::read_failed(e.to_string()))
    }
}
