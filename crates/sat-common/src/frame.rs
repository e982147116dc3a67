//! Data that flows between pipeline stages.
//!
//! Each value is owned by exactly one stage at a time and moved to the next
//! stage when handed off. Nothing here is shared mutably.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CommonError, CommonResult};
use crate::grid::{GeostationaryView, GridDefinition};

/// One raw source file the catalog expects for a (timestamp, channel) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFileRef {
    /// Granule name, unique within a run.
    pub identifier: String,
    /// Channel the granule is expected to carry.
    pub channel: String,
    /// Nominal time slot the granule contributes to.
    pub timestamp: DateTime<Utc>,
    /// Where the transport fetches it from (URL or path).
    pub locator: String,
}

/// Geolocation of a decoded swath in the instrument's native sampling.
///
/// Origins and spacings refer to pixel centres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NativeGeolocation {
    /// Fixed-grid scan angles in radians.
    Geostationary {
        view: GeostationaryView,
        x_origin: f64,
        y_origin: f64,
        dx: f64,
        dy: f64,
    },
    /// Regular latitude/longitude sampling in degrees.
    LatLon {
        lon_origin: f64,
        lat_origin: f64,
        dlon: f64,
        dlat: f64,
    },
}

/// Row-major 2D array of physical values. NaN marks missing samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Swath {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Swath {
    pub fn new(rows: usize, cols: usize, data: Vec<f32>) -> CommonResult<Self> {
        if rows == 0 || cols == 0 {
            return Err(CommonError::InvalidSwath(format!(
                "swath must be non-empty, got {}x{}",
                rows, cols
            )));
        }
        if data.len() != rows * cols {
            return Err(CommonError::InvalidSwath(format!(
                "swath {}x{} needs {} values, got {}",
                rows,
                cols,
                rows * cols,
                data.len()
            )));
        }
        Ok(Self { rows, cols, data })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

/// Calibrated channel imagery as produced by an instrument decoder.
#[derive(Debug, Clone)]
pub struct DecodedChannelFrame {
    pub channel: String,
    pub timestamp: DateTime<Utc>,
    /// Identifier of the granule it was decoded from.
    pub source: String,
    /// Name of the decoder that produced it.
    pub decoder: String,
    pub units: String,
    pub geolocation: NativeGeolocation,
    pub swath: Swath,
}

/// Provenance of one channel in a committed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelProvenance {
    pub source: String,
    pub decoder: String,
    pub interpolation: String,
    pub units: String,
    pub valid_fraction: f64,
}

/// A channel resampled onto the target grid.
///
/// The data length always equals the grid size; the constructor is the only
/// way to build one.
#[derive(Debug, Clone)]
pub struct ResampledChannelFrame {
    channel: String,
    timestamp: DateTime<Utc>,
    rows: usize,
    cols: usize,
    data: Vec<f32>,
    valid_fraction: f64,
    provenance: ChannelProvenance,
}

impl ResampledChannelFrame {
    /// Wrap resampled data, checking it against the grid shape.
    ///
    /// The valid fraction is the share of finite values; NaN is the fill value.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        channel: impl Into<String>,
        timestamp: DateTime<Utc>,
        grid: &GridDefinition,
        data: Vec<f32>,
        source: impl Into<String>,
        decoder: impl Into<String>,
        interpolation: impl Into<String>,
        units: impl Into<String>,
    ) -> CommonResult<Self> {
        let channel = channel.into();
        if data.len() != grid.len() {
            return Err(CommonError::ShapeMismatch {
                channel,
                expected_rows: grid.rows,
                expected_cols: grid.cols,
                expected_len: grid.len(),
                actual_len: data.len(),
            });
        }

        let valid = data.iter().filter(|v| v.is_finite()).count();
        let valid_fraction = valid as f64 / data.len() as f64;

        Ok(Self {
            provenance: ChannelProvenance {
                source: source.into(),
                decoder: decoder.into(),
                interpolation: interpolation.into(),
                units: units.into(),
                valid_fraction,
            },
            channel,
            timestamp,
            rows: grid.rows,
            cols: grid.cols,
            data,
            valid_fraction,
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn valid_fraction(&self) -> f64 {
        self.valid_fraction
    }

    pub fn provenance(&self) -> &ChannelProvenance {
        &self.provenance
    }
}

/// All channels for one nominal timestamp, ready to commit.
///
/// Built by the assembler at hand-off and immutable afterwards.
#[derive(Debug, Clone)]
pub struct TimestepFrame {
    timestamp: DateTime<Utc>,
    channels: BTreeMap<String, ResampledChannelFrame>,
    missing: Vec<String>,
}

impl TimestepFrame {
    pub fn new(
        timestamp: DateTime<Utc>,
        channels: BTreeMap<String, ResampledChannelFrame>,
        missing: Vec<String>,
    ) -> Self {
        Self {
            timestamp,
            channels,
            missing,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn channels(&self) -> &BTreeMap<String, ResampledChannelFrame> {
        &self.channels
    }

    pub fn channel(&self, name: &str) -> Option<&ResampledChannelFrame> {
        self.channels.get(name)
    }

    /// Required channels absent from this frame (allowed by the subset policy).
    pub fn missing(&self) -> &[String] {
        &self.missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}
