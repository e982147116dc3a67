//! Run file for the converter.
//!
//! One YAML document describes a whole run: the target grid, the channels,
//! where granules come from, the interval and the store. Pipeline tunables
//! are optional and fall back to their defaults.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use conversion::{ConversionConfig, ConversionRequest};
use grid_processor::GridProcessorConfig;
use sat_common::{GridDefinition, TimeInterval};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunFile {
    pub grid: GridDefinition,

    /// Required channels, in record order.
    pub channels: Vec<String>,

    pub source: SourceConfig,

    pub interval: IntervalConfig,

    /// Store target: a path, `file://`, `s3://bucket/prefix` or `memory://`.
    pub store: String,

    #[serde(default)]
    pub zarr: GridProcessorConfig,

    #[serde(default)]
    pub pipeline: ConversionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Locator template, e.g.
    /// `https://host/ABI-L2-CMIPF/{year}/{doy}/{hour}/{channel}_{datetime}.nc`.
    pub template: String,

    /// Decoder to use for the granules.
    #[serde(default = "default_decoder")]
    pub decoder: String,

    /// Per-request timeout for HTTP sources.
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

fn default_decoder() -> String {
    "goes-abi-cmip".to_string()
}

fn default_http_timeout() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalConfig {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Nominal step between timestamps.
    pub step_minutes: i64,
}

impl SourceConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn is_http(&self) -> bool {
        self.template.starts_with("http://") || self.template.starts_with("https://")
    }
}

impl RunFile {
    /// Read and parse a run file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read run file {}", path.display()))?;
        let run: RunFile = serde_yaml::from_str(&text)
            .with_context(|| format!("Failed to parse run file {}", path.display()))?;
        Ok(run)
    }

    /// The conversion request this file describes.
    pub fn request(&self) -> Result<ConversionRequest> {
        if self.interval.step_minutes <= 0 {
            bail!("interval.step_minutes must be positive");
        }
        let interval = TimeInterval::new(self.interval.start, self.interval.end)
            .context("Invalid run interval")?;

        Ok(ConversionRequest {
            interval,
            step: chrono::Duration::minutes(self.interval.step_minutes),
            channels: self.channels.clone(),
            grid: self.grid.clone(),
            deadline: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conversion::OverwritePolicy;

    const RUN: &str = r#"
grid:
  projection:
    kind: geographic
  origin_x: -20.0
  origin_y: 60.0
  dx: 0.05
  dy: -0.05
  rows: 400
  cols: 800
  tile:
    rows: 200
    cols: 200
channels: [C08, C13]
source:
  template: "https://data.example.org/ABI-L2-CMIPF/{year}/{doy}/{hour}/{channel}_{datetime}.nc"
interval:
  start: 2024-04-30T18:00:00Z
  end: 2024-04-30T19:00:00Z
  step_minutes: 10
store: s3://sat-archive/abi/full-disk
pipeline:
  min_coverage: 0.2
  overwrite_policy: overwrite
"#;

    #[test]
    fn test_parse_run_file() {
        let run: RunFile = serde_yaml::from_str(RUN).unwrap();
        assert_eq!(run.channels, vec!["C08", "C13"]);
        assert_eq!(run.grid.rows, 400);
        assert!(run.source.is_http());
        assert_eq!(run.source.decoder, "goes-abi-cmip");
        assert_eq!(run.pipeline.min_coverage, 0.2);
        assert_eq!(run.pipeline.overwrite_policy, OverwritePolicy::Overwrite);
        // Unset pipeline fields keep their defaults
        assert_eq!(run.pipeline.concurrency.acquisition, 4);
    }

    #[test]
    fn test_request_from_run_file() {
        let run: RunFile = serde_yaml::from_str(RUN).unwrap();
        let request = run.request().unwrap();
        assert_eq!(request.step, chrono::Duration::minutes(10));
        assert_eq!(request.interval.nominal_timestamps(request.step).unwrap().len(), 6);
    }

    #[test]
    fn test_rejects_bad_step() {
        let mut run: RunFile = serde_yaml::from_str(RUN).unwrap();
        run.interval.step_minutes = 0;
        assert!(run.request().is_err());
    }

    #[test]
    fn test_load_reports_path() {
        let err = RunFile::load(Path::new("/nonexistent/run.yaml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/run.yaml"));
    }
}
