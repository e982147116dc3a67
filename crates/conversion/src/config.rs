//! Pipeline configuration.

use std::path::PathBuf;
use std::time::Duration;

use grid_processor::InterpolationMethod;
use serde::{Deserialize, Serialize};

/// Upper bound for each stage's concurrency limit.
pub const MAX_CONCURRENCY: usize = 1024;

/// Tunables for one conversion run.
///
/// Every field has a default, so a partial YAML/JSON document is enough.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    /// Minimum valid-pixel fraction a resampled channel must reach.
    pub min_coverage: f64,

    pub subset: SubsetPolicy,

    pub retry: RetryConfig,

    pub overwrite_policy: OverwritePolicy,

    /// Run-wide deadline; `None` waits for every unit.
    pub deadline_secs: Option<u64>,

    pub late_arrival: LateArrivalPolicy,

    /// Drop a timestep that is still short of its channels this long after
    /// the first one arrived. `None` waits until the run ends.
    pub assembly_timeout_ms: Option<u64>,

    pub concurrency: ConcurrencyConfig,

    pub interpolation: InterpolationMethod,

    /// Scratch space for downloads (`partial/` and `granules/`).
    pub work_dir: PathBuf,

    /// Keep acquired granules after they have been decoded.
    pub retain_downloads: bool,

    /// How often subset-wait and assembly timeouts are checked.
    pub sweep_interval_ms: u64,

    /// Publish a zip snapshot of the newest record after the run.
    pub publish_latest: bool,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            min_coverage: 0.05,
            subset: SubsetPolicy::default(),
            retry: RetryConfig::default(),
            overwrite_policy: OverwritePolicy::Reject,
            deadline_secs: None,
            late_arrival: LateArrivalPolicy::Discard,
            assembly_timeout_ms: None,
            concurrency: ConcurrencyConfig::default(),
            interpolation: InterpolationMethod::Bilinear,
            work_dir: PathBuf::from("/tmp/sat-convert"),
            retain_downloads: false,
            sweep_interval_ms: 250,
            publish_latest: true,
        }
    }
}

impl ConversionConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Override fields from environment variables that are set.
    pub fn apply_env(&mut self) {
        if let Some(val) = env_parse("CONVERSION_MIN_COVERAGE") {
            self.min_coverage = val;
        }
        if let Some(val) = env_parse("CONVERSION_DEADLINE_SECS") {
            self.deadline_secs = Some(val);
        }
        if let Some(val) = env_parse("CONVERSION_MAX_RETRIES") {
            self.retry.max_retries = val;
        }
        if let Ok(val) = std::env::var("CONVERSION_OVERWRITE_POLICY") {
            if let Some(policy) = OverwritePolicy::from_str(&val) {
                self.overwrite_policy = policy;
            }
        }
        if let Ok(val) = std::env::var("CONVERSION_WORK_DIR") {
            self.work_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("GRID_INTERPOLATION") {
            self.interpolation = InterpolationMethod::from_str(&val);
        }
        if let Some(val) = env_parse("CONVERSION_ACQUISITION_CONCURRENCY") {
            self.concurrency.acquisition = val;
        }
        if let Some(val) = env_parse("CONVERSION_PROCESSING_CONCURRENCY") {
            self.concurrency.processing = val;
        }
    }

    /// Validate the configuration for a run over `channel_count` channels.
    pub fn validate(&self, channel_count: usize) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.min_coverage) {
            return Err(format!(
                "min_coverage must be within 0..=1, got {}",
                self.min_coverage
            ));
        }

        if let Some(min) = self.subset.min_channels {
            if min == 0 || min > channel_count {
                return Err(format!(
                    "subset.min_channels must be within 1..={}, got {}",
                    channel_count, min
                ));
            }
        }

        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err("retry.initial_delay_ms must not exceed retry.max_delay_ms".to_string());
        }

        let c = &self.concurrency;
        for (stage, limit) in [
            ("acquisition", c.acquisition),
            ("processing", c.processing),
            ("writer", c.writer),
        ] {
            if !(1..=MAX_CONCURRENCY).contains(&limit) {
                return Err(format!(
                    "concurrency.{} must be within 1..={}, got {}",
                    stage, MAX_CONCURRENCY, limit
                ));
            }
        }

        if self.deadline_secs == Some(0) {
            return Err("deadline_secs must be positive".to_string());
        }

        if self.assembly_timeout_ms == Some(0) {
            return Err("assembly_timeout_ms must be positive".to_string());
        }

        if self.sweep_interval_ms == 0 {
            return Err("sweep_interval_ms must be positive".to_string());
        }

        Ok(())
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }

    pub fn assembly_timeout(&self) -> Option<Duration> {
        self.assembly_timeout_ms.map(Duration::from_millis)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Minimum-subset policy for assembling a timestep.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubsetPolicy {
    /// Channels needed for a partial record; `None` requires all of them.
    pub min_channels: Option<usize>,
    /// How long to wait for the rest once the subset is met.
    pub wait_secs: u64,
}

impl Default for SubsetPolicy {
    fn default() -> Self {
        Self {
            min_channels: None,
            wait_secs: 300,
        }
    }
}

/// Retry bounds for transient acquisition failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    /// First backoff delay; doubles each retry.
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay_ms: 2_000,
            max_delay_ms: 120_000,
        }
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Independent concurrency limits per stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub acquisition: usize,
    /// Decode and resample (CPU bound).
    pub processing: usize,
    pub writer: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            acquisition: 4,
            processing: 2,
            writer: 2,
        }
    }
}

/// What to do when a timestep already has a committed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverwritePolicy {
    #[default]
    Reject,
    Overwrite,
}

impl OverwritePolicy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "reject" => Some(Self::Reject),
            "overwrite" => Some(Self::Overwrite),
            _ => None,
        }
    }
}

/// Handling of channels that arrive after their timestep was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LateArrivalPolicy {
    /// Log and discard the channel.
    #[default]
    Discard,
    /// Return the timestep to awaiting with the channels it already had.
    Reopen,
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ConversionConfig::default();
        assert!(config.validate(3).is_ok());
        assert_eq!(config.overwrite_policy, OverwritePolicy::Reject);
        assert_eq!(config.late_arrival, LateArrivalPolicy::Discard);
        assert_eq!(config.retry.initial_delay(), Duration::from_secs(2));
        assert!(config.deadline().is_none());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = ConversionConfig {
            min_coverage: 1.5,
            ..Default::default()
        };
        assert!(config.validate(3).is_err());

        config.min_coverage = 0.5;
        config.subset.min_channels = Some(4);
        assert!(config.validate(3).is_err());
        config.subset.min_channels = Some(0);
        assert!(config.validate(3).is_err());
        config.subset.min_channels = Some(2);
        assert!(config.validate(3).is_ok());

        config.concurrency.writer = 0;
        assert!(config.validate(3).is_err());
        config.concurrency.writer = 1;

        config.retry.initial_delay_ms = 10_000;
        config.retry.max_delay_ms = 1_000;
        assert!(config.validate(3).is_err());
    }

    #[test]
    fn test_validation_caps_concurrency() {
        let mut config = ConversionConfig::default();
        config.concurrency.acquisition = MAX_CONCURRENCY;
        assert!(config.validate(3).is_ok());

        config.concurrency.acquisition = usize::MAX;
        let err = config.validate(3).unwrap_err();
        assert!(err.contains("concurrency.acquisition"));

        config.concurrency.acquisition = 4;
        config.concurrency.processing = MAX_CONCURRENCY + 1;
        assert!(config.validate(3).is_err());
    }

    #[test]
    fn test_assembly_timeout() {
        let mut config = ConversionConfig::default();
        assert!(config.assembly_timeout().is_none());
        config.assembly_timeout_ms = Some(0);
        assert!(config.validate(3).is_err());
        config.assembly_timeout_ms = Some(1_500);
        assert!(config.validate(3).is_ok());
        assert_eq!(config.assembly_timeout(), Some(Duration::from_millis(1_500)));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: ConversionConfig = serde_json::from_str(
            r#"{"overwrite_policy": "overwrite", "subset": {"min_channels": 2}, "late_arrival": "reopen"}"#,
        )
        .unwrap();
        assert_eq!(config.overwrite_policy, OverwritePolicy::Overwrite);
        assert_eq!(config.subset.min_channels, Some(2));
        assert_eq!(config.subset.wait_secs, 300);
        assert_eq!(config.late_arrival, LateArrivalPolicy::Reopen);
        assert_eq!(config.concurrency.acquisition, 4);
    }

    #[test]
    fn test_overwrite_policy_from_str() {
        assert_eq!(OverwritePolicy::from_str("Overwrite"), Some(OverwritePolicy::Overwrite));
        assert_eq!(OverwritePolicy::from_str("reject"), Some(OverwritePolicy::Reject));
        assert_eq!(OverwritePolicy::from_str("merge"), None);
    }
}
