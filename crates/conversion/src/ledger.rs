//! Run ledger: the append-only record of what happened to every file and
//! every required timestep.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use metrics::counter;
use sat_common::{coordinate_key, SourceFileRef};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pipeline stage a file failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Acquisition,
    Decode,
    Resample,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FileOutcome {
    Succeeded,
    Failed { stage: Stage, reason: String },
    Skipped { reason: String },
}

impl FileOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed { .. } => "failed",
            Self::Skipped { .. } => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub identifier: String,
    pub channel: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: FileOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TimestepOutcome {
    Committed { channels: Vec<String> },
    Partial { channels: Vec<String>, missing: Vec<String> },
    Dropped { reason: String },
    Failed { reason: String },
    AlreadyPresent,
}

impl TimestepOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Committed { .. } => "committed",
            Self::Partial { .. } => "partial",
            Self::Dropped { .. } => "dropped",
            Self::Failed { .. } => "failed",
            Self::AlreadyPresent => "already_present",
        }
    }

    /// Whether the store holds a complete record for the timestep.
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Committed { .. } | Self::AlreadyPresent)
    }

    /// Whether the store holds any record for the timestep, partial included.
    pub fn is_stored(&self) -> bool {
        matches!(
            self,
            Self::Committed { .. } | Self::Partial { .. } | Self::AlreadyPresent
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestepRecord {
    pub timestamp: DateTime<Utc>,
    pub coordinate: String,
    #[serde(flatten)]
    pub outcome: TimestepOutcome,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Default)]
struct LedgerEntries {
    files: Vec<FileRecord>,
    timesteps: Vec<TimestepRecord>,
}

/// Shared, append-only ledger. Every write takes the lock for a single push.
#[derive(Default)]
pub struct RunLedger {
    entries: Mutex<LedgerEntries>,
}

impl RunLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_file(&self, file: &SourceFileRef, outcome: FileOutcome) {
        counter!("conversion_files_total", "outcome" => outcome.label()).increment(1);
        self.lock().files.push(FileRecord {
            identifier: file.identifier.clone(),
            channel: file.channel.clone(),
            timestamp: file.timestamp,
            outcome,
        });
    }

    pub fn record_timestep(&self, timestamp: DateTime<Utc>, outcome: TimestepOutcome) {
        counter!("conversion_timesteps_total", "outcome" => outcome.label()).increment(1);
        self.lock().timesteps.push(TimestepRecord {
            timestamp,
            coordinate: coordinate_key(timestamp),
            outcome,
            recorded_at: Utc::now(),
        });
    }

    pub fn files(&self) -> Vec<FileRecord> {
        self.lock().files.clone()
    }

    pub fn timesteps(&self) -> Vec<TimestepRecord> {
        self.lock().timesteps.clone()
    }

    /// Latest outcome per timestamp.
    pub fn final_outcomes(&self) -> BTreeMap<DateTime<Utc>, TimestepOutcome> {
        self.lock()
            .timesteps
            .iter()
            .map(|r| (r.timestamp, r.outcome.clone()))
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerEntries> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Final result of a run, serializable for external reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Run-fatal condition, if any.
    pub fatal: Option<String>,
    pub deadline_reached: bool,
    /// Every required timestamp with its final outcome.
    pub timesteps: BTreeMap<String, TimestepOutcome>,
    pub files: Vec<FileRecord>,
    /// Full append-only history, including superseded outcomes.
    pub history: Vec<TimestepRecord>,
}

impl RunReport {
    /// Build the report from the ledger.
    ///
    /// Any timestamp in `required` without an outcome is reported as dropped
    /// so that no timestep is silently missing.
    pub fn from_ledger(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        required: &[DateTime<Utc>],
        ledger: &RunLedger,
        fatal: Option<String>,
        deadline_reached: bool,
    ) -> Self {
        let mut outcomes = ledger.final_outcomes();
        for ts in required {
            outcomes.entry(*ts).or_insert_with(|| TimestepOutcome::Dropped {
                reason: match &fatal {
                    Some(reason) => format!("run aborted: {}", reason),
                    None => "never resolved".to_string(),
                },
            });
        }

        let status = if fatal.is_some() {
            RunStatus::Failed
        } else if deadline_reached && !outcomes.values().any(|o| o.is_stored()) {
            RunStatus::Failed
        } else if outcomes.values().all(|o| o.is_complete()) {
            RunStatus::Success
        } else {
            RunStatus::Partial
        };

        Self {
            run_id,
            status,
            started_at,
            finished_at: Utc::now(),
            fatal,
            deadline_reached,
            timesteps: outcomes
                .into_iter()
                .map(|(ts, outcome)| (coordinate_key(ts), outcome))
                .collect(),
            files: ledger.files(),
            history: ledger.timesteps(),
        }
    }

    /// Number of timesteps whose final outcome matches `label`
    /// (`committed`, `partial`, `dropped`, `failed`, `already_present`).
    pub fn count(&self, label: &str) -> usize {
        self.timesteps.values().filter(|o| o.label() == label).count()
    }

    pub fn outcome(&self, timestamp: DateTime<Utc>) -> Option<&TimestepOutcome> {
        self.timesteps.get(&coordinate_key(timestamp))
    }

    /// One-line human summary.
    pub fn summary(&self) -> String {
        format!(
            "status={} committed={} partial={} already_present={} dropped={} failed={}",
            self.status,
            self.count("committed"),
            self.count("partial"),
            self.count("already_present"),
            self.count("dropped"),
            self.count("failed")
        )
    }
}
