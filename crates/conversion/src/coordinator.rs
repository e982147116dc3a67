//! Run coordinator: drives one conversion run end to end.
//!
//! Each source file is one unit of work flowing through
//! acquire → decode → resample → assemble. Every phase holds a permit from
//! its own stage semaphore, and the dispatcher itself waits for an in-flight
//! slot before starting a unit, so a saturated stage pushes back on the
//! catalog instead of buffering work in memory.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use sat_common::{GridDefinition, ResampledChannelFrame, SourceFileRef, TimeInterval, TimestepFrame};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::acquisition::{Acquirer, Transport};
use crate::assembler::{AssemblerPolicy, AssemblyEvent, TimestepAssembler};
use crate::catalog::SourceCatalog;
use crate::config::{ConversionConfig, OverwritePolicy};
use crate::decode::{decode_granule, InstrumentDecoder};
use crate::error::{ConversionError, Result};
use crate::ledger::{FileOutcome, RunLedger, RunReport, Stage, TimestepOutcome};
use crate::resample::{resample_channel, Resampler};
use crate::writer::{StoreBackend, StoreWriter};

const DEADLINE_REASON: &str = "run deadline reached";

type UnitResult = std::result::Result<ResampledChannelFrame, (Stage, ConversionError)>;

/// What to convert.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub interval: TimeInterval,
    pub step: chrono::Duration,
    /// Required channels, in record order.
    pub channels: Vec<String>,
    pub grid: GridDefinition,
    /// Overrides `deadline_secs` from the configuration.
    pub deadline: Option<Duration>,
}

/// External collaborators of a run.
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: SourceCatalog,
    pub transport: Arc<dyn Transport>,
    pub decoder: Arc<dyn InstrumentDecoder>,
    pub resampler: Arc<dyn Resampler>,
    pub store: Arc<dyn StoreBackend>,
}

/// Run a conversion and report the fate of every required timestep.
///
/// Never returns an error: run-fatal conditions (invalid configuration,
/// store unavailable, shape defects) produce a report with status `failed`.
#[instrument(skip_all, fields(run_id = tracing::field::Empty))]
pub async fn run_conversion(
    request: ConversionRequest,
    collaborators: Collaborators,
    config: ConversionConfig,
) -> RunReport {
    let run_id = Uuid::new_v4();
    tracing::Span::current().record("run_id", tracing::field::display(run_id));
    let started_at = Utc::now();
    let ledger = Arc::new(RunLedger::new());

    info!(
        start = %request.interval.start,
        end = %request.interval.end,
        step_secs = request.step.num_seconds(),
        channels = ?request.channels,
        "Starting conversion run"
    );

    let files = match validate(&request, &collaborators.catalog, &config) {
        Ok(files) => files,
        Err(e) => {
            error!(error = %e, "Run rejected before any I/O");
            return rejected(run_id, started_at, &request, &e);
        }
    };
    let required: Vec<DateTime<Utc>> = files
        .iter()
        .map(|f| f.timestamp)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let (files, to_assemble) =
        match skip_present(&files, &required, collaborators.store.as_ref(), &config, &ledger).await {
            Ok(split) => split,
            Err(e) => {
                error!(error = %e, "Store check failed");
                return RunReport::from_ledger(
                    run_id,
                    started_at,
                    &required,
                    &ledger,
                    Some(e.to_string()),
                    false,
                );
            }
        };

    let deadline = request.deadline.or_else(|| config.deadline());
    let publish_latest = config.publish_latest;
    let run = Arc::new(Run::new(
        &request,
        collaborators,
        config,
        to_assemble,
        ledger.clone(),
    ));

    let done = CancellationToken::new();
    let deadline_task = deadline.map(|limit| tokio::spawn(run.clone().watch_deadline(limit, done.clone())));
    let sweeper = tokio::spawn(run.clone().sweep(done.clone()));

    run.dispatch(files).await;

    done.cancel();
    if let Err(e) = sweeper.await {
        error!(error = %e, "Sweeper task failed");
    }
    if let Some(task) = deadline_task {
        let _ = task.await;
    }

    for event in run.assembler.finish() {
        run.handle_event(event).await;
    }

    let fatal = run.fatal();
    if publish_latest && fatal.is_none() {
        run.publish_latest().await;
    }

    let deadline_reached = run.deadline_reached.load(Ordering::SeqCst);
    let report = RunReport::from_ledger(run_id, started_at, &required, &ledger, fatal, deadline_reached);
    info!(status = %report.status, summary = %report.summary(), "Conversion run finished");
    report
}

/// Report for a run that could not start, e.g. because its store could not
/// be opened. Every nominal timestamp of the request is listed as dropped.
pub fn rejected_report(request: &ConversionRequest, error: &ConversionError) -> RunReport {
    error!(error = %error, "Run rejected before any I/O");
    rejected(Uuid::new_v4(), Utc::now(), request, error)
}

fn rejected(
    run_id: Uuid,
    started_at: DateTime<Utc>,
    request: &ConversionRequest,
    error: &ConversionError,
) -> RunReport {
    let required = request
        .interval
        .nominal_timestamps(request.step)
        .unwrap_or_default();
    RunReport::from_ledger(
        run_id,
        started_at,
        &required,
        &RunLedger::new(),
        Some(error.to_string()),
        false,
    )
}

/// Checks that need no I/O: configuration, grid and catalog.
fn validate(
    request: &ConversionRequest,
    catalog: &SourceCatalog,
    config: &ConversionConfig,
) -> Result<Vec<SourceFileRef>> {
    config
        .validate(request.channels.len())
        .map_err(ConversionError::InvalidConfiguration)?;
    request
        .grid
        .validate()
        .map_err(|e| ConversionError::invalid_config(e.to_string()))?;
    if request.deadline == Some(Duration::ZERO) {
        return Err(ConversionError::invalid_config("deadline must be positive"));
    }
    catalog.resolve(&request.interval, request.step, &request.channels)
}

/// Under the reject policy, record timesteps that are already committed and
/// skip their files. Returns the files to process and the timestamps to
/// assemble.
async fn skip_present(
    files: &[SourceFileRef],
    required: &[DateTime<Utc>],
    store: &dyn StoreBackend,
    config: &ConversionConfig,
    ledger: &RunLedger,
) -> Result<(Vec<SourceFileRef>, Vec<DateTime<Utc>>)> {
    if config.overwrite_policy == OverwritePolicy::Overwrite {
        return Ok((files.to_vec(), required.to_vec()));
    }

    let mut present = BTreeSet::new();
    for ts in required {
        if store.exists(*ts).await? {
            info!(timestamp = %ts, "Timestep already present, skipping");
            ledger.record_timestep(*ts, TimestepOutcome::AlreadyPresent);
            present.insert(*ts);
        }
    }

    let mut pending = Vec::with_capacity(files.len());
    for file in files {
        if present.contains(&file.timestamp) {
            ledger.record_file(
                file,
                FileOutcome::Skipped {
                    reason: "timestep already present".to_string(),
                },
            );
        } else {
            pending.push(file.clone());
        }
    }

    let remaining = required
        .iter()
        .filter(|ts| !present.contains(ts))
        .copied()
        .collect();
    Ok((pending, remaining))
}

/// Shared state of one run.
struct Run {
    grid: Arc<GridDefinition>,
    step: chrono::Duration,
    min_coverage: f64,
    sweep_interval: Duration,
    inflight_limit: usize,
    acquirer: Acquirer,
    decoder: Arc<dyn InstrumentDecoder>,
    resampler: Arc<dyn Resampler>,
    assembler: TimestepAssembler,
    writer: StoreWriter,
    ledger: Arc<RunLedger>,
    acquisition: Semaphore,
    processing: Semaphore,
    writing: Semaphore,
    /// Cancelled on deadline or fatal error: no new units start.
    cancel: CancellationToken,
    fatal: Mutex<Option<String>>,
    deadline_reached: AtomicBool,
}

impl Run {
    fn new(
        request: &ConversionRequest,
        collaborators: Collaborators,
        config: ConversionConfig,
        timestamps: Vec<DateTime<Utc>>,
        ledger: Arc<RunLedger>,
    ) -> Self {
        let policy = AssemblerPolicy::from_config(dedup(&request.channels), &config);
        let limits = &config.concurrency;
        Self {
            grid: Arc::new(request.grid.clone()),
            step: request.step,
            min_coverage: config.min_coverage,
            sweep_interval: config.sweep_interval(),
            inflight_limit: limits.acquisition + limits.processing,
            acquirer: Acquirer::new(
                collaborators.transport,
                config.retry.clone(),
                &config.work_dir,
                config.retain_downloads,
            ),
            decoder: collaborators.decoder,
            resampler: collaborators.resampler,
            assembler: TimestepAssembler::new(timestamps, policy),
            writer: StoreWriter::new(collaborators.store, config.overwrite_policy),
            ledger,
            acquisition: Semaphore::new(limits.acquisition),
            processing: Semaphore::new(limits.processing),
            writing: Semaphore::new(limits.writer),
            cancel: CancellationToken::new(),
            fatal: Mutex::new(None),
            deadline_reached: AtomicBool::new(false),
        }
    }

    /// Start one unit per file, waiting for an in-flight slot before each.
    async fn dispatch(self: &Arc<Self>, files: Vec<SourceFileRef>) {
        let inflight = Arc::new(Semaphore::new(self.inflight_limit));
        let mut units = JoinSet::new();
        let mut files = files.into_iter();

        while let Some(file) = files.next() {
            let permit = tokio::select! {
                permit = inflight.clone().acquire_owned() => permit.ok(),
                _ = self.cancel.cancelled() => None,
            };
            let Some(permit) = permit else {
                self.skip_unstarted(std::iter::once(file).chain(files.by_ref()));
                break;
            };

            let run = self.clone();
            units.spawn(async move {
                run.process_file(file).await;
                drop(permit);
            });
        }

        while let Some(result) = units.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Unit task failed");
            }
        }
    }

    fn skip_unstarted(&self, files: impl Iterator<Item = SourceFileRef>) {
        let reason = self.stop_reason();
        for file in files {
            self.ledger.record_file(
                &file,
                FileOutcome::Skipped {
                    reason: reason.clone(),
                },
            );
        }
    }

    #[instrument(skip_all, fields(identifier = %file.identifier))]
    async fn process_file(self: Arc<Self>, file: SourceFileRef) {
        let acquired = {
            let Ok(_permit) = self.acquisition.acquire().await else {
                return;
            };
            if self.cancel.is_cancelled() {
                self.skip_unstarted(std::iter::once(file));
                return;
            }
            self.acquirer.acquire(&file, &self.cancel).await
        };

        let local = match acquired {
            Ok(local) => local,
            Err(e) => {
                self.file_failed(&file, Stage::Acquisition, e).await;
                return;
            }
        };

        let processed = {
            let Ok(_permit) = self.processing.acquire().await else {
                local.release().await;
                return;
            };
            let decoder = self.decoder.clone();
            let resampler = self.resampler.clone();
            let grid = self.grid.clone();
            let path = local.path().to_path_buf();
            let unit = file.clone();
            let min_coverage = self.min_coverage;
            let step = self.step;

            tokio::task::spawn_blocking(move || -> UnitResult {
                let decoded = decode_granule(decoder.as_ref(), &path, &unit, step)
                    .map_err(|e| (Stage::Decode, e))?;
                resample_channel(resampler.as_ref(), &decoded, &grid, min_coverage)
                    .map_err(|e| (Stage::Resample, e))
            })
            .await
        };
        local.release().await;

        match processed {
            Ok(Ok(frame)) => {
                let event = self.assembler.deliver(frame, Instant::now());
                let outcome = match &event {
                    AssemblyEvent::Discarded { reason, .. } => FileOutcome::Skipped {
                        reason: reason.clone(),
                    },
                    _ => FileOutcome::Succeeded,
                };
                self.ledger.record_file(&file, outcome);
                self.handle_event(event).await;
            }
            Ok(Err((stage, e))) => self.file_failed(&file, stage, e).await,
            Err(e) => {
                let err = ConversionError::Decode {
                    identifier: file.identifier.clone(),
                    reason: format!("processing task failed: {}", e),
                };
                self.file_failed(&file, Stage::Decode, err).await;
            }
        }
    }

    async fn file_failed(&self, file: &SourceFileRef, stage: Stage, err: ConversionError) {
        if err.is_fatal() {
            self.ledger.record_file(
                file,
                FileOutcome::Failed {
                    stage,
                    reason: err.to_string(),
                },
            );
            self.abort(err);
            return;
        }

        warn!(identifier = %file.identifier, ?stage, error = %err, "File failed");
        self.ledger.record_file(
            file,
            FileOutcome::Failed {
                stage,
                reason: err.to_string(),
            },
        );
        let event = self.assembler.fail(file.timestamp, &file.channel, Instant::now());
        self.handle_event(event).await;
    }

    async fn handle_event(&self, event: AssemblyEvent) {
        match event {
            AssemblyEvent::Ready(frame) => self.commit(frame).await,
            AssemblyEvent::Dropped { timestamp, reason } => {
                self.ledger
                    .record_timestep(timestamp, TimestepOutcome::Dropped { reason });
            }
            AssemblyEvent::Pending { .. } | AssemblyEvent::Discarded { .. } => {}
        }
    }

    async fn commit(&self, frame: TimestepFrame) {
        let timestamp = frame.timestamp();
        let Ok(_permit) = self.writing.acquire().await else {
            return;
        };

        match self.writer.write(frame).await {
            Ok(out) if out.missing.is_empty() => {
                self.ledger.record_timestep(
                    timestamp,
                    TimestepOutcome::Committed {
                        channels: out.channels,
                    },
                );
            }
            Ok(out) => {
                self.ledger.record_timestep(
                    timestamp,
                    TimestepOutcome::Partial {
                        channels: out.channels,
                        missing: out.missing,
                    },
                );
            }
            Err(ConversionError::DuplicateTimestep(coordinate)) => {
                warn!(%coordinate, "Timestep committed by another writer");
                self.ledger
                    .record_timestep(timestamp, TimestepOutcome::AlreadyPresent);
            }
            Err(e) => {
                self.ledger.record_timestep(
                    timestamp,
                    TimestepOutcome::Failed {
                        reason: e.to_string(),
                    },
                );
                if e.is_fatal() {
                    self.abort(e);
                }
            }
        }
    }

    /// Stop the run on a fatal error.
    fn abort(&self, err: ConversionError) {
        error!(error = %err, "Aborting run");
        {
            let mut fatal = self.fatal.lock().unwrap_or_else(|p| p.into_inner());
            if fatal.is_none() {
                *fatal = Some(err.to_string());
            }
        }
        self.cancel.cancel();
        let reason = format!("run aborted: {}", err);
        for event in self.assembler.expire_all(&reason) {
            if let AssemblyEvent::Dropped { timestamp, reason } = event {
                self.ledger
                    .record_timestep(timestamp, TimestepOutcome::Dropped { reason });
            }
        }
    }

    /// Refresh the latest-record snapshot if this run wrote anything.
    async fn publish_latest(&self) {
        let wrote = self.ledger.final_outcomes().values().any(|o| {
            matches!(o, TimestepOutcome::Committed { .. } | TimestepOutcome::Partial { .. })
        });
        if !wrote {
            return;
        }
        match self.writer.backend().publish_latest().await {
            Ok(Some(timestamp)) => info!(%timestamp, "Latest snapshot refreshed"),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to publish latest snapshot"),
        }
    }

    fn fatal(&self) -> Option<String> {
        self.fatal.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn stop_reason(&self) -> String {
        match self.fatal() {
            Some(reason) => format!("run aborted: {}", reason),
            None => DEADLINE_REASON.to_string(),
        }
    }

    async fn watch_deadline(self: Arc<Self>, limit: Duration, done: CancellationToken) {
        tokio::select! {
            _ = tokio::time::sleep(limit) => {}
            _ = done.cancelled() => return,
        }

        warn!(deadline_secs = limit.as_secs_f64(), "Run deadline reached");
        self.deadline_reached.store(true, Ordering::SeqCst);
        self.cancel.cancel();
        for event in self.assembler.expire_all(DEADLINE_REASON) {
            self.handle_event(event).await;
        }
    }

    /// Periodically promote timesteps whose subset wait has elapsed.
    async fn sweep(self: Arc<Self>, done: CancellationToken) {
        let mut interval = tokio::time::interval(self.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    for event in self.assembler.poll_expired(Instant::now()) {
                        self.handle_event(event).await;
                    }
                }
                _ = done.cancelled() => break,
            }
        }
    }
}

fn dedup(channels: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    channels
        .iter()
        .map(|c| c.trim().to_string())
        .filter(|c| seen.insert(c.clone()))
        .collect()
}
