//! Satellite conversion service.
//!
//! Reads a run file, converts every granule in the requested interval into
//! the record store and writes the run report as JSON. The exit code
//! reflects the run status: 0 success, 2 partial, 1 failed.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use conversion::{
    rejected_report, run_conversion, ChunkStoreBackend, Collaborators, ConversionError,
    ConversionRequest, HttpTransport, InstrumentDecoder, KernelResampler, LocalTransport,
    OverwritePolicy, RunReport, RunStatus, SourceCatalog, Transport,
};
use storage::{ChunkStore, StoreTarget};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use config::RunFile;

#[derive(Parser, Debug)]
#[command(name = "converter")]
#[command(about = "Convert geostationary satellite granules into a time-indexed record store")]
struct Args {
    /// Run file path
    #[arg(short, long, env = "CONVERTER_RUN_FILE", default_value = "/etc/converter/run.yaml")]
    config: PathBuf,

    /// Store target, overriding the run file
    #[arg(long, env = "CONVERTER_STORE")]
    store: Option<String>,

    /// Interval start (RFC 3339), overriding the run file
    #[arg(long)]
    start: Option<DateTime<Utc>>,

    /// Interval end (RFC 3339, exclusive), overriding the run file
    #[arg(long)]
    end: Option<DateTime<Utc>>,

    /// Replace records that are already committed
    #[arg(long)]
    overwrite: bool,

    /// Run deadline in seconds
    #[arg(long, env = "CONVERSION_DEADLINE_SECS")]
    deadline_secs: Option<u64>,

    /// Write the run report here instead of stdout
    #[arg(long, env = "CONVERTER_REPORT")]
    report: Option<PathBuf>,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!(run_file = %args.config.display(), "Starting satellite converter");

    let mut run = RunFile::load(&args.config)?;
    run.pipeline.apply_env();
    apply_overrides(&mut run, &args);

    let request = run.request()?;
    info!(
        channels = ?run.channels,
        start = %request.interval.start,
        end = %request.interval.end,
        store = %run.store,
        "Loaded run file"
    );

    let report = convert(&run, request).await;

    let json = serde_json::to_string_pretty(&report).context("Failed to serialize run report")?;
    match &args.report {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            info!(path = %path.display(), "Run report written");
        }
        None => println!("{}", json),
    }

    Ok(match report.status {
        RunStatus::Success => ExitCode::SUCCESS,
        RunStatus::Partial => {
            warn!(summary = %report.summary(), "Run finished with gaps");
            ExitCode::from(2)
        }
        RunStatus::Failed => ExitCode::FAILURE,
    })
}

fn apply_overrides(run: &mut RunFile, args: &Args) {
    if let Some(store) = &args.store {
        run.store = store.clone();
    }
    if let Some(start) = args.start {
        run.interval.start = start;
    }
    if let Some(end) = args.end {
        run.interval.end = end;
    }
    if args.overwrite {
        run.pipeline.overwrite_policy = OverwritePolicy::Overwrite;
    }
    if args.deadline_secs.is_some() {
        run.pipeline.deadline_secs = args.deadline_secs;
    }
}

/// Run the conversion. Failing to set up a collaborator still yields a
/// report, with status `failed`.
async fn convert(run: &RunFile, request: ConversionRequest) -> RunReport {
    match collaborators(run).await {
        Ok(collaborators) => run_conversion(request, collaborators, run.pipeline.clone()).await,
        Err(e) => rejected_report(&request, &e),
    }
}

async fn collaborators(run: &RunFile) -> conversion::Result<Collaborators> {
    let catalog = SourceCatalog::new(run.source.template.clone())?;

    let transport: Arc<dyn Transport> = if run.source.is_http() {
        Arc::new(HttpTransport::new(run.source.http_timeout()).map_err(|e| {
            ConversionError::invalid_config(format!("Failed to build HTTP client: {}", e))
        })?)
    } else {
        Arc::new(LocalTransport)
    };

    let target = StoreTarget::parse(&run.store)?;
    let store = ChunkStore::open(&target, run.grid.clone(), run.zarr.clone()).await?;

    Ok(Collaborators {
        catalog,
        transport,
        decoder: decoder(&run.source.decoder)?,
        resampler: Arc::new(KernelResampler::new(run.pipeline.interpolation)),
        store: Arc::new(ChunkStoreBackend::new(store)),
    })
}

fn decoder(name: &str) -> conversion::Result<Arc<dyn InstrumentDecoder>> {
    match name {
        #[cfg(feature = "netcdf")]
        "goes-abi-cmip" => Ok(Arc::new(conversion::GoesNetcdfDecoder)),
        #[cfg(not(feature = "netcdf"))]
        "goes-abi-cmip" => Err(ConversionError::invalid_config(format!(
            "decoder {} needs the `netcdf` feature",
            name
        ))),
        other => Err(ConversionError::invalid_config(format!(
            "unknown decoder {}",
            other
        ))),
    }
}
