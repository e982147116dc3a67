//! Conversion pipeline for geostationary satellite granules.
//!
//! Turns raw instrument files into committed, multi-channel timestep records
//! on a fixed grid:
//!
//! ```text
//! SourceCatalog ──► Acquirer ──► InstrumentDecoder ──► Resampler (coverage gate)
//!                                                           │
//!                       StoreWriter ◄── TimestepAssembler ◄─┘
//!                     (stage + commit)  (per-timestamp slots)
//! ```
//!
//! [`run_conversion`] drives a whole run and always returns a [`RunReport`]
//! describing the fate of every required timestep.
//!
//! Every external collaborator sits behind a trait ([`Transport`],
//! [`InstrumentDecoder`], [`Resampler`], [`StoreBackend`]); default
//! implementations are provided for each.

pub mod acquisition;
pub mod assembler;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod decode;
pub mod error;
pub mod ledger;
pub mod resample;
pub mod writer;

pub use acquisition::{
    Acquirer, FetchedFile, HttpTransport, LocalFile, LocalTransport, Transport, TransportError,
};
pub use assembler::{AssemblerPolicy, AssemblyEvent, SlotSummary, TimestepAssembler};
pub use catalog::SourceCatalog;
pub use config::{
    ConcurrencyConfig, ConversionConfig, LateArrivalPolicy, OverwritePolicy, RetryConfig,
    SubsetPolicy, MAX_CONCURRENCY,
};
pub use coordinator::{rejected_report, run_conversion, Collaborators, ConversionRequest};
pub use decode::{decode_granule, DecodeFailure, InstrumentDecoder};
#[cfg(feature = "netcdf")]
pub use decode::GoesNetcdfDecoder;
pub use error::{ConversionError, Result};
pub use ledger::{
    FileOutcome, FileRecord, RunLedger, RunReport, RunStatus, Stage, TimestepOutcome,
    TimestepRecord,
};
pub use resample::{resample_channel, KernelResampler, Resampler};
pub use storage::CommitMode;
pub use writer::{ChunkStoreBackend, StagedRecord, StoreBackend, StoreWriter, WriteOutcome};
