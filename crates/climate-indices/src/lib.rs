//! Annual climate indices over gridded daily data.
//!
//! This crate computes ETCCDI-style indices from Zarr stores opened through
//! [`grid_store`]:
//!
//! - **Baseline**: day-of-year percentile thresholds pooled over a reference
//!   period, persisted once and shared read-only afterwards
//! - **Indicators**: a registry of typed index formulas, each reducing one
//!   cell-year of daily values to a single number
//! - **Execution**: the requested years are split into temporal chunks, each
//!   computed tile-parallel and persisted as its own archive, so an
//!   interrupted run resumes where it stopped
//! - **Post-processing**: chunk archives are recombined along time and
//!   sampled at point locations
//!
//! # Example
//!
//! ```ignore
//! use climate_indices::{ChunkExecutor, EngineConfig, IndexRegistry, RunRequest};
//!
//! let executor = ChunkExecutor::new(EngineConfig::from_env(), IndexRegistry::standard());
//! let summary = executor.run(&RunRequest {
//!     data_root: "/data".into(),
//!     output_dir: "/out".into(),
//!     start_year: 1991,
//!     end_year: 2020,
//!     indices: vec!["txx".into(), "tx90p".into()],
//!     baseline: Some("/out/baseline.zarr".into()),
//! })?;
//! println!("{}", summary.format_table());
//! ```

pub mod baseline;
pub mod combine;
pub mod config;
pub mod error;
pub mod executor;
pub mod extract;
pub mod indicators;
pub mod planner;
pub mod quantile;
pub mod summary;

pub use baseline::{
    compute_baseline_thresholds, load_baseline, save_baseline, BaselineOptions,
    BaselineThresholds, PercentileSpec, ThresholdArray,
};
pub use combine::{combine, discover_chunk_files, CombineResult};
pub use config::EngineConfig;
pub use error::{EngineError, IndexError, Result};
pub use executor::{ChunkExecutor, ChunkStage, PreparedRun, RunRequest};
pub use extract::{
    extract, read_points_csv, write_long_csv, write_wide_csv, ExtractOptions, Extraction,
    ExtractionRecord, Point,
};
pub use indicators::{IndexComputation, IndexKind, IndexRegistry};
pub use planner::{plan_chunks, MemoryBudget, TemporalChunk};
pub use quantile::QuantileMethod;
pub use summary::{ChunkReport, ChunkStatus, RunSummary};
