//! Climate indices runner.
//!
//! Computes baseline percentile thresholds, runs chunked index computation
//! over daily Zarr stores, recombines chunk archives and extracts point
//! values.
//!
//! Exit codes: 0 on full success, 1 on a fatal error, 2 when any chunk failed
//! or the run was cancelled.

mod commands;
mod config_loader;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::error;

use config_loader::{load_runner_config, LogFormat, RunnerConfig};

#[derive(Parser, Debug)]
#[command(name = "indices-runner")]
#[command(about = "Annual climate indices over gridded daily Zarr stores")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "INDICES_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log level (overrides the config file)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format (overrides the config file)
    #[arg(long, value_enum, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compute day-of-year percentile thresholds over a baseline period
    Baseline {
        /// Directory containing the input stores
        #[arg(long)]
        data_root: Option<PathBuf>,

        /// First baseline year
        #[arg(long)]
        start: i32,

        /// Last baseline year
        #[arg(long)]
        end: i32,

        /// Baseline archive to write
        #[arg(short, long)]
        output: PathBuf,

        /// Width of the pooling window in days
        #[arg(long)]
        window_days: Option<usize>,
    },

    /// Show the temporal chunks a run would process
    Plan {
        /// Directory containing the input stores
        #[arg(long)]
        data_root: Option<PathBuf>,

        #[arg(long)]
        start: i32,

        #[arg(long)]
        end: i32,

        /// Comma-separated index names, used to size chunks
        #[arg(short, long, value_delimiter = ',', required = true)]
        indices: Vec<String>,

        /// Years per chunk (overrides the config file)
        #[arg(long)]
        chunk_years: Option<usize>,

        /// Directory checked for existing chunk archives
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Compute indices chunk by chunk, skipping chunks already on disk
    Run {
        #[arg(long)]
        data_root: Option<PathBuf>,

        #[arg(long)]
        output_dir: Option<PathBuf>,

        #[arg(long)]
        start: i32,

        #[arg(long)]
        end: i32,

        /// Comma-separated index names
        #[arg(short, long, value_delimiter = ',', required = true)]
        indices: Vec<String>,

        /// Baseline archive for percentile indices
        #[arg(long)]
        baseline: Option<PathBuf>,

        #[arg(long)]
        chunk_years: Option<usize>,

        #[arg(long)]
        workers: Option<usize>,

        /// Also write the run summary as JSON
        #[arg(long)]
        summary_json: Option<PathBuf>,
    },

    /// Concatenate chunk archives along time
    Combine {
        /// Directory holding indices_*.zarr chunk archives
        #[arg(long)]
        input_dir: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Sample an index archive at point locations
    Extract {
        /// Combined or chunk index archive
        #[arg(long)]
        archive: PathBuf,

        /// CSV file with id, latitude and longitude columns
        #[arg(long)]
        points: PathBuf,

        /// Name of the id column when it is not detected
        #[arg(long)]
        id_column: Option<String>,

        /// Comma-separated index names (default: all)
        #[arg(long, value_delimiter = ',')]
        indices: Vec<String>,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(long, value_enum, default_value = "long")]
        format: TableLayout,

        /// Leave Kelvin temperature indices unconverted
        #[arg(long)]
        keep_kelvin: bool,
    },
}

/// Layout of extracted point tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TableLayout {
    Long,
    Wide,
}

fn load_config(cli: &Cli) -> anyhow::Result<RunnerConfig> {
    let mut config = match &cli.config {
        Some(path) => load_runner_config(path)?,
        None => RunnerConfig::from_env(),
    };
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = logging::init_logging(&config.logging) {
        eprintln!("error: {e:#}");
        return ExitCode::from(1);
    }

    match commands::dispatch(cli.command, config).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Fatal error");
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "indices-runner",
            "--log-format",
            "pretty",
            "run",
            "--start",
            "1991",
            "--end",
            "2020",
            "--indices",
            "txx,tx90p",
            "--baseline",
            "/out/baseline.zarr",
        ])
        .unwrap();
        assert_eq!(cli.log_format, Some(LogFormat::Pretty));
        match cli.command {
            Commands::Run {
                start,
                end,
                indices,
                baseline,
                ..
            } => {
                assert_eq!((start, end), (1991, 2020));
                assert_eq!(indices, vec!["txx", "tx90p"]);
                assert_eq!(baseline, Some(PathBuf::from("/out/baseline.zarr")));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_extract_defaults() {
        let cli = Cli::try_parse_from([
            "indices-runner",
            "extract",
            "--archive",
            "indices.zarr",
            "--points",
            "points.csv",
            "-o",
            "values.csv",
        ])
        .unwrap();
        match cli.command {
            Commands::Extract {
                format,
                indices,
                keep_kelvin,
                ..
            } => {
                assert_eq!(format, TableLayout::Long);
                assert!(indices.is_empty());
                assert!(!keep_kelvin);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_plan() {
        let cli = Cli::try_parse_from([
            "indices-runner",
            "plan",
            "--data-root",
            "/data",
            "--start",
            "1981",
            "--end",
            "2020",
            "-i",
            "summer_days,r10mm",
        ])
        .unwrap();
        match cli.command {
            Commands::Plan {
                data_root, indices, ..
            } => {
                assert_eq!(data_root, Some(PathBuf::from("/data")));
                assert_eq!(indices, vec!["summer_days", "r10mm"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_run_requires_indices() {
        assert!(
            Cli::try_parse_from(["indices-runner", "run", "--start", "2001", "--end", "2002"])
                .is_err()
        );
    }
}
