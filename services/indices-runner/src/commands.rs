//! Subcommand implementations.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use climate_indices::baseline::{compute_baseline_thresholds, save_baseline};
use climate_indices::{
    combine, discover_chunk_files, extract, read_points_csv, write_long_csv,
    write_wide_csv, BaselineOptions, ChunkExecutor, ExtractOptions, IndexRegistry, RunRequest,
    RunSummary,
};
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use grid_store::store::is_store;
use grid_store::{StoreGroup, StoreLocator};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::config_loader::RunnerConfig;
use crate::{Commands, TableLayout};

/// Exit code when a run finished with failed or cancelled chunks.
const EXIT_INCOMPLETE: u8 = 2;

pub async fn dispatch(command: Commands, config: RunnerConfig) -> Result<ExitCode> {
    match command {
        Commands::Baseline {
            data_root,
            start,
            end,
            output,
            window_days,
        } => {
            let data_root = required(data_root, config.paths.data_root.clone(), "--data-root")?;
            blocking(move || baseline(config, data_root, start, end, output, window_days)).await
        }
        Commands::Plan {
            data_root,
            start,
            end,
            indices,
            chunk_years,
            output_dir,
        } => {
            let mut config = config;
            if let Some(years) = chunk_years {
                config.engine.chunk_years = years;
            }
            let output_dir = output_dir.or(config.paths.output_dir.clone());
            let request = RunRequest {
                data_root: required(data_root, config.paths.data_root.clone(), "--data-root")?,
                output_dir: output_dir.clone().unwrap_or_default(),
                start_year: start,
                end_year: end,
                indices,
                baseline: None,
            };
            blocking(move || plan(config, request, output_dir)).await
        }
        Commands::Run {
            data_root,
            output_dir,
            start,
            end,
            indices,
            baseline,
            chunk_years,
            workers,
            summary_json,
        } => {
            let mut config = config;
            if let Some(years) = chunk_years {
                config.engine.chunk_years = years;
            }
            if let Some(workers) = workers {
                config.engine.workers = workers;
            }
            let request = RunRequest {
                data_root: required(data_root, config.paths.data_root.clone(), "--data-root")?,
                output_dir: required(output_dir, config.paths.output_dir.clone(), "--output-dir")?,
                start_year: start,
                end_year: end,
                indices,
                baseline: baseline.or(config.paths.baseline.clone()),
            };
            run(config, request, summary_json).await
        }
        Commands::Combine { input_dir, output } => {
            blocking(move || {
                let files = discover_chunk_files(&input_dir)?;
                let result = combine(&files, &output, &config.engine.store)?;
                println!(
                    "Combined {} chunks ({} years, {} indices) into {}",
                    result.chunks,
                    result.years,
                    result.variables.len(),
                    result.path.display()
                );
                Ok(ExitCode::SUCCESS)
            })
            .await
        }
        Commands::Extract {
            archive,
            points,
            id_column,
            indices,
            output,
            format,
            keep_kelvin,
        } => {
            blocking(move || {
                let points = read_points_csv(&points, id_column.as_deref())?;
                let options = ExtractOptions {
                    convert_kelvin: !keep_kelvin,
                };
                let extraction = extract(&archive, &points, &indices, &options)?;
                match format {
                    TableLayout::Long => write_long_csv(&extraction, &output)?,
                    TableLayout::Wide => write_wide_csv(&extraction, &output)?,
                }
                println!(
                    "Extracted {} indices for {} points into {}",
                    extraction.indices.len(),
                    points.len(),
                    output.display()
                );
                Ok(ExitCode::SUCCESS)
            })
            .await
        }
    }
}

fn required(flag: Option<PathBuf>, configured: Option<PathBuf>, name: &str) -> Result<PathBuf> {
    flag.or(configured)
        .with_context(|| format!("{name} is required (flag or config file)"))
}

/// Run synchronous engine work off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("Worker task panicked")?
}

fn baseline(
    config: RunnerConfig,
    data_root: PathBuf,
    start: i32,
    end: i32,
    output: PathBuf,
    window_days: Option<usize>,
) -> Result<ExitCode> {
    let stores = StoreLocator::new(&data_root)
        .open(&[StoreGroup::Temperature, StoreGroup::Precipitation])?;
    let (Some(temperature), Some(precipitation)) = (
        stores.get(&StoreGroup::Temperature),
        stores.get(&StoreGroup::Precipitation),
    ) else {
        anyhow::bail!("temperature and precipitation stores are both required");
    };

    let mut options = BaselineOptions::from(&config.engine);
    if let Some(days) = window_days {
        options.window_days = days;
    }

    info!(
        data_root = %data_root.display(),
        start,
        end,
        window_days = options.window_days,
        "Computing baseline"
    );
    let thresholds =
        compute_baseline_thresholds(temperature, precipitation, start, end, &options)?;
    let written = save_baseline(&thresholds, &output, &config.engine.store)?;

    println!(
        "Wrote {} thresholds for {}-{} to {}",
        written.variables.len(),
        start,
        end,
        written.path.display()
    );
    Ok(ExitCode::SUCCESS)
}

/// Print the chunks `run` would process, clamped to the memory ceiling.
fn plan(config: RunnerConfig, request: RunRequest, output_dir: Option<PathBuf>) -> Result<ExitCode> {
    let registry = IndexRegistry::with_wet_day_threshold(config.engine.wet_day_threshold_mm);
    let chunks = ChunkExecutor::new(config.engine, registry).plan(&request)?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Chunk", "Years", "Archive", "State"]);
    for chunk in &chunks {
        let state = match &output_dir {
            Some(dir) if is_store(&dir.join(chunk.artifact_name())) => "done",
            Some(_) => "pending",
            None => "-",
        };
        table.add_row(vec![
            chunk.to_string(),
            chunk.years().to_string(),
            chunk.artifact_name(),
            state.to_string(),
        ]);
    }
    println!("{table}");
    Ok(ExitCode::SUCCESS)
}

async fn run(
    config: RunnerConfig,
    request: RunRequest,
    summary_json: Option<PathBuf>,
) -> Result<ExitCode> {
    let cancel = Arc::new(AtomicBool::new(false));
    let signal_flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current chunk");
            signal_flag.store(true, Ordering::SeqCst);
        }
    });

    let summary: RunSummary = blocking(move || {
        let registry = IndexRegistry::with_wet_day_threshold(config.engine.wet_day_threshold_mm);
        let executor = ChunkExecutor::new(config.engine, registry).with_cancel_flag(cancel);
        let prepared = executor.prepare(&request)?;

        let progress = ProgressBar::new(prepared.chunks.len() as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} chunks {msg}")?
                .progress_chars("##-"),
        );

        let summary = executor.execute(&prepared, |report| {
            progress.set_message(format!("{} {}", report.chunk, report.status.as_str()));
            progress.inc(1);
        })?;
        progress.finish_and_clear();
        Ok(summary)
    })
    .await?;

    println!("{}", summary.format_table());
    if let Some(path) = summary_json {
        write_summary(&summary, &path)?;
    }

    Ok(if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_INCOMPLETE)
    })
}

fn write_summary(summary: &RunSummary, path: &Path) -> Result<()> {
    let json = summary.format_json()?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write run summary to {}", path.display()))?;
    info!(path = %path.display(), "Wrote run summary");
    Ok(())
}
