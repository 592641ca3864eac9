//! Temporal-chunked streaming executor.
//!
//! Each chunk moves through a fixed sequence of stages:
//!
//! ```text
//! OpenLazy → SelectTimeRange → RenameVariables → ComputeIndices → PersistChunk → ReleaseMemory
//! ```
//!
//! Chunks run one after another; within `ComputeIndices` spatial tiles run in
//! parallel on a bounded rayon pool. A chunk whose archive already exists is
//! skipped, so an interrupted run resumes where it stopped.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use grid_store::store::is_store;
use grid_store::time::{day_of_year, year_start};
use grid_store::{
    ArchiveReader, DatasetWriter, DeferredGrid, GridCoordinates, LazyDataset, StoreError,
    StoreGroup, StoreLocator, TileSeries, TileWindow, VariableSpec,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use tracing::{debug, error, info, warn};

use crate::baseline::{load_baseline, BaselineThresholds};
use crate::config::EngineConfig;
use crate::error::{EngineError, IndexError, Result};
use crate::indicators::{
    compute_index_tile, year_groups, IndexComputation, IndexRegistry, TileInputs, YearGroup,
};
use crate::planner::{plan_chunks, MemoryBudget, TemporalChunk};
use crate::summary::{ChunkReport, ChunkStatus, RunSummary};

/// What to compute and where.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    /// Directory searched for input stores.
    pub data_root: PathBuf,
    /// Directory receiving `indices_{start}_{end}.zarr` archives.
    pub output_dir: PathBuf,
    pub start_year: i32,
    pub end_year: i32,
    /// Index names to compute.
    pub indices: Vec<String>,
    /// Baseline archive, required by percentile indices.
    pub baseline: Option<PathBuf>,
}

/// Stages of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStage {
    OpenLazy,
    SelectTimeRange,
    RenameVariables,
    ComputeIndices,
    PersistChunk,
    ReleaseMemory,
}

/// A validated run ready to execute.
pub struct PreparedRun {
    pub request: RunRequest,
    pub indices: Vec<Arc<dyn IndexComputation>>,
    pub variables: Vec<String>,
    pub groups: Vec<StoreGroup>,
    pub coords: GridCoordinates,
    pub thresholds: Option<Arc<BaselineThresholds>>,
    pub chunks: Vec<TemporalChunk>,
    pub tile_shape: (usize, usize),
}

impl PreparedRun {
    pub fn index_names(&self) -> Vec<String> {
        self.indices.iter().map(|i| i.name().to_string()).collect()
    }

    pub fn artifact_path(&self, chunk: &TemporalChunk) -> PathBuf {
        self.request.output_dir.join(chunk.artifact_name())
    }
}

/// Indices and stores a request resolves to.
struct ResolvedInputs {
    indices: Vec<Arc<dyn IndexComputation>>,
    variables: Vec<String>,
    groups: Vec<StoreGroup>,
    stores: BTreeMap<StoreGroup, LazyDataset>,
    coords: GridCoordinates,
}

/// Computed values of one index for a whole chunk, `[year][lat][lon]`.
struct IndexResult {
    index: Arc<dyn IndexComputation>,
    data: Vec<f32>,
}

/// Runs index computations chunk by chunk.
pub struct ChunkExecutor {
    config: EngineConfig,
    registry: IndexRegistry,
    cancel: Arc<AtomicBool>,
}

impl ChunkExecutor {
    pub fn new(config: EngineConfig, registry: IndexRegistry) -> Self {
        Self {
            config,
            registry,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share an externally owned cancellation flag.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Flag checked at every chunk boundary.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Chunks a request would run, after the memory ceiling clamp.
    ///
    /// Resolves indices and stores like [`ChunkExecutor::prepare`] but does
    /// not load a baseline.
    pub fn plan(&self, request: &RunRequest) -> Result<Vec<TemporalChunk>> {
        let inputs = self.resolve_inputs(request)?;
        self.plan_for(request, &inputs.coords, inputs.variables.len())
    }

    /// Validate a request before any chunk is computed.
    pub fn prepare(&self, request: &RunRequest) -> Result<PreparedRun> {
        let ResolvedInputs {
            indices,
            variables,
            groups,
            stores,
            coords,
        } = self.resolve_inputs(request)?;

        let needs_thresholds = indices.iter().any(|i| !i.thresholds().is_empty());
        let thresholds = match &request.baseline {
            Some(path) => {
                let baseline = load_baseline(path)?;
                baseline
                    .coords
                    .ensure_matches(&coords, "baseline thresholds vs input stores")
                    .map_err(|e| EngineError::validation(e.to_string()))?;
                Some(Arc::new(baseline))
            }
            None if needs_thresholds => {
                let names: Vec<&str> = indices
                    .iter()
                    .filter(|i| !i.thresholds().is_empty())
                    .map(|i| i.name())
                    .collect();
                return Err(EngineError::validation(format!(
                    "percentile indices {} require a baseline archive",
                    names.join(", ")
                )));
            }
            None => None,
        };

        let chunks = self.plan_for(request, &coords, variables.len())?;

        let tile_shape = match self.config.tile_shape {
            Some(shape) => shape,
            None => match stores.values().next() {
                Some(store) => store.native_tile()?,
                None => coords.shape(),
            },
        };

        info!(
            indices = indices.len(),
            variables = ?variables,
            stores = groups.len(),
            chunks = chunks.len(),
            tile_lat = tile_shape.0,
            tile_lon = tile_shape.1,
            baseline = thresholds.is_some(),
            "Run prepared"
        );

        Ok(PreparedRun {
            request: request.clone(),
            indices,
            variables,
            groups,
            coords,
            thresholds,
            chunks,
            tile_shape,
        })
    }

    fn resolve_inputs(&self, request: &RunRequest) -> Result<ResolvedInputs> {
        self.config.validate().map_err(EngineError::config)?;

        if request.indices.is_empty() {
            return Err(EngineError::config("no indices requested"));
        }
        let indices = self.registry.resolve(&request.indices)?;

        let variables: Vec<String> = indices
            .iter()
            .flat_map(|i| i.required_inputs().iter().map(|v| v.to_string()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut groups = Vec::new();
        for variable in &variables {
            let group = StoreGroup::for_variable(variable).ok_or_else(|| {
                EngineError::config(format!("no store group provides variable '{variable}'"))
            })?;
            if !groups.contains(&group) {
                groups.push(group);
            }
        }
        groups.sort();

        let stores = StoreLocator::new(&request.data_root).open(&groups)?;
        let coords = ensure_shared_coords(&stores)?;

        Ok(ResolvedInputs {
            indices,
            variables,
            groups,
            stores,
            coords,
        })
    }

    fn plan_for(
        &self,
        request: &RunRequest,
        coords: &GridCoordinates,
        variables: usize,
    ) -> Result<Vec<TemporalChunk>> {
        let budget = MemoryBudget::new(self.config.memory_limit_bytes());
        let chunk_years = budget.clamp(self.config.chunk_years, coords, variables);
        debug!(configured = self.config.chunk_years, chunk_years, "Chunk length");
        plan_chunks(request.start_year, request.end_year, chunk_years)
    }

    /// Validate and execute a request.
    pub fn run(&self, request: &RunRequest) -> Result<RunSummary> {
        let prepared = self.prepare(request)?;
        self.execute(&prepared, |_| {})
    }

    /// Execute a prepared run, reporting each chunk as it finishes.
    pub fn execute<F>(&self, prepared: &PreparedRun, mut on_chunk: F) -> Result<RunSummary>
    where
        F: FnMut(&ChunkReport),
    {
        std::fs::create_dir_all(&prepared.request.output_dir)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .build()
            .map_err(|e| EngineError::ThreadPool(e.to_string()))?;

        let expected = prepared.index_names();
        let mut summary = RunSummary::default();

        for chunk in &prepared.chunks {
            let artifact = prepared.artifact_path(chunk);

            if self.cancel.load(Ordering::SeqCst) {
                warn!(chunk = %chunk, "Run cancelled before chunk");
                summary.cancelled = true;
                let report = ChunkReport {
                    chunk: *chunk,
                    status: ChunkStatus::Cancelled,
                    artifact,
                    indices_expected: expected.clone(),
                    indices_produced: Vec::new(),
                    error: None,
                    elapsed_secs: 0.0,
                };
                on_chunk(&report);
                summary.chunks.push(report);
                continue;
            }

            let started = Instant::now();
            let report = if is_store(&artifact) {
                info!(chunk = %chunk, path = %artifact.display(), "Chunk archive exists, skipping");
                metrics::counter!("indices_chunks_skipped").increment(1);
                ChunkReport {
                    chunk: *chunk,
                    status: ChunkStatus::Skipped,
                    indices_produced: existing_indices(&artifact),
                    artifact,
                    indices_expected: expected.clone(),
                    error: None,
                    elapsed_secs: 0.0,
                }
            } else {
                match self.process_chunk(prepared, chunk, &artifact, &pool) {
                    Ok(produced) => {
                        metrics::counter!("indices_chunks_completed").increment(1);
                        ChunkReport {
                            chunk: *chunk,
                            status: ChunkStatus::Completed,
                            artifact,
                            indices_expected: expected.clone(),
                            indices_produced: produced,
                            error: None,
                            elapsed_secs: started.elapsed().as_secs_f64(),
                        }
                    }
                    Err(e) if e.is_fatal() => {
                        error!(chunk = %chunk, error = %e, "Chunk failed fatally, aborting run");
                        return Err(e);
                    }
                    Err(e) => {
                        error!(chunk = %chunk, error = %e, "Chunk failed");
                        metrics::counter!("indices_chunks_failed").increment(1);
                        ChunkReport {
                            chunk: *chunk,
                            status: ChunkStatus::Failed,
                            artifact,
                            indices_expected: expected.clone(),
                            indices_produced: Vec::new(),
                            error: Some(e.to_string()),
                            elapsed_secs: started.elapsed().as_secs_f64(),
                        }
                    }
                }
            };

            on_chunk(&report);
            summary.chunks.push(report);
        }

        info!(
            completed = summary.count(ChunkStatus::Completed),
            skipped = summary.count(ChunkStatus::Skipped),
            failed = summary.count(ChunkStatus::Failed),
            cancelled = summary.cancelled,
            "Run finished"
        );
        Ok(summary)
    }

    fn process_chunk(
        &self,
        prepared: &PreparedRun,
        chunk: &TemporalChunk,
        artifact: &Path,
        pool: &rayon::ThreadPool,
    ) -> Result<Vec<String>> {
        stage(chunk, ChunkStage::OpenLazy);
        let stores = StoreLocator::new(&prepared.request.data_root).open(&prepared.groups)?;

        stage(chunk, ChunkStage::SelectTimeRange);
        let (start, end) = (chunk.start_date()?, chunk.end_date()?);
        let mut windows = BTreeMap::new();
        for (group, store) in &stores {
            store
                .coords()
                .ensure_matches(&prepared.coords, group.as_str())
                .map_err(|e| EngineError::validation(e.to_string()))?;
            windows.insert(*group, store.select_time(start, end)?);
        }
        let dates: Arc<[NaiveDate]> = shared_dates(&windows)?;

        stage(chunk, ChunkStage::RenameVariables);
        let mut grids: BTreeMap<String, DeferredGrid> = BTreeMap::new();
        for window in windows.values() {
            for (name, grid) in window.canonical()? {
                if prepared.variables.contains(&name) {
                    debug!(
                        chunk = %chunk,
                        variable = %name,
                        source_units = %grid.source_units(),
                        derived = grid.is_derived(),
                        "Input variable"
                    );
                    grids.entry(name).or_insert(grid);
                }
            }
        }
        for variable in &prepared.variables {
            if !grids.contains_key(variable) {
                warn!(chunk = %chunk, variable = %variable, "Input variable not found in stores");
            }
        }

        stage(chunk, ChunkStage::ComputeIndices);
        let years = year_groups(&dates);
        let results = self.compute_indices(prepared, chunk, &grids, &dates, &years, pool)?;
        if results.is_empty() {
            return Err(EngineError::Store(StoreError::write_failed(format!(
                "chunk {chunk}: no index could be computed"
            ))));
        }

        stage(chunk, ChunkStage::PersistChunk);
        let produced = self.persist_chunk(prepared, chunk, artifact, &years, &results)?;

        stage(chunk, ChunkStage::ReleaseMemory);
        drop(results);
        drop(grids);
        drop(windows);
        drop(stores);

        Ok(produced)
    }

    fn compute_indices(
        &self,
        prepared: &PreparedRun,
        chunk: &TemporalChunk,
        grids: &BTreeMap<String, DeferredGrid>,
        dates: &Arc<[NaiveDate]>,
        years: &[YearGroup],
        pool: &rayon::ThreadPool,
    ) -> Result<Vec<IndexResult>> {
        let (tile_lat, tile_lon) = prepared.tile_shape;
        let tiles = prepared.coords.tiles(tile_lat, tile_lon);
        let limit = self.config.worker_memory_limit_bytes();

        // Largest tile bounds every worker's footprint.
        if let Some(largest) = tiles.iter().max_by_key(|t| t.cells()) {
            let inputs: u64 = grids.values().map(|g| g.estimate_bytes(largest)).sum();
            let outputs = (prepared.indices.len() * years.len() * largest.cells() * 4) as u64;
            if inputs + outputs > limit {
                return Err(EngineError::resource(
                    format!(
                        "chunk {chunk} tile of {}x{} cells",
                        largest.lat_len, largest.lon_len
                    ),
                    inputs + outputs,
                    limit,
                ));
            }
        }

        let doys: Vec<usize> = dates.iter().map(|d| day_of_year(*d)).collect();

        type TileOutput = (TileWindow, Vec<std::result::Result<Vec<f32>, IndexError>>);
        let tile_outputs: Vec<TileOutput> = pool.install(|| {
            tiles
                .par_iter()
                .map(|tile| -> Result<TileOutput> {
                    let mut series: BTreeMap<String, TileSeries> = BTreeMap::new();
                    for (name, grid) in grids {
                        series.insert(name.clone(), grid.force_tile(*tile)?);
                    }
                    let forced_bytes: usize = series.values().map(TileSeries::memory_bytes).sum();
                    let inputs = TileInputs {
                        tile: *tile,
                        series,
                        thresholds: prepared.thresholds.clone(),
                        years: years.to_vec(),
                        doys: doys.clone(),
                    };
                    let per_index = prepared
                        .indices
                        .iter()
                        .map(|index| compute_index_tile(index.as_ref(), &inputs))
                        .collect();
                    debug!(
                        chunk = %chunk,
                        lat_start = tile.lat_start,
                        lon_start = tile.lon_start,
                        cells = tile.cells(),
                        forced_bytes,
                        "Tile computed"
                    );
                    Ok((*tile, per_index))
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let (n_lat, n_lon) = prepared.coords.shape();
        let mut results = Vec::new();
        'index: for (i, index) in prepared.indices.iter().enumerate() {
            let mut data = vec![f32::NAN; years.len() * n_lat * n_lon];
            for (tile, per_index) in &tile_outputs {
                let local = match &per_index[i] {
                    Ok(local) => local,
                    Err(e) => {
                        warn!(
                            chunk = %chunk,
                            index = index.name(),
                            error = %e,
                            "Index failed, omitting from chunk"
                        );
                        metrics::counter!("indices_index_failures").increment(1);
                        continue 'index;
                    }
                };
                scatter_tile(&mut data, local, tile, years.len(), n_lat, n_lon);
            }
            metrics::counter!("indices_computed").increment(1);
            results.push(IndexResult {
                index: index.clone(),
                data,
            });
        }

        Ok(results)
    }

    fn persist_chunk(
        &self,
        prepared: &PreparedRun,
        chunk: &TemporalChunk,
        artifact: &Path,
        years: &[YearGroup],
        results: &[IndexResult],
    ) -> Result<Vec<String>> {
        let produced: Vec<String> = results
            .iter()
            .map(|r| r.index.name().to_string())
            .collect();

        let mut attrs = Map::new();
        attrs.insert("start_year".to_string(), json!(chunk.start_year));
        attrs.insert("end_year".to_string(), json!(chunk.end_year));
        attrs.insert("indices".to_string(), json!(produced));
        attrs.insert("frequency".to_string(), json!("YS"));

        let time: Vec<NaiveDate> = years
            .iter()
            .map(|g| year_start(g.year))
            .collect::<std::result::Result<_, _>>()?;

        let writer = DatasetWriter::new(self.config.store.clone());
        let mut draft = writer.create(artifact, attrs)?;
        draft.write_coordinates(&prepared.coords)?;
        draft.write_time(&time)?;

        for result in results {
            let index = &result.index;
            let spec = VariableSpec::time_lat_lon(
                index.name(),
                years.len(),
                &prepared.coords,
                years.len(),
                self.config.store.zarr_chunk_size,
                index_attrs(index.as_ref()),
            );
            draft.write_variable(spec, &result.data)?;
        }

        let written = draft.commit()?;
        info!(
            chunk = %chunk,
            path = %written.path.display(),
            indices = produced.len(),
            bytes = written.bytes_written,
            "Chunk persisted"
        );
        Ok(produced)
    }
}

/// Attributes written on every index variable.
pub fn index_attrs(index: &dyn IndexComputation) -> Map<String, serde_json::Value> {
    let mut attrs = Map::new();
    attrs.insert("units".to_string(), json!(index.units().as_attr()));
    attrs.insert("index_kind".to_string(), json!(index.kind().as_str()));
    attrs.insert("description".to_string(), json!(index.description()));
    attrs
}

fn stage(chunk: &TemporalChunk, stage: ChunkStage) {
    info!(chunk = %chunk, stage = ?stage, "Chunk stage");
}

fn scatter_tile(
    data: &mut [f32],
    local: &[f32],
    tile: &TileWindow,
    n_years: usize,
    n_lat: usize,
    n_lon: usize,
) {
    let cells = tile.cells();
    for yi in 0..n_years {
        for y in 0..tile.lat_len {
            let src = yi * cells + y * tile.lon_len;
            let dst = yi * n_lat * n_lon + (tile.lat_start + y) * n_lon + tile.lon_start;
            data[dst..dst + tile.lon_len].copy_from_slice(&local[src..src + tile.lon_len]);
        }
    }
}

fn ensure_shared_coords(stores: &BTreeMap<StoreGroup, LazyDataset>) -> Result<GridCoordinates> {
    let mut iter = stores.iter();
    let (first_group, first) = iter
        .next()
        .ok_or_else(|| EngineError::config("no input stores"))?;
    for (group, store) in iter {
        store
            .coords()
            .ensure_matches(
                first.coords(),
                &format!("{} vs {}", group.as_str(), first_group.as_str()),
            )
            .map_err(|e| EngineError::validation(e.to_string()))?;
    }
    Ok(first.coords().clone())
}

fn shared_dates(windows: &BTreeMap<StoreGroup, LazyDataset>) -> Result<Arc<[NaiveDate]>> {
    let mut iter = windows.values();
    let first = iter
        .next()
        .ok_or_else(|| EngineError::config("no input stores"))?;
    for other in iter {
        if other.dates() != first.dates() {
            return Err(EngineError::Store(StoreError::CoordinateMismatch(format!(
                "time axes of {} and {} differ",
                first.path().display(),
                other.path().display()
            ))));
        }
    }
    Ok(first.dates().to_vec().into())
}

fn existing_indices(artifact: &Path) -> Vec<String> {
    match ArchiveReader::open(artifact) {
        Ok(reader) => reader.variables(),
        Err(e) => {
            warn!(path = %artifact.display(), error = %e, "Could not read existing chunk archive");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scatter_tile() {
        let mut data = vec![0.0; 2 * 3 * 4];
        let tile = TileWindow {
            lat_start: 1,
            lat_len: 2,
            lon_start: 2,
            lon_len: 2,
        };
        let local: Vec<f32> = (1..=8).map(|v| v as f32).collect();
        scatter_tile(&mut data, &local, &tile, 2, 3, 4);

        // year 0
        assert_eq!(&data[4 + 2..4 + 4], &[1.0, 2.0]);
        assert_eq!(&data[8 + 2..8 + 4], &[3.0, 4.0]);
        // year 1
        assert_eq!(&data[12 + 4 + 2..12 + 4 + 4], &[5.0, 6.0]);
        assert_eq!(&data[12 + 8 + 2..12 + 8 + 4], &[7.0, 8.0]);
        assert_eq!(data.iter().filter(|v| **v == 0.0).count(), 16);
    }

    #[test]
    fn test_index_attrs() {
        let registry = IndexRegistry::standard();
        let dtr = registry.get("dtr").unwrap();
        let attrs = index_attrs(dtr.as_ref());
        assert_eq!(attrs["index_kind"], "temperature_difference");
        assert_eq!(attrs["units"], "delta_degC");
    }
}
