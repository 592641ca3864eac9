//! Recombination of per-chunk archives into one result archive.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use grid_store::store::is_store;
use grid_store::time::year_span;
use grid_store::{DatasetWriter, LazyDataset, StoreConfig, VariableSpec};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{EngineError, Result};

/// Outcome of [`combine`].
#[derive(Debug, Clone)]
pub struct CombineResult {
    pub path: PathBuf,
    pub chunks: usize,
    pub years: usize,
    pub variables: Vec<String>,
}

/// Find `indices_*.zarr` chunk archives directly under `dir`, sorted by name.
pub fn discover_chunk_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| EngineError::config(format!("{}: {e}", dir.display())))?;
        let name = entry.file_name().to_string_lossy();
        if name.starts_with("indices_") && name.ends_with(".zarr") && is_store(entry.path()) {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();
    debug!(dir = %dir.display(), found = files.len(), "Discovered chunk archives");
    Ok(files)
}

/// Concatenate chunk archives along time into `output`.
///
/// Chunks are ordered by their first time value. Grids must be identical and
/// time must be strictly increasing across chunk boundaries. A variable absent
/// from a chunk is written as NaN for that chunk's years.
pub fn combine(chunk_files: &[PathBuf], output: &Path, config: &StoreConfig) -> Result<CombineResult> {
    if chunk_files.is_empty() {
        return Err(EngineError::config("no chunk archives to combine"));
    }

    let mut chunks = Vec::with_capacity(chunk_files.len());
    for path in chunk_files {
        let dataset = LazyDataset::open(path)?;
        let Some(first) = dataset.dates().first().copied() else {
            warn!(path = %path.display(), "Chunk archive has no time steps, ignoring");
            continue;
        };
        chunks.push((first, dataset));
    }
    if chunks.is_empty() {
        return Err(EngineError::validation("every chunk archive is empty"));
    }
    chunks.sort_by_key(|(first, _)| *first);

    let coords = chunks[0].1.coords().clone();
    for (_, chunk) in &chunks[1..] {
        chunk
            .coords()
            .ensure_matches(&coords, &chunk.path().display().to_string())
            .map_err(|e| EngineError::validation(e.to_string()))?;
    }

    for pair in chunks.windows(2) {
        let (prev, next) = (&pair[0].1, &pair[1].1);
        let last = prev.dates().last().copied();
        let first = next.dates().first().copied();
        if let (Some(last), Some(first)) = (last, first) {
            if first <= last {
                return Err(EngineError::validation(format!(
                    "chunks overlap: {} ends {last}, {} starts {first}",
                    prev.path().display(),
                    next.path().display()
                )));
            }
        }
    }

    // Union of variables; attributes from the first chunk that carries each.
    let mut variables: BTreeMap<String, Map<String, Value>> = BTreeMap::new();
    for (_, chunk) in &chunks {
        for name in chunk.variables() {
            if !variables.contains_key(&name) {
                let attrs = chunk.variable_attrs(&name)?;
                variables.insert(name, attrs);
            }
        }
    }

    let dates: Vec<NaiveDate> = chunks
        .iter()
        .flat_map(|(_, c)| c.dates().iter().copied())
        .collect();
    let n_time = dates.len();
    let (start_year, end_year) =
        year_span(&dates).ok_or_else(|| EngineError::validation("combined time axis is empty"))?;

    let mut attrs = Map::new();
    attrs.insert("start_year".to_string(), json!(start_year));
    attrs.insert("end_year".to_string(), json!(end_year));
    attrs.insert(
        "indices".to_string(),
        json!(variables.keys().collect::<Vec<_>>()),
    );
    attrs.insert("chunks".to_string(), json!(chunks.len()));

    let writer = DatasetWriter::new(config.clone());
    let mut draft = writer.create(output, attrs)?;
    draft.write_coordinates(&coords)?;
    draft.write_time(&dates)?;

    for (name, var_attrs) in &variables {
        draft.define_variable(VariableSpec::time_lat_lon(
            name,
            n_time,
            &coords,
            n_time,
            config.zarr_chunk_size,
            var_attrs.clone(),
        ))?;
    }

    let (n_lat, n_lon) = coords.shape();
    let full = coords.full_tile();
    let mut offset = 0usize;
    for (_, chunk) in &chunks {
        let steps = chunk.dates().len();
        let present = chunk.variables();
        for name in variables.keys() {
            let data = if present.contains(name) {
                chunk.variable(name)?.force_tile(full)?.data
            } else {
                warn!(
                    chunk = %chunk.path().display(),
                    variable = %name,
                    "Variable missing from chunk, filling with NaN"
                );
                vec![f32::NAN; steps * n_lat * n_lon]
            };
            draft.write_block(
                name,
                [offset as u64, 0, 0],
                [steps as u64, n_lat as u64, n_lon as u64],
                &data,
            )?;
        }
        offset += steps;
    }

    let written = draft.commit()?;
    info!(
        path = %written.path.display(),
        chunks = chunks.len(),
        years = n_time,
        variables = variables.len(),
        "Combined chunk archives"
    );

    Ok(CombineResult {
        path: written.path,
        chunks: chunks.len(),
        years: n_time,
        variables: variables.into_keys().collect(),
    })
}
