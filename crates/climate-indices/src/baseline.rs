//! Day-of-year percentile thresholds over a baseline period.
//!
//! For every pixel and every day of year, the values of a centered window of
//! consecutive days around each baseline date with that ordinal day are
//! pooled across all baseline years, and sample quantiles of the pool become
//! the thresholds. Precipitation pools only contain wet days.
//!
//! Work is split into spatial tiles that each hold the full baseline time
//! axis, processed in parallel on a bounded rayon pool.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDate;
use grid_store::time::{day_of_year, year_end, year_start, DAYS_IN_LEAP_YEAR};
use grid_store::{
    ArchiveReader, DatasetWriter, DeferredGrid, GridCoordinates, LazyDataset, StoreConfig,
    TileWindow, Units, VariableSpec, WriteResult,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::quantile::{prepare_pool, quantile_sorted, QuantileMethod};

/// Shortest baseline period accepted, in years.
pub const MIN_BASELINE_YEARS: i32 = 10;

/// One threshold to compute: a percentile of a canonical variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PercentileSpec {
    pub variable: String,
    pub percentile: u8,
    /// Pool only days at or above the wet-day threshold.
    #[serde(default)]
    pub wet_days: bool,
}

impl PercentileSpec {
    pub fn new(variable: &str, percentile: u8) -> Self {
        Self {
            variable: variable.to_string(),
            percentile,
            wet_days: false,
        }
    }

    pub fn wet(variable: &str, percentile: u8) -> Self {
        Self {
            wet_days: true,
            ..Self::new(variable, percentile)
        }
    }

    /// Name of the threshold array, e.g. `tasmax_p90`.
    pub fn name(&self) -> String {
        threshold_name(&self.variable, self.percentile)
    }

    fn description(&self) -> String {
        let long_name = match self.variable.as_str() {
            "tasmax" => "daily maximum temperature",
            "tasmin" => "daily minimum temperature",
            "tas" => "daily mean temperature",
            "pr" => "daily precipitation",
            other => other,
        };
        let suffix = if self.wet_days { " on wet days" } else { "" };
        format!(
            "{}th percentile of {}{}",
            self.percentile, long_name, suffix
        )
    }
}

/// `{variable}_p{percentile}`
pub fn threshold_name(variable: &str, percentile: u8) -> String {
    format!("{variable}_p{percentile}")
}

/// The thresholds computed when no catalog is configured.
pub fn default_catalog() -> Vec<PercentileSpec> {
    vec![
        PercentileSpec::new("tasmax", 90),
        PercentileSpec::new("tasmax", 10),
        PercentileSpec::new("tasmin", 90),
        PercentileSpec::new("tasmin", 10),
        PercentileSpec::wet("pr", 95),
        PercentileSpec::wet("pr", 99),
        PercentileSpec::new("tas", 25),
        PercentileSpec::new("tas", 75),
        PercentileSpec::wet("pr", 25),
        PercentileSpec::wet("pr", 75),
    ]
}

/// A `(lat, lon, dayofyear)` threshold array.
#[derive(Debug, Clone)]
pub struct ThresholdArray {
    pub name: String,
    pub variable: String,
    pub percentile: u8,
    pub units: Units,
    /// `[lat][lon][doy]`, 366 day-of-year slots per cell.
    pub data: Vec<f32>,
    pub attrs: Map<String, Value>,
}

impl ThresholdArray {
    /// The 366 day-of-year thresholds of one cell.
    pub fn cell(&self, n_lon: usize, y: usize, x: usize) -> &[f32] {
        let start = (y * n_lon + x) * DAYS_IN_LEAP_YEAR;
        &self.data[start..start + DAYS_IN_LEAP_YEAR]
    }
}

/// Persisted day-of-year thresholds. Read-only once computed.
#[derive(Debug, Clone)]
pub struct BaselineThresholds {
    pub coords: GridCoordinates,
    pub start_year: i32,
    pub end_year: i32,
    pub window_days: usize,
    pub thresholds: BTreeMap<String, ThresholdArray>,
}

impl BaselineThresholds {
    pub fn get(&self, name: &str) -> Option<&ThresholdArray> {
        self.thresholds.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.thresholds.keys().cloned().collect()
    }

    /// Thresholds of one cell in global grid indices.
    pub fn cell(&self, name: &str, y: usize, x: usize) -> Option<&[f32]> {
        let n_lon = self.coords.lon.len();
        self.thresholds.get(name).map(|t| t.cell(n_lon, y, x))
    }
}

/// Options for [`compute_baseline_thresholds`].
#[derive(Debug, Clone)]
pub struct BaselineOptions {
    pub window_days: usize,
    pub wet_day_threshold_mm: f32,
    pub quantile_method: QuantileMethod,
    pub catalog: Vec<PercentileSpec>,
    pub workers: usize,
    pub worker_memory_limit_bytes: u64,
    pub tile_shape: Option<(usize, usize)>,
}

impl Default for BaselineOptions {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for BaselineOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            window_days: config.window_days,
            wet_day_threshold_mm: config.wet_day_threshold_mm,
            quantile_method: config.quantile_method,
            catalog: config.percentiles.clone(),
            workers: config.workers,
            worker_memory_limit_bytes: config.worker_memory_limit_bytes(),
            tile_shape: config.tile_shape,
        }
    }
}

/// Catalog entries sharing one pool: same variable, same wet-day rule.
struct PoolGroup {
    variable: String,
    wet_days: bool,
    /// (catalog position, percentile)
    entries: Vec<(usize, u8)>,
}

fn group_catalog(catalog: &[PercentileSpec]) -> Vec<PoolGroup> {
    let mut groups: Vec<PoolGroup> = Vec::new();
    for (i, spec) in catalog.iter().enumerate() {
        match groups
            .iter_mut()
            .find(|g| g.variable == spec.variable && g.wet_days == spec.wet_days)
        {
            Some(group) => group.entries.push((i, spec.percentile)),
            None => groups.push(PoolGroup {
                variable: spec.variable.clone(),
                wet_days: spec.wet_days,
                entries: vec![(i, spec.percentile)],
            }),
        }
    }
    groups
}

/// Pool window values per day of year for one cell.
///
/// `doys` holds the 1-based ordinal day of each value. NaN values are not
/// pooled.
pub fn build_doy_pools(values: &[f32], doys: &[usize], half_window: usize) -> Vec<Vec<f32>> {
    let mut pools: Vec<Vec<f32>> = vec![Vec::new(); DAYS_IN_LEAP_YEAR];
    let n = values.len();
    for (i, doy) in doys.iter().enumerate().take(n) {
        let lo = i.saturating_sub(half_window);
        let hi = (i + half_window).min(n - 1);
        pools[doy - 1].extend(values[lo..=hi].iter().filter(|v| !v.is_nan()));
    }
    pools
}

/// Replace dry days with NaN.
pub fn mask_dry_days(values: &mut [f32], wet_day_threshold: f32) {
    for v in values.iter_mut() {
        if *v < wet_day_threshold {
            *v = f32::NAN;
        }
    }
}

/// Compute day-of-year percentile thresholds over `start_year..=end_year`.
pub fn compute_baseline_thresholds(
    temperature: &LazyDataset,
    precipitation: &LazyDataset,
    start_year: i32,
    end_year: i32,
    options: &BaselineOptions,
) -> Result<BaselineThresholds> {
    if end_year - start_year + 1 < MIN_BASELINE_YEARS {
        return Err(EngineError::validation(format!(
            "baseline {start_year}-{end_year} spans {} years, at least {MIN_BASELINE_YEARS} required",
            end_year - start_year + 1
        )));
    }
    if options.window_days == 0 || options.window_days % 2 == 0 {
        return Err(EngineError::config("window_days must be odd and > 0"));
    }
    if options.catalog.is_empty() {
        return Err(EngineError::config("percentile catalog is empty"));
    }

    temperature
        .coords()
        .ensure_matches(precipitation.coords(), "baseline stores")
        .map_err(|e| EngineError::validation(e.to_string()))?;

    let start = year_start(start_year)?;
    let end = year_end(end_year)?;
    let temperature = temperature.select_time(start, end)?;
    let precipitation = precipitation.select_time(start, end)?;

    let mut grids = temperature.canonical()?;
    for (name, grid) in precipitation.canonical()? {
        grids.entry(name).or_insert(grid);
    }

    let groups = group_catalog(&options.catalog);
    let mut group_grids = Vec::with_capacity(groups.len());
    for group in &groups {
        let grid = grids.get(&group.variable).ok_or_else(|| {
            EngineError::validation(format!(
                "percentile catalog references '{}', which no store provides",
                group.variable
            ))
        })?;
        group_grids.push(grid.clone());
    }

    let coords = temperature.coords().clone();
    let native = match options.tile_shape {
        Some(shape) => shape,
        None => temperature.native_tile()?,
    };
    let tile_shape = fit_tile(native, options.catalog.len(), &group_grids, options)?;
    let tiles = coords.tiles(tile_shape.0, tile_shape.1);

    info!(
        baseline_start = start_year,
        baseline_end = end_year,
        thresholds = options.catalog.len(),
        tiles = tiles.len(),
        tile_lat = tile_shape.0,
        tile_lon = tile_shape.1,
        workers = options.workers,
        "Computing baseline percentiles"
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.workers.max(1))
        .build()
        .map_err(|e| EngineError::ThreadPool(e.to_string()))?;

    let tile_results: Vec<(TileWindow, Vec<Vec<f32>>)> = pool.install(|| {
        tiles
            .par_iter()
            .map(|tile| -> Result<(TileWindow, Vec<Vec<f32>>)> {
                let values = compute_tile(*tile, &groups, &group_grids, options)?;
                metrics::counter!("baseline_tiles_computed").increment(1);
                Ok((*tile, values))
            })
            .collect::<Result<Vec<_>>>()
    })?;

    // Scatter tile-local results into full (lat, lon, doy) arrays.
    let (n_lat, n_lon) = coords.shape();
    let mut full: Vec<Vec<f32>> =
        vec![vec![f32::NAN; n_lat * n_lon * DAYS_IN_LEAP_YEAR]; options.catalog.len()];
    for (tile, per_entry) in tile_results {
        for (entry, local) in per_entry.into_iter().enumerate() {
            for y in 0..tile.lat_len {
                for x in 0..tile.lon_len {
                    let src = (y * tile.lon_len + x) * DAYS_IN_LEAP_YEAR;
                    let dst = ((tile.lat_start + y) * n_lon + tile.lon_start + x)
                        * DAYS_IN_LEAP_YEAR;
                    full[entry][dst..dst + DAYS_IN_LEAP_YEAR]
                        .copy_from_slice(&local[src..src + DAYS_IN_LEAP_YEAR]);
                }
            }
        }
    }

    let mut thresholds = BTreeMap::new();
    for (spec, data) in options.catalog.iter().zip(full) {
        let grid = &grids[&spec.variable];
        let mut attrs = Map::new();
        attrs.insert("units".to_string(), json!(grid.units().as_attr()));
        attrs.insert("description".to_string(), json!(spec.description()));
        attrs.insert(
            "baseline_period".to_string(),
            json!(format!("{start_year}-{end_year}")),
        );
        attrs.insert(
            "baseline_years".to_string(),
            json!(end_year - start_year + 1),
        );
        attrs.insert("window_days".to_string(), json!(options.window_days));
        attrs.insert("percentile".to_string(), json!(spec.percentile));
        attrs.insert("variable".to_string(), json!(spec.variable));
        attrs.insert(
            "quantile_method".to_string(),
            json!(options.quantile_method.as_str()),
        );
        if spec.wet_days {
            attrs.insert(
                "wet_day_threshold".to_string(),
                json!(options.wet_day_threshold_mm),
            );
        }

        thresholds.insert(
            spec.name(),
            ThresholdArray {
                name: spec.name(),
                variable: spec.variable.clone(),
                percentile: spec.percentile,
                units: grid.units().clone(),
                data,
                attrs,
            },
        );
    }

    info!(
        thresholds = thresholds.len(),
        "Baseline percentiles computed"
    );

    Ok(BaselineThresholds {
        coords,
        start_year,
        end_year,
        window_days: options.window_days,
        thresholds,
    })
}

/// Shrink a tile until one worker's footprint fits its memory limit.
fn fit_tile(
    start: (usize, usize),
    n_outputs: usize,
    grids: &[DeferredGrid],
    options: &BaselineOptions,
) -> Result<(usize, usize)> {
    let estimate = |lat: usize, lon: usize| -> u64 {
        let tile = TileWindow {
            lat_start: 0,
            lat_len: lat,
            lon_start: 0,
            lon_len: lon,
        };
        let input = grids
            .iter()
            .map(|g| g.estimate_bytes(&tile))
            .max()
            .unwrap_or(0);
        let output = (n_outputs * tile.cells() * DAYS_IN_LEAP_YEAR * 4) as u64;
        input + output
    };

    let (mut lat, mut lon) = (start.0.max(1), start.1.max(1));
    while estimate(lat, lon) > options.worker_memory_limit_bytes {
        if lat == 1 && lon == 1 {
            return Err(EngineError::resource(
                "baseline tile of one cell",
                estimate(1, 1),
                options.worker_memory_limit_bytes,
            ));
        }
        if lat >= lon {
            lat = (lat / 2).max(1);
        } else {
            lon = (lon / 2).max(1);
        }
    }
    if (lat, lon) != start {
        debug!(
            from_lat = start.0,
            from_lon = start.1,
            lat,
            lon,
            "Reduced baseline tile to fit worker memory"
        );
    }
    Ok((lat, lon))
}

/// Thresholds of one tile, one tile-local `[y][x][doy]` buffer per catalog entry.
fn compute_tile(
    tile: TileWindow,
    groups: &[PoolGroup],
    grids: &[DeferredGrid],
    options: &BaselineOptions,
) -> Result<Vec<Vec<f32>>> {
    let cells = tile.cells();
    let mut out: Vec<Vec<f32>> = vec![Vec::new(); options.catalog.len()];
    for group in groups {
        for (entry, _) in &group.entries {
            out[*entry] = vec![f32::NAN; cells * DAYS_IN_LEAP_YEAR];
        }
    }

    let half = options.window_days / 2;

    for (group, grid) in groups.iter().zip(grids) {
        let series = grid.force_tile(tile)?;
        let doys: Vec<usize> = series.dates.iter().map(|d: &NaiveDate| day_of_year(*d)).collect();

        for y in 0..tile.lat_len {
            for x in 0..tile.lon_len {
                let mut values = series.cell_series(y, x);
                if group.wet_days {
                    mask_dry_days(&mut values, options.wet_day_threshold_mm);
                }

                let mut pools = build_doy_pools(&values, &doys, half);
                let base = (y * tile.lon_len + x) * DAYS_IN_LEAP_YEAR;
                for (d, pool) in pools.iter_mut().enumerate() {
                    prepare_pool(pool);
                    for (entry, pct) in &group.entries {
                        out[*entry][base + d] =
                            quantile_sorted(pool, *pct as f64 / 100.0, options.quantile_method);
                    }
                }
            }
        }

        debug!(
            variable = %group.variable,
            lat_start = tile.lat_start,
            lon_start = tile.lon_start,
            cells,
            "Baseline tile pooled"
        );
        drop(series);
    }

    Ok(out)
}

/// Persist thresholds as one `(lat, lon, dayofyear)` archive.
pub fn save_baseline(
    thresholds: &BaselineThresholds,
    path: &Path,
    config: &StoreConfig,
) -> Result<WriteResult> {
    let mut attrs = Map::new();
    attrs.insert("kind".to_string(), json!("baseline_thresholds"));
    attrs.insert("baseline_start".to_string(), json!(thresholds.start_year));
    attrs.insert("baseline_end".to_string(), json!(thresholds.end_year));
    attrs.insert("window_days".to_string(), json!(thresholds.window_days));

    let writer = DatasetWriter::new(config.clone());
    let mut draft = writer.create(path, attrs)?;
    draft.write_coordinates(&thresholds.coords)?;
    draft.write_day_of_year()?;

    for (name, array) in &thresholds.thresholds {
        let spec = VariableSpec::lat_lon_doy(
            name.clone(),
            &thresholds.coords,
            config.zarr_chunk_size,
            array.attrs.clone(),
        );
        draft.write_variable(spec, &array.data)?;
    }

    let result = draft.commit()?;
    info!(
        path = %result.path.display(),
        thresholds = result.variables.len(),
        "Baseline archive written"
    );
    Ok(result)
}

/// Load a baseline archive written by [`save_baseline`].
pub fn load_baseline(path: &Path) -> Result<BaselineThresholds> {
    let reader = ArchiveReader::open(path)?;
    let coords = reader.read_coordinates()?;
    let attrs = reader.attrs();

    let int_attr = |key: &str| -> Result<i64> {
        attrs.get(key).and_then(|v| v.as_i64()).ok_or_else(|| {
            EngineError::validation(format!(
                "{}: baseline archive is missing '{key}'",
                path.display()
            ))
        })
    };
    let start_year = int_attr("baseline_start")? as i32;
    let end_year = int_attr("baseline_end")? as i32;
    let window_days = int_attr("window_days")? as usize;

    let (n_lat, n_lon) = coords.shape();
    let mut thresholds = BTreeMap::new();
    for name in reader.variables() {
        let (data, shape, array_attrs) = reader.read_f32(&name)?;
        if shape != [n_lat as u64, n_lon as u64, DAYS_IN_LEAP_YEAR as u64] {
            return Err(EngineError::validation(format!(
                "threshold '{name}' has shape {shape:?}, expected ({n_lat}, {n_lon}, {DAYS_IN_LEAP_YEAR})"
            )));
        }

        let variable = array_attrs
            .get("variable")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| name.rsplit_once("_p").map(|(v, _)| v).unwrap_or(&name).to_string());
        let percentile = array_attrs
            .get("percentile")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u8;
        let units = array_attrs
            .get("units")
            .and_then(|v| v.as_str())
            .map(Units::parse)
            .unwrap_or(Units::Unknown);

        thresholds.insert(
            name.clone(),
            ThresholdArray {
                name,
                variable,
                percentile,
                units,
                data,
                attrs: array_attrs,
            },
        );
    }

    debug!(
        path = %path.display(),
        thresholds = thresholds.len(),
        "Loaded baseline archive"
    );

    Ok(BaselineThresholds {
        coords,
        start_year,
        end_year,
        window_days,
        thresholds,
    })
}
