//! Lazy datasets and deferred grids.
//!
//! Opening a dataset reads only group metadata and coordinate arrays. Data is
//! read exclusively through [`DeferredGrid::force_tile`].

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::{Map, Value};
use tracing::{debug, trace};
use zarrs::array::Array;
use zarrs::array_subset::ArraySubset;
use zarrs::group::Group;
use zarrs_filesystem::FilesystemStore;

use crate::error::{Result, StoreError};
use crate::time::{epoch_days_to_date, is_strictly_increasing};
use crate::types::{f32_bytes, GridCoordinates, TileSeries, TileWindow};
use crate::units::Units;

/// Map a physical variable name onto its canonical name.
pub fn canonical_name(physical: &str) -> String {
    match physical.to_lowercase().as_str() {
        "tmax" | "tasmax" => "tasmax".to_string(),
        "tmin" | "tasmin" => "tasmin".to_string(),
        "tmean" | "tavg" | "tas" => "tas".to_string(),
        "ppt" | "prcp" | "precip" | "pr" => "pr".to_string(),
        "rh" | "hurs" => "hurs".to_string(),
        _ => physical.to_string(),
    }
}

/// Read access to a Zarr group archive.
pub struct ArchiveReader {
    path: PathBuf,
    store: Arc<FilesystemStore>,
    attrs: Map<String, Value>,
}

impl ArchiveReader {
    /// Open the group at `path`, reading only its metadata.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.join("zarr.json").is_file() {
            return Err(StoreError::open_failed(format!(
                "{} is not a Zarr group",
                path.display()
            )));
        }

        let store = Arc::new(
            FilesystemStore::new(path).map_err(|e| StoreError::open_failed(e.to_string()))?,
        );
        let group = Group::open(store.clone(), "/")
            .map_err(|e| StoreError::open_failed(format!("{}: {e}", path.display())))?;
        let attrs = group.attributes().clone();

        Ok(Self {
            path: path.to_path_buf(),
            store,
            attrs,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Group attributes.
    pub fn attrs(&self) -> &Map<String, Value> {
        &self.attrs
    }

    /// Data variables listed in the group's `variables` attribute.
    pub fn variables(&self) -> Vec<String> {
        self.attrs
            .get("variables")
            .and_then(|v| v.as_array())
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| n.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Open an array handle by name.
    pub fn array(&self, name: &str) -> Result<Array<FilesystemStore>> {
        if !self.path.join(name).join("zarr.json").is_file() {
            return Err(StoreError::MissingVariable {
                variable: name.to_string(),
                path: self.path.display().to_string(),
            });
        }
        Array::open(self.store.clone(), &format!("/{name}"))
            .map_err(|e| StoreError::open_failed(format!("{name}: {e}")))
    }

    /// Read the `lat` and `lon` coordinate vectors.
    pub fn read_coordinates(&self) -> Result<GridCoordinates> {
        GridCoordinates::new(self.read_f64("lat")?, self.read_f64("lon")?)
    }

    /// Read and decode the `time` coordinate.
    pub fn read_time(&self) -> Result<Vec<NaiveDate>> {
        self.read_i32("time")?
            .into_iter()
            .map(epoch_days_to_date)
            .collect()
    }

    /// Read a whole 1-D float64 array.
    pub fn read_f64(&self, name: &str) -> Result<Vec<f64>> {
        let array = self.array(name)?;
        let subset = whole(&array)?;
        array
            .retrieve_array_subset_elements(&subset)
            .map_err(|e| StoreError::read_failed(format!("{name}: {e}")))
    }

    /// Read a whole 1-D int32 array.
    pub fn read_i32(&self, name: &str) -> Result<Vec<i32>> {
        let array = self.array(name)?;
        let subset = whole(&array)?;
        array
            .retrieve_array_subset_elements(&subset)
            .map_err(|e| StoreError::read_failed(format!("{name}: {e}")))
    }

    /// Read a whole float32 array with its shape and attributes.
    pub fn read_f32(&self, name: &str) -> Result<(Vec<f32>, Vec<u64>, Map<String, Value>)> {
        let array = self.array(name)?;
        let subset = whole(&array)?;
        let data: Vec<f32> = array
            .retrieve_array_subset_elements(&subset)
            .map_err(|e| StoreError::read_failed(format!("{name}: {e}")))?;
        Ok((data, array.shape().to_vec(), array.attributes().clone()))
    }

    /// Parsed `units` attribute of an array; `Unknown` when absent.
    pub fn units(&self, name: &str) -> Result<Units> {
        let array = self.array(name)?;
        Ok(units_of(&array))
    }

    /// Attributes of an array.
    pub fn array_attrs(&self, name: &str) -> Result<Map<String, Value>> {
        Ok(self.array(name)?.attributes().clone())
    }
}

fn whole(array: &Array<FilesystemStore>) -> Result<ArraySubset> {
    let shape = array.shape().to_vec();
    ArraySubset::new_with_start_shape(vec![0; shape.len()], shape)
        .map_err(|e| StoreError::read_failed(e.to_string()))
}

fn units_of(array: &Array<FilesystemStore>) -> Units {
    array
        .attributes()
        .get("units")
        .and_then(|v| v.as_str())
        .map(Units::parse)
        .unwrap_or(Units::Unknown)
}

/// A dataset opened lazily, with an optional time window.
#[derive(Clone)]
pub struct LazyDataset {
    reader: Arc<ArchiveReader>,
    coords: Arc<GridCoordinates>,
    all_dates: Arc<[NaiveDate]>,
    window: Range<usize>,
    dates: Arc<[NaiveDate]>,
}

impl LazyDataset {
    /// Open a store reading only metadata and coordinates.
    pub fn open(path: &Path) -> Result<Self> {
        let reader = ArchiveReader::open(path)?;
        let coords = reader.read_coordinates()?;
        let dates = reader.read_time()?;

        if !is_strictly_increasing(&dates) {
            return Err(StoreError::invalid_metadata(format!(
                "{}: time coordinate is not strictly increasing",
                path.display()
            )));
        }

        debug!(
            path = %path.display(),
            lat = coords.lat.len(),
            lon = coords.lon.len(),
            time = dates.len(),
            "Opened lazy dataset"
        );

        let all_dates: Arc<[NaiveDate]> = dates.into();
        Ok(Self {
            reader: Arc::new(reader),
            coords: Arc::new(coords),
            window: 0..all_dates.len(),
            dates: all_dates.clone(),
            all_dates,
        })
    }

    pub fn path(&self) -> &Path {
        self.reader.path()
    }

    pub fn attrs(&self) -> &Map<String, Value> {
        self.reader.attrs()
    }

    pub fn coords(&self) -> &GridCoordinates {
        &self.coords
    }

    /// Dates in the current time window.
    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    /// Physical data variable names.
    pub fn variables(&self) -> Vec<String> {
        self.reader.variables()
    }

    /// The on-disk spatial chunk shape `(lat, lon)`.
    pub fn native_tile(&self) -> Result<(usize, usize)> {
        let (n_lat, n_lon) = self.coords.shape();
        let Some(first) = self.variables().into_iter().next() else {
            return Ok((n_lat, n_lon));
        };

        let array = self.reader.array(&first)?;
        let origin = vec![0u64; array.shape().len()];
        let chunk_shape = array
            .chunk_grid()
            .chunk_shape(&origin, array.shape())
            .map_err(|e| StoreError::invalid_metadata(e.to_string()))?
            .ok_or_else(|| StoreError::invalid_metadata("missing chunk shape"))?;

        if chunk_shape.len() != 3 {
            return Err(StoreError::invalid_metadata(format!(
                "variable '{first}' is not (time, lat, lon)"
            )));
        }
        Ok((
            chunk_shape[1].get() as usize,
            chunk_shape[2].get() as usize,
        ))
    }

    /// Narrow the time window to `start..=end`. No data is read.
    pub fn select_time(&self, start: NaiveDate, end: NaiveDate) -> Result<Self> {
        let current = &self.all_dates[self.window.clone()];
        let lo = current.partition_point(|d| *d < start);
        let hi = current.partition_point(|d| *d <= end);

        if start > end || lo >= hi {
            let available = match (current.first(), current.last()) {
                (Some(first), Some(last)) => format!("{first}..={last}"),
                _ => "empty".to_string(),
            };
            return Err(StoreError::EmptySelection {
                start: start.to_string(),
                end: end.to_string(),
                available,
            });
        }

        let window = self.window.start + lo..self.window.start + hi;
        trace!(path = %self.path().display(), ?window, "Selected time window");

        Ok(Self {
            reader: self.reader.clone(),
            coords: self.coords.clone(),
            all_dates: self.all_dates.clone(),
            dates: self.all_dates[window.clone()].into(),
            window,
        })
    }

    /// Attributes of a data variable.
    pub fn variable_attrs(&self, name: &str) -> Result<Map<String, Value>> {
        self.reader.array_attrs(name)
    }

    /// A deferred handle on a physical variable, values untouched when forced.
    pub fn variable(&self, name: &str) -> Result<DeferredGrid> {
        if !self.variables().iter().any(|v| v == name) {
            return Err(StoreError::MissingVariable {
                variable: name.to_string(),
                path: self.path().display().to_string(),
            });
        }
        let array = self.reader.array(name)?;
        let units = units_of(&array);

        let shape = array.shape();
        let (n_lat, n_lon) = self.coords.shape();
        if shape.len() != 3
            || shape[0] as usize != self.all_dates.len()
            || shape[1] as usize != n_lat
            || shape[2] as usize != n_lon
        {
            return Err(StoreError::invalid_metadata(format!(
                "variable '{name}' has shape {shape:?}, expected (time, lat, lon)"
            )));
        }

        Ok(DeferredGrid {
            name: name.to_string(),
            source: GridSource::Array {
                array: Arc::new(array),
                variable: name.to_string(),
            },
            target: units.clone(),
            units,
            dates: self.dates.clone(),
            time_offset: self.window.start,
            coords: self.coords.clone(),
        })
    }

    /// Deferred grids under canonical names, normalized to canonical units.
    ///
    /// `tas` is derived as the mean of `tasmax` and `tasmin` when the store
    /// has no mean-temperature variable.
    pub fn canonical(&self) -> Result<BTreeMap<String, DeferredGrid>> {
        let mut grids: BTreeMap<String, DeferredGrid> = BTreeMap::new();

        for physical in self.variables() {
            let canonical = canonical_name(&physical);
            // An already-canonical physical name wins over an alias.
            if grids.contains_key(&canonical) && physical != canonical {
                continue;
            }
            let grid = self.variable(&physical)?.normalized().renamed(&canonical);
            trace!(physical = %physical, canonical = %canonical, units = %grid.units, "Renamed variable");
            grids.insert(canonical, grid);
        }

        if !grids.contains_key("tas") {
            if let (Some(tasmax), Some(tasmin)) = (grids.get("tasmax"), grids.get("tasmin")) {
                let derived = DeferredGrid::mean("tas", tasmax.clone(), tasmin.clone());
                grids.insert("tas".to_string(), derived);
            }
        }

        Ok(grids)
    }
}

#[derive(Clone)]
enum GridSource {
    Array {
        array: Arc<Array<FilesystemStore>>,
        variable: String,
    },
    Mean(Box<DeferredGrid>, Box<DeferredGrid>),
}

/// A lazily-evaluated `(time, lat, lon)` grid.
#[derive(Clone)]
pub struct DeferredGrid {
    name: String,
    source: GridSource,
    units: Units,
    target: Units,
    dates: Arc<[NaiveDate]>,
    time_offset: usize,
    coords: Arc<GridCoordinates>,
}

impl fmt::Debug for DeferredGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredGrid")
            .field("name", &self.name)
            .field("units", &self.units)
            .field("target", &self.target)
            .field("time_steps", &self.dates.len())
            .finish()
    }
}

impl DeferredGrid {
    fn mean(name: &str, a: DeferredGrid, b: DeferredGrid) -> Self {
        Self {
            name: name.to_string(),
            units: a.target.clone(),
            target: a.target.clone(),
            dates: a.dates.clone(),
            time_offset: a.time_offset,
            coords: a.coords.clone(),
            source: GridSource::Mean(Box::new(a), Box::new(b)),
        }
    }

    fn renamed(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Convert temperatures to degC and precipitation to mm/day when forced.
    pub fn normalized(mut self) -> Self {
        self.target = if self.units.is_temperature() {
            Units::Celsius
        } else if self.units.is_precipitation() || self.units == Units::Millimeters {
            Units::MillimetersPerDay
        } else {
            self.units.clone()
        };
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Units stored on disk.
    pub fn source_units(&self) -> &Units {
        &self.units
    }

    /// Units of forced values.
    pub fn units(&self) -> &Units {
        &self.target
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn coords(&self) -> &GridCoordinates {
        &self.coords
    }

    /// True when this grid is computed from other variables.
    pub fn is_derived(&self) -> bool {
        matches!(self.source, GridSource::Mean(..))
    }

    /// Bytes held in memory while forcing `tile`.
    pub fn estimate_bytes(&self, tile: &TileWindow) -> u64 {
        let one = f32_bytes(self.dates.len(), tile.cells());
        match &self.source {
            GridSource::Array { .. } => one,
            GridSource::Mean(a, b) => one + a.estimate_bytes(tile) + b.estimate_bytes(tile),
        }
    }

    /// Read the time window × spatial tile into memory.
    pub fn force_tile(&self, tile: TileWindow) -> Result<TileSeries> {
        let (n_lat, n_lon) = self.coords.shape();
        if tile.lat_start + tile.lat_len > n_lat || tile.lon_start + tile.lon_len > n_lon {
            return Err(StoreError::read_failed(format!(
                "tile {tile:?} outside grid {n_lat}x{n_lon}"
            )));
        }

        let data = match &self.source {
            GridSource::Array { array, variable } => {
                let subset = ArraySubset::new_with_start_shape(
                    vec![
                        self.time_offset as u64,
                        tile.lat_start as u64,
                        tile.lon_start as u64,
                    ],
                    vec![
                        self.dates.len() as u64,
                        tile.lat_len as u64,
                        tile.lon_len as u64,
                    ],
                )
                .map_err(|e| StoreError::read_failed(e.to_string()))?;

                let mut data: Vec<f32> = array
                    .retrieve_array_subset_elements(&subset)
                    .map_err(|e| StoreError::read_failed(format!("{variable}: {e}")))?;
                self.units.convert_in_place(&self.target, &mut data)?;
                data
            }
            GridSource::Mean(a, b) => {
                let a = a.force_tile(tile)?;
                let b = b.force_tile(tile)?;
                if a.units != b.units {
                    return Err(StoreError::UnitConversion {
                        from: b.units.as_attr(),
                        to: a.units.as_attr(),
                    });
                }
                a.data
                    .iter()
                    .zip(&b.data)
                    .map(|(x, y)| (x + y) / 2.0)
                    .collect()
            }
        };

        trace!(
            variable = %self.name,
            lat_start = tile.lat_start,
            lon_start = tile.lon_start,
            cells = tile.cells(),
            time_steps = self.dates.len(),
            "Forced tile"
        );

        Ok(TileSeries {
            data,
            dates: self.dates.clone(),
            tile,
            units: self.target.clone(),
        })
    }
}
