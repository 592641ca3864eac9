//! Zarr V3 writer for coordinate-labelled datasets.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};
use zarrs::array::{Array, ArrayBuilder, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs::group::GroupBuilder;
use zarrs_filesystem::FilesystemStore;

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::time::{date_to_epoch_days, DAYS_IN_LEAP_YEAR, TIME_CALENDAR, TIME_UNITS};
use crate::types::GridCoordinates;

/// Shape, chunking and attributes of one float32 data variable.
#[derive(Debug, Clone)]
pub struct VariableSpec {
    pub name: String,
    pub dims: [&'static str; 3],
    pub shape: [u64; 3],
    pub chunks: [u64; 3],
    pub attrs: Map<String, Value>,
}

impl VariableSpec {
    /// A `(time, lat, lon)` variable.
    pub fn time_lat_lon(
        name: impl Into<String>,
        n_time: usize,
        coords: &GridCoordinates,
        time_chunk: usize,
        spatial_chunk: usize,
        attrs: Map<String, Value>,
    ) -> Self {
        let (n_lat, n_lon) = coords.shape();
        Self {
            name: name.into(),
            dims: ["time", "lat", "lon"],
            shape: [n_time as u64, n_lat as u64, n_lon as u64],
            chunks: [
                time_chunk.clamp(1, n_time.max(1)) as u64,
                spatial_chunk.clamp(1, n_lat) as u64,
                spatial_chunk.clamp(1, n_lon) as u64,
            ],
            attrs,
        }
    }

    /// A `(lat, lon, dayofyear)` variable.
    pub fn lat_lon_doy(
        name: impl Into<String>,
        coords: &GridCoordinates,
        spatial_chunk: usize,
        attrs: Map<String, Value>,
    ) -> Self {
        let (n_lat, n_lon) = coords.shape();
        Self {
            name: name.into(),
            dims: ["lat", "lon", "dayofyear"],
            shape: [n_lat as u64, n_lon as u64, DAYS_IN_LEAP_YEAR as u64],
            chunks: [
                spatial_chunk.clamp(1, n_lat) as u64,
                spatial_chunk.clamp(1, n_lon) as u64,
                DAYS_IN_LEAP_YEAR as u64,
            ],
            attrs,
        }
    }
}

/// Result of committing an archive.
#[derive(Debug, Clone)]
pub struct WriteResult {
    /// Final location of the archive.
    pub path: PathBuf,
    /// Data variables written.
    pub variables: Vec<String>,
    /// Uncompressed bytes of data written (approximate).
    pub bytes_written: u64,
}

/// Writer for creating Zarr V3 dataset archives.
pub struct DatasetWriter {
    config: StoreConfig,
}

impl DatasetWriter {
    /// Create a new DatasetWriter with the given configuration.
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    /// Start a new archive destined for `final_path`.
    ///
    /// Nothing is visible at `final_path` until [`DatasetDraft::commit`].
    pub fn create(&self, final_path: &Path, attrs: Map<String, Value>) -> Result<DatasetDraft> {
        let parent = final_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;

        let temp_dir = tempfile::Builder::new()
            .prefix(".partial-")
            .tempdir_in(parent)?;
        let store = Arc::new(
            FilesystemStore::new(temp_dir.path())
                .map_err(|e| StoreError::write_failed(e.to_string()))?,
        );

        debug!(
            final_path = %final_path.display(),
            staging = %temp_dir.path().display(),
            "Staging archive"
        );

        Ok(DatasetDraft {
            config: self.config.clone(),
            final_path: final_path.to_path_buf(),
            temp_dir,
            store,
            attrs,
            variables: Vec::new(),
            arrays: HashMap::new(),
            bytes_written: 0,
        })
    }
}

/// An archive being assembled in a staging directory.
pub struct DatasetDraft {
    config: StoreConfig,
    final_path: PathBuf,
    temp_dir: tempfile::TempDir,
    store: Arc<FilesystemStore>,
    attrs: Map<String, Value>,
    variables: Vec<String>,
    arrays: HashMap<String, Array<FilesystemStore>>,
    bytes_written: u64,
}

impl DatasetDraft {
    /// Write the `lat` and `lon` coordinate arrays.
    pub fn write_coordinates(&mut self, coords: &GridCoordinates) -> Result<()> {
        self.write_f64_coordinate("lat", &coords.lat, "degrees_north")?;
        self.write_f64_coordinate("lon", &coords.lon, "degrees_east")
    }

    /// Write the `time` coordinate as days since the epoch.
    pub fn write_time(&mut self, dates: &[NaiveDate]) -> Result<()> {
        let values: Vec<i32> = dates.iter().map(|d| date_to_epoch_days(*d)).collect();
        let mut attrs = Map::new();
        attrs.insert("units".to_string(), json!(TIME_UNITS));
        attrs.insert("calendar".to_string(), json!(TIME_CALENDAR));
        self.write_i32_coordinate("time", &values, attrs)
    }

    /// Write the `dayofyear` coordinate (1..=366).
    pub fn write_day_of_year(&mut self) -> Result<()> {
        let values: Vec<i32> = (1..=DAYS_IN_LEAP_YEAR as i32).collect();
        self.write_i32_coordinate("dayofyear", &values, Map::new())
    }

    /// Create a data variable without writing any values yet.
    pub fn define_variable(&mut self, spec: VariableSpec) -> Result<()> {
        if self.arrays.contains_key(&spec.name) {
            return Err(StoreError::write_failed(format!(
                "variable '{}' defined twice",
                spec.name
            )));
        }

        let chunk_grid: zarrs::array::ChunkGrid = spec
            .chunks
            .to_vec()
            .try_into()
            .map_err(|e| StoreError::ConfigError(format!("{:?}", e)))?;

        let mut binding = ArrayBuilder::new(
            spec.shape.to_vec(),
            DataType::Float32,
            chunk_grid,
            FillValue::from(f32::NAN),
        );
        let mut builder = binding
            .attributes(spec.attrs.clone())
            .dimension_names(spec.dims.into());

        if let Some(codec) = self.config.data_codec()? {
            builder = builder.bytes_to_bytes_codecs(vec![codec]);
        }

        let array = builder
            .build(self.store.clone(), &format!("/{}", spec.name))
            .map_err(|e| StoreError::write_failed(e.to_string()))?;
        array
            .store_metadata()
            .map_err(|e| StoreError::write_failed(e.to_string()))?;

        self.variables.push(spec.name.clone());
        self.arrays.insert(spec.name, array);
        Ok(())
    }

    /// Write a block of values into a defined variable.
    pub fn write_block(
        &mut self,
        name: &str,
        start: [u64; 3],
        shape: [u64; 3],
        data: &[f32],
    ) -> Result<()> {
        let array = self.arrays.get(name).ok_or_else(|| {
            StoreError::write_failed(format!("variable '{name}' has not been defined"))
        })?;

        let expected: u64 = shape.iter().product();
        if expected != data.len() as u64 {
            return Err(StoreError::write_failed(format!(
                "block for '{name}' has {} values, shape {:?} needs {}",
                data.len(),
                shape,
                expected
            )));
        }

        let subset = ArraySubset::new_with_start_shape(start.to_vec(), shape.to_vec())
            .map_err(|e| StoreError::write_failed(e.to_string()))?;
        array
            .store_array_subset_elements(&subset, data)
            .map_err(|e| StoreError::write_failed(e.to_string()))?;

        self.bytes_written += (data.len() * std::mem::size_of::<f32>()) as u64;
        Ok(())
    }

    /// Define a variable and write all of its values at once.
    pub fn write_variable(&mut self, spec: VariableSpec, data: &[f32]) -> Result<()> {
        let name = spec.name.clone();
        let shape = spec.shape;
        self.define_variable(spec)?;
        self.write_block(&name, [0, 0, 0], shape, data)
    }

    /// Names of the variables defined so far.
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Store group metadata and move the archive into place.
    pub fn commit(self) -> Result<WriteResult> {
        let mut attrs = self.attrs;
        attrs.insert("variables".to_string(), json!(self.variables));

        let group = GroupBuilder::new()
            .attributes(attrs)
            .build(self.store.clone(), "/")
            .map_err(|e| StoreError::write_failed(e.to_string()))?;
        group
            .store_metadata()
            .map_err(|e| StoreError::write_failed(e.to_string()))?;

        drop(group);
        drop(self.arrays);
        drop(self.store);

        let staged = self.temp_dir.into_path();
        if let Err(e) = replace_dir(&staged, &self.final_path) {
            std::fs::remove_dir_all(&staged).ok();
            return Err(e);
        }

        debug!(
            path = %self.final_path.display(),
            variables = self.variables.len(),
            bytes = self.bytes_written,
            "Committed archive"
        );

        Ok(WriteResult {
            path: self.final_path,
            variables: self.variables,
            bytes_written: self.bytes_written,
        })
    }

    fn write_f64_coordinate(&mut self, name: &str, values: &[f64], units: &str) -> Result<()> {
        let mut attrs = Map::new();
        attrs.insert("units".to_string(), json!(units));

        let n = values.len().max(1) as u64;
        let chunk_grid: zarrs::array::ChunkGrid = vec![n]
            .try_into()
            .map_err(|e| StoreError::ConfigError(format!("{:?}", e)))?;
        let array = ArrayBuilder::new(
            vec![values.len() as u64],
            DataType::Float64,
            chunk_grid,
            FillValue::from(f64::NAN),
        )
        .attributes(attrs)
        .dimension_names([name].into())
        .build(self.store.clone(), &format!("/{name}"))
        .map_err(|e| StoreError::write_failed(e.to_string()))?;

        array
            .store_metadata()
            .map_err(|e| StoreError::write_failed(e.to_string()))?;
        let subset = ArraySubset::new_with_start_shape(vec![0], vec![values.len() as u64])
            .map_err(|e| StoreError::write_failed(e.to_string()))?;
        array
            .store_array_subset_elements(&subset, values)
            .map_err(|e| StoreError::write_failed(e.to_string()))?;
        Ok(())
    }

    fn write_i32_coordinate(
        &mut self,
        name: &str,
        values: &[i32],
        attrs: Map<String, Value>,
    ) -> Result<()> {
        let n = values.len().max(1) as u64;
        let chunk_grid: zarrs::array::ChunkGrid = vec![n]
            .try_into()
            .map_err(|e| StoreError::ConfigError(format!("{:?}", e)))?;
        let array = ArrayBuilder::new(
            vec![values.len() as u64],
            DataType::Int32,
            chunk_grid,
            FillValue::from(0i32),
        )
        .attributes(attrs)
        .dimension_names([name].into())
        .build(self.store.clone(), &format!("/{name}"))
        .map_err(|e| StoreError::write_failed(e.to_string()))?;

        array
            .store_metadata()
            .map_err(|e| StoreError::write_failed(e.to_string()))?;
        let subset = ArraySubset::new_with_start_shape(vec![0], vec![values.len() as u64])
            .map_err(|e| StoreError::write_failed(e.to_string()))?;
        array
            .store_array_subset_elements(&subset, values)
            .map_err(|e| StoreError::write_failed(e.to_string()))?;
        Ok(())
    }
}

/// Hidden sibling that holds the previous archive while it is replaced.
fn backup_path(target: &Path) -> PathBuf {
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    target.with_file_name(format!(".{}.replaced-{}", file_name, std::process::id()))
}

/// Move `staged` to `target`, replacing any existing directory only once the
/// new one is complete.
///
/// Replacement takes two renames. Between them `target` is briefly absent:
/// a concurrent reader sees either the old archive, no archive, or the new
/// one, never a partial write. A backup left by a crashed process with the
/// same pid is removed first.
fn replace_dir(staged: &Path, target: &Path) -> Result<()> {
    if !target.exists() {
        std::fs::rename(staged, target)
            .map_err(|e| StoreError::write_failed(format!("{}: {e}", target.display())))?;
        return Ok(());
    }

    let backup = backup_path(target);
    if backup.exists() {
        warn!(path = %backup.display(), "Removing stale archive backup");
        std::fs::remove_dir_all(&backup)
            .map_err(|e| StoreError::write_failed(format!("{}: {e}", backup.display())))?;
    }

    std::fs::rename(target, &backup)
        .map_err(|e| StoreError::write_failed(format!("{}: {e}", target.display())))?;
    if let Err(e) = std::fs::rename(staged, target) {
        // Put the previous archive back.
        std::fs::rename(&backup, target).ok();
        return Err(StoreError::write_failed(format!("{}: {e}", target.display())));
    }
    std::fs::remove_dir_all(&backup)?;
    Ok(())
}
