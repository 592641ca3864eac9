//! Synthetic daily stores for tests.
//!
//! Stores are written through [`DatasetWriter`] so they have exactly the
//! layout real inputs have: `time`, `lat`, `lon` coordinates plus
//! `(time, lat, lon)` float32 variables carrying a `units` attribute.

use std::path::Path;

use chrono::NaiveDate;
use serde_json::{json, Map};

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::types::GridCoordinates;
use crate::units::Units;
use crate::writer::{DatasetWriter, VariableSpec, WriteResult};

/// Regular test coordinates: latitude descending from 45°N, longitude
/// ascending from 100°W, 0.5° spacing.
pub fn test_coords(n_lat: usize, n_lon: usize) -> GridCoordinates {
    GridCoordinates {
        lat: (0..n_lat).map(|i| 45.0 - i as f64 * 0.5).collect(),
        lon: (0..n_lon).map(|i| -100.0 + i as f64 * 0.5).collect(),
    }
}

/// Builder for a synthetic daily store.
pub struct DailyStoreBuilder {
    coords: GridCoordinates,
    dates: Vec<NaiveDate>,
    spatial_chunk: usize,
    variables: Vec<(String, Units, Vec<f32>)>,
    attrs: Map<String, serde_json::Value>,
}

impl DailyStoreBuilder {
    pub fn new(coords: GridCoordinates, dates: Vec<NaiveDate>) -> Self {
        Self {
            coords,
            dates,
            spatial_chunk: 64,
            variables: Vec::new(),
            attrs: Map::new(),
        }
    }

    /// On-disk spatial chunk edge.
    pub fn spatial_chunk(mut self, chunk: usize) -> Self {
        self.spatial_chunk = chunk;
        self
    }

    /// Add a group attribute.
    pub fn attribute(mut self, key: &str, value: serde_json::Value) -> Self {
        self.attrs.insert(key.to_string(), value);
        self
    }

    /// Add a variable from a `[time][lat][lon]` buffer.
    pub fn variable(mut self, name: &str, units: Units, data: Vec<f32>) -> Self {
        self.variables.push((name.to_string(), units, data));
        self
    }

    /// Add a variable generated from `(date, row, col)`.
    pub fn variable_fn<F>(self, name: &str, units: Units, f: F) -> Self
    where
        F: Fn(NaiveDate, usize, usize) -> f32,
    {
        let (n_lat, n_lon) = self.coords.shape();
        let mut data = Vec::with_capacity(self.dates.len() * n_lat * n_lon);
        for date in &self.dates {
            for row in 0..n_lat {
                for col in 0..n_lon {
                    data.push(f(*date, row, col));
                }
            }
        }
        self.variable(name, units, data)
    }

    /// Add a variable where every cell has the same daily series.
    pub fn uniform_series(self, name: &str, units: Units, series: &[f32]) -> Self {
        let cells = self.coords.len();
        let data = series
            .iter()
            .flat_map(|v| std::iter::repeat(*v).take(cells))
            .collect();
        self.variable(name, units, data)
    }

    /// Write the store to `path`.
    pub fn write(self, path: &Path) -> Result<WriteResult> {
        let writer = DatasetWriter::new(StoreConfig::uncompressed());
        let mut draft = writer.create(path, self.attrs)?;
        draft.write_coordinates(&self.coords)?;
        draft.write_time(&self.dates)?;

        for (name, units, data) in self.variables {
            let expected = self.dates.len() * self.coords.len();
            if data.len() != expected {
                return Err(StoreError::write_failed(format!(
                    "synthetic variable '{name}' has {} values, expected {expected}",
                    data.len()
                )));
            }
            let mut attrs = Map::new();
            attrs.insert("units".to_string(), json!(units.as_attr()));
            let spec = VariableSpec::time_lat_lon(
                name,
                self.dates.len(),
                &self.coords,
                366,
                self.spatial_chunk,
                attrs,
            );
            draft.write_variable(spec, &data)?;
        }

        draft.commit()
    }
}
