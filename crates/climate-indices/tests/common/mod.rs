//! Synthetic input stores shared by the integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use grid_store::testdata::{test_coords, DailyStoreBuilder};
use grid_store::time::daily_dates;
use grid_store::Units;
use walkdir::WalkDir;

/// Daily series broadcast to every cell of a `n_lat × n_lon` grid.
pub struct SyntheticInputs {
    pub start_year: i32,
    pub end_year: i32,
    pub n_lat: usize,
    pub n_lon: usize,
    pub spatial_chunk: usize,
    pub tasmax: Vec<f32>,
    pub tasmin: Option<Vec<f32>>,
    pub pr: Vec<f32>,
}

impl SyntheticInputs {
    pub fn new(start_year: i32, end_year: i32, tasmax: Vec<f32>, pr: Vec<f32>) -> Self {
        Self {
            start_year,
            end_year,
            n_lat: 1,
            n_lon: 1,
            spatial_chunk: 64,
            tasmax,
            tasmin: None,
            pr,
        }
    }

    pub fn grid(mut self, n_lat: usize, n_lon: usize) -> Self {
        self.n_lat = n_lat;
        self.n_lon = n_lon;
        self
    }

    pub fn tasmin(mut self, tasmin: Vec<f32>) -> Self {
        self.tasmin = Some(tasmin);
        self
    }

    /// Write `temperature.zarr` and `precipitation.zarr` under `root`.
    pub fn write(&self, root: &Path) {
        let dates = daily_dates(self.start_year, self.end_year).unwrap();
        let coords = test_coords(self.n_lat, self.n_lon);

        let mut temperature = DailyStoreBuilder::new(coords.clone(), dates.clone())
            .spatial_chunk(self.spatial_chunk)
            .uniform_series("tmax", Units::Celsius, &self.tasmax);
        if let Some(tasmin) = &self.tasmin {
            temperature = temperature.uniform_series("tmin", Units::Celsius, tasmin);
        }
        temperature.write(&root.join("temperature.zarr")).unwrap();

        DailyStoreBuilder::new(coords, dates)
            .spatial_chunk(self.spatial_chunk)
            .uniform_series("ppt", Units::MillimetersPerDay, &self.pr)
            .write(&root.join("precipitation.zarr"))
            .unwrap();
    }
}

/// Contents of every file below `dir`, keyed by relative path.
pub fn snapshot(dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e.path().strip_prefix(dir).unwrap().to_path_buf();
            (rel, std::fs::read(e.path()).unwrap())
        })
        .collect()
}
