//! Core types for gridded daily data.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::units::Units;

/// Tolerance used when comparing coordinate vectors.
const COORD_TOLERANCE: f64 = 1e-6;

/// Spatial coordinate vectors shared by every grid in a computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridCoordinates {
    pub lat: Vec<f64>,
    pub lon: Vec<f64>,
}

impl GridCoordinates {
    /// Create coordinates, checking that both vectors are monotonic.
    pub fn new(lat: Vec<f64>, lon: Vec<f64>) -> Result<Self> {
        if lat.is_empty() || lon.is_empty() {
            return Err(StoreError::invalid_metadata("empty coordinate vector"));
        }
        if !is_monotonic(&lat) {
            return Err(StoreError::invalid_metadata("latitude is not monotonic"));
        }
        if !is_monotonic(&lon) {
            return Err(StoreError::invalid_metadata("longitude is not monotonic"));
        }
        Ok(Self { lat, lon })
    }

    /// Grid dimensions (lat, lon).
    pub fn shape(&self) -> (usize, usize) {
        (self.lat.len(), self.lon.len())
    }

    /// Number of grid cells.
    pub fn len(&self) -> usize {
        self.lat.len() * self.lon.len()
    }

    /// True when the grid has no cells.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fail unless `other` has the same resolution and extent.
    pub fn ensure_matches(&self, other: &GridCoordinates, context: &str) -> Result<()> {
        if self.lat.len() != other.lat.len() || self.lon.len() != other.lon.len() {
            return Err(StoreError::CoordinateMismatch(format!(
                "{context}: shape {:?} vs {:?}",
                self.shape(),
                other.shape()
            )));
        }
        let lat_ok = self
            .lat
            .iter()
            .zip(&other.lat)
            .all(|(a, b)| (a - b).abs() <= COORD_TOLERANCE);
        let lon_ok = self
            .lon
            .iter()
            .zip(&other.lon)
            .all(|(a, b)| (a - b).abs() <= COORD_TOLERANCE);
        if !lat_ok || !lon_ok {
            return Err(StoreError::CoordinateMismatch(format!(
                "{context}: coordinate values differ"
            )));
        }
        Ok(())
    }

    /// Split the grid into tiles of at most `tile_lat` × `tile_lon` cells.
    pub fn tiles(&self, tile_lat: usize, tile_lon: usize) -> Vec<TileWindow> {
        let (n_lat, n_lon) = self.shape();
        let tile_lat = tile_lat.clamp(1, n_lat.max(1));
        let tile_lon = tile_lon.clamp(1, n_lon.max(1));

        let mut tiles = Vec::new();
        for lat_start in (0..n_lat).step_by(tile_lat) {
            for lon_start in (0..n_lon).step_by(tile_lon) {
                tiles.push(TileWindow {
                    lat_start,
                    lat_len: tile_lat.min(n_lat - lat_start),
                    lon_start,
                    lon_len: tile_lon.min(n_lon - lon_start),
                });
            }
        }
        tiles
    }

    /// A single tile covering the whole grid.
    pub fn full_tile(&self) -> TileWindow {
        TileWindow {
            lat_start: 0,
            lat_len: self.lat.len(),
            lon_start: 0,
            lon_len: self.lon.len(),
        }
    }
}

fn is_monotonic(values: &[f64]) -> bool {
    values.windows(2).all(|w| w[0] < w[1]) || values.windows(2).all(|w| w[0] > w[1])
}

/// A rectangular spatial window of the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileWindow {
    pub lat_start: usize,
    pub lat_len: usize,
    pub lon_start: usize,
    pub lon_len: usize,
}

impl TileWindow {
    /// Number of cells in the tile.
    pub fn cells(&self) -> usize {
        self.lat_len * self.lon_len
    }
}

/// A forced (in-memory) daily series for one spatial tile.
///
/// Values are laid out `[time][lat][lon]` in row-major order.
#[derive(Debug, Clone)]
pub struct TileSeries {
    pub data: Vec<f32>,
    pub dates: Arc<[NaiveDate]>,
    pub tile: TileWindow,
    pub units: Units,
}

impl TileSeries {
    /// Number of time steps.
    pub fn n_time(&self) -> usize {
        self.dates.len()
    }

    /// Value at (time, lat, lon) in tile-local indices.
    pub fn get(&self, t: usize, y: usize, x: usize) -> f32 {
        self.data[(t * self.tile.lat_len + y) * self.tile.lon_len + x]
    }

    /// The daily series of one cell.
    pub fn cell_series(&self, y: usize, x: usize) -> Vec<f32> {
        (0..self.n_time()).map(|t| self.get(t, y, x)).collect()
    }

    /// Approximate memory footprint in bytes.
    pub fn memory_bytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }
}

/// Estimate bytes for `time_steps` float32 values on `cells` cells.
pub fn f32_bytes(time_steps: usize, cells: usize) -> u64 {
    time_steps as u64 * cells as u64 * std::mem::size_of::<f32>() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coords(n_lat: usize, n_lon: usize) -> GridCoordinates {
        GridCoordinates::new(
            (0..n_lat).map(|i| 40.0 - i as f64 * 0.5).collect(),
            (0..n_lon).map(|i| -100.0 + i as f64 * 0.5).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_tiles_cover_grid_once() {
        let grid = coords(7, 10);
        let tiles = grid.tiles(3, 4);
        let mut seen = vec![0u8; grid.len()];
        for t in &tiles {
            for y in t.lat_start..t.lat_start + t.lat_len {
                for x in t.lon_start..t.lon_start + t.lon_len {
                    seen[y * 10 + x] += 1;
                }
            }
        }
        assert!(seen.iter().all(|&c| c == 1));
        assert_eq!(tiles.len(), 3 * 3);
    }

    #[test]
    fn test_ensure_matches() {
        let a = coords(3, 3);
        assert!(a.ensure_matches(&coords(3, 3), "same").is_ok());
        assert!(a.ensure_matches(&coords(3, 4), "shape").is_err());

        let mut shifted = coords(3, 3);
        shifted.lon[1] += 0.25;
        assert!(matches!(
            a.ensure_matches(&shifted, "values"),
            Err(StoreError::CoordinateMismatch(_))
        ));
    }

    #[test]
    fn test_non_monotonic_rejected() {
        assert!(GridCoordinates::new(vec![1.0, 3.0, 2.0], vec![0.0]).is_err());
        assert!(GridCoordinates::new(vec![3.0, 2.0, 1.0], vec![0.0]).is_ok());
    }

    #[test]
    fn test_tile_series_layout_and_size() {
        let dates: Arc<[NaiveDate]> = crate::time::daily_dates(2001, 2001).unwrap().into();
        let tile = TileWindow {
            lat_start: 0,
            lat_len: 2,
            lon_start: 0,
            lon_len: 3,
        };
        let data: Vec<f32> = (0..dates.len() * 6).map(|v| v as f32).collect();
        let series = TileSeries {
            data,
            dates,
            tile,
            units: Units::Celsius,
        };

        assert_eq!(series.get(1, 1, 2), 11.0);
        assert_eq!(series.cell_series(0, 1)[..2], [1.0, 7.0]);
        assert_eq!(series.memory_bytes() as u64, f32_bytes(365, tile.cells()));
    }
}
