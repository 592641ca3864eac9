//! Common test fixtures.

use std::path::{Path, PathBuf};

/// Creates a temporary directory for test output.
///
/// The directory is removed when the returned `TempDir` is dropped.
pub fn temp_test_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temporary test directory")
}

/// Sample parcels inside the 45°N..40°N, 100°W..95°W test grid.
pub const SAMPLE_POINTS: &[(&str, f64, f64)] = &[
    ("P-001", 44.5, -99.5),
    ("P-002", 43.25, -98.75),
    ("P-003", 42.0, -97.0),
];

/// Render points as a CSV document with the given header names.
pub fn points_csv(id_col: &str, lat_col: &str, lon_col: &str, points: &[(&str, f64, f64)]) -> String {
    let mut out = format!("{id_col},{lat_col},{lon_col}\n");
    for (id, lat, lon) in points {
        out.push_str(&format!("{id},{lat},{lon}\n"));
    }
    out
}

/// Write `contents` to `dir/name` and return the path.
pub fn write_fixture(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("Failed to write fixture");
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_points_csv() {
        let csv = points_csv("id", "lat", "lon", &SAMPLE_POINTS[..1]);
        assert_eq!(csv, "id,lat,lon\nP-001,44.5,-99.5\n");
    }

    #[test]
    fn test_write_fixture() {
        let dir = temp_test_dir();
        let path = write_fixture(dir.path(), "points.csv", "a,b\n");
        assert_eq!(std::fs::read_to_string(path).unwrap(), "a,b\n");
    }
}
