//! Point extraction from an index archive.
//!
//! Count indices are sampled with nearest neighbor, everything else with
//! bilinear interpolation. Results are written as long or wide CSV.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::Datelike;
use grid_store::{interpolate, ArchiveReader, StoreError, Units, KELVIN_OFFSET};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::indicators::{IndexKind, IndexRegistry};

/// Mean above which a temperature index without units is taken as Kelvin.
pub const KELVIN_HEURISTIC_MEAN: f64 = 200.0;

const ID_COLUMNS: [&str; 4] = ["id", "parcel_id", "record_id", "site_id"];
const LAT_COLUMNS: [&str; 3] = ["lat", "latitude", "y"];
const LON_COLUMNS: [&str; 4] = ["lon", "long", "longitude", "x"];

/// A location to sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractOptions {
    /// Shift Kelvin temperature indices to degrees Celsius.
    pub convert_kelvin: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            convert_kelvin: true,
        }
    }
}

/// Values of every index for one point and year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    pub id: String,
    pub year: i32,
    /// Aligned with [`Extraction::indices`].
    pub values: Vec<f32>,
}

/// Extracted values in long form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Extraction {
    pub indices: Vec<String>,
    pub years: Vec<i32>,
    pub records: Vec<ExtractionRecord>,
}

impl Extraction {
    /// Value of `index` for `id` in `year`.
    pub fn value(&self, id: &str, year: i32, index: &str) -> Option<f32> {
        let col = self.indices.iter().position(|i| i == index)?;
        self.records
            .iter()
            .find(|r| r.id == id && r.year == year)
            .map(|r| r.values[col])
    }
}

/// Sample `index_names` (all variables when empty) at `points`.
pub fn extract(
    archive: &Path,
    points: &[Point],
    index_names: &[String],
    options: &ExtractOptions,
) -> Result<Extraction> {
    let reader = ArchiveReader::open(archive)?;
    let coords = reader.read_coordinates()?;
    let years: Vec<i32> = reader.read_time()?.iter().map(|d| d.year()).collect();

    let available = reader.variables();
    let indices: Vec<String> = if index_names.is_empty() {
        available.clone()
    } else {
        for name in index_names {
            if !available.contains(name) {
                return Err(EngineError::config(format!(
                    "index '{name}' not found in {} (available: {})",
                    archive.display(),
                    available.join(", ")
                )));
            }
        }
        index_names.to_vec()
    };

    let registry = IndexRegistry::standard();
    let (n_lat, n_lon) = coords.shape();
    let plane = n_lat * n_lon;

    // values[index][point][year]
    let mut columns: Vec<Vec<Vec<f32>>> = Vec::with_capacity(indices.len());
    for name in &indices {
        let (data, shape, attrs) = reader.read_f32(name)?;
        if shape.len() != 3
            || shape[0] as usize != years.len()
            || (shape[1] * shape[2]) as usize != plane
        {
            return Err(EngineError::Store(StoreError::invalid_metadata(format!(
                "index '{name}' has shape {shape:?}, expected (time, lat, lon)"
            ))));
        }

        let kind = attrs
            .get("index_kind")
            .and_then(|v| v.as_str())
            .and_then(IndexKind::from_str)
            .or_else(|| registry.get(name).map(|i| i.kind()));
        let units = attrs
            .get("units")
            .and_then(|v| v.as_str())
            .map(Units::parse)
            .unwrap_or(Units::Unknown);
        let method = kind.unwrap_or(IndexKind::Amount).interpolation();

        let mut per_point: Vec<Vec<f32>> = points
            .iter()
            .map(|p| {
                (0..years.len())
                    .map(|t| {
                        let grid = &data[t * plane..(t + 1) * plane];
                        interpolate(grid, &coords, p.lat, p.lon, method)
                    })
                    .collect()
            })
            .collect();

        if options.convert_kelvin && kind == Some(IndexKind::Temperature) {
            apply_kelvin_policy(name, &units, &mut per_point);
        }

        debug!(index = %name, kind = ?kind, ?method, "Extracted index");
        columns.push(per_point);
    }

    let mut records = Vec::with_capacity(points.len() * years.len());
    for (pi, point) in points.iter().enumerate() {
        for (yi, year) in years.iter().enumerate() {
            records.push(ExtractionRecord {
                id: point.id.clone(),
                year: *year,
                values: columns.iter().map(|c| c[pi][yi]).collect(),
            });
        }
    }

    info!(
        archive = %archive.display(),
        points = points.len(),
        indices = indices.len(),
        years = years.len(),
        "Extraction complete"
    );

    Ok(Extraction {
        indices,
        years,
        records,
    })
}

fn apply_kelvin_policy(name: &str, units: &Units, values: &mut [Vec<f32>]) {
    let shift = match units {
        Units::Kelvin => true,
        Units::Unknown => {
            let (sum, n) = values
                .iter()
                .flatten()
                .filter(|v| !v.is_nan())
                .fold((0.0f64, 0usize), |(s, n), v| (s + *v as f64, n + 1));
            let kelvin = n > 0 && sum / n as f64 > KELVIN_HEURISTIC_MEAN;
            if kelvin {
                warn!(
                    index = %name,
                    mean = sum / n as f64,
                    "Index has no units, treating as Kelvin by magnitude"
                );
            }
            kelvin
        }
        _ => false,
    };

    if shift {
        for v in values.iter_mut().flatten() {
            *v -= KELVIN_OFFSET;
        }
    }
}

/// Read points from a CSV file with a header row.
///
/// `id_column` overrides id detection. Latitude and longitude columns are
/// detected by name.
pub fn read_points_csv(path: &Path, id_column: Option<&str>) -> Result<Vec<Point>> {
    let invalid = |e: csv::Error| EngineError::config(format!("{}: {e}", path.display()));
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(invalid)?;

    let lower: Vec<String> = reader
        .headers()
        .map_err(invalid)?
        .iter()
        .map(|h| h.to_lowercase())
        .collect();
    if lower.is_empty() {
        return Err(EngineError::config(format!("{}: empty points file", path.display())));
    }
    let find = |candidates: &[&str]| {
        candidates
            .iter()
            .find_map(|c| lower.iter().position(|h| h == c))
    };

    let id_col = match id_column {
        Some(name) => lower.iter().position(|h| *h == name.to_lowercase()),
        None => find(&ID_COLUMNS),
    }
    .ok_or_else(|| {
        EngineError::config(format!(
            "{}: no id column (looked for {})",
            path.display(),
            id_column.map(|c| c.to_string()).unwrap_or_else(|| ID_COLUMNS.join(", "))
        ))
    })?;
    let lat_col = find(&LAT_COLUMNS).ok_or_else(|| {
        EngineError::config(format!(
            "{}: no latitude column (looked for {})",
            path.display(),
            LAT_COLUMNS.join(", ")
        ))
    })?;
    let lon_col = find(&LON_COLUMNS).ok_or_else(|| {
        EngineError::config(format!(
            "{}: no longitude column (looked for {})",
            path.display(),
            LON_COLUMNS.join(", ")
        ))
    })?;

    let mut points = Vec::new();
    for record in reader.records() {
        let record = record.map_err(invalid)?;
        let row = record.position().map(|p| p.line()).unwrap_or_default();
        let field = |col: usize| record.get(col).unwrap_or("");
        let parse = |col: usize, what: &str| {
            field(col).parse::<f64>().map_err(|_| {
                EngineError::config(format!(
                    "{}: row {row}: invalid {what} '{}'",
                    path.display(),
                    field(col)
                ))
            })
        };
        points.push(Point {
            id: field(id_col).to_string(),
            lat: parse(lat_col, "latitude")?,
            lon: parse(lon_col, "longitude")?,
        });
    }

    debug!(path = %path.display(), points = points.len(), "Read points");
    Ok(points)
}

fn format_value(v: f32) -> String {
    if v.is_nan() {
        String::new()
    } else {
        v.to_string()
    }
}

/// Write one row per point and year.
pub fn write_long_csv(extraction: &Extraction, path: &Path) -> Result<()> {
    write_atomic(path, |writer| {
        let mut header = vec!["id".to_string(), "year".to_string()];
        header.extend(extraction.indices.iter().cloned());
        writer.write_record(&header)?;

        for record in &extraction.records {
            let mut row = vec![record.id.clone(), record.year.to_string()];
            row.extend(record.values.iter().map(|v| format_value(*v)));
            writer.write_record(&row)?;
        }
        Ok(extraction.records.len())
    })
}

/// Write one row per point with `{index}_{year}` columns.
pub fn write_wide_csv(extraction: &Extraction, path: &Path) -> Result<()> {
    let mut rows: BTreeMap<&str, BTreeMap<(usize, i32), f32>> = BTreeMap::new();
    let mut order: Vec<&str> = Vec::new();
    for record in &extraction.records {
        if !rows.contains_key(record.id.as_str()) {
            order.push(&record.id);
        }
        let row = rows.entry(&record.id).or_default();
        for (i, v) in record.values.iter().enumerate() {
            row.insert((i, record.year), *v);
        }
    }

    write_atomic(path, |writer| {
        let mut header = vec!["id".to_string()];
        for index in &extraction.indices {
            for year in &extraction.years {
                header.push(format!("{index}_{year}"));
            }
        }
        writer.write_record(&header)?;

        for id in &order {
            let values = &rows[id];
            let mut row = vec![id.to_string()];
            for i in 0..extraction.indices.len() {
                for year in &extraction.years {
                    row.push(values.get(&(i, *year)).map(|v| format_value(*v)).unwrap_or_default());
                }
            }
            writer.write_record(&row)?;
        }
        Ok(order.len())
    })
}

/// Write CSV rows to a temporary sibling and move it over `path`.
fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut csv::Writer<&mut fs::File>) -> csv::Result<usize>,
{
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    let rows = {
        let mut writer = csv::Writer::from_writer(tmp.as_file_mut());
        let rows = write(&mut writer).map_err(|e| EngineError::Io(e.into()))?;
        writer.flush()?;
        rows
    };
    tmp.persist(path).map_err(|e| EngineError::Io(e.error))?;
    info!(path = %path.display(), rows, "Wrote CSV");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::fixtures::{points_csv, temp_test_dir, write_fixture, SAMPLE_POINTS};

    #[test]
    fn test_read_points_detects_columns() {
        let dir = temp_test_dir();
        let path = write_fixture(
            dir.path(),
            "points.csv",
            &points_csv("site_id", "latitude", "longitude", SAMPLE_POINTS),
        );
        let points = read_points_csv(&path, None).unwrap();
        assert_eq!(points.len(), SAMPLE_POINTS.len());
        assert_eq!(points[0].id, SAMPLE_POINTS[0].0);
        assert_eq!(points[0].lat, SAMPLE_POINTS[0].1);
    }

    #[test]
    fn test_read_points_missing_column() {
        let dir = temp_test_dir();
        let path = write_fixture(dir.path(), "points.csv", "id,lat\na,45.0\n");
        let err = read_points_csv(&path, None).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
        assert!(err.to_string().contains("longitude"));
    }

    #[test]
    fn test_read_points_explicit_id() {
        let dir = temp_test_dir();
        let path = write_fixture(dir.path(), "points.csv", "name,y,x\nfarm,44.5,-99.5\n");
        assert!(read_points_csv(&path, None).is_err());
        let points = read_points_csv(&path, Some("name")).unwrap();
        assert_eq!(
            points,
            vec![Point {
                id: "farm".to_string(),
                lat: 44.5,
                lon: -99.5
            }]
        );
    }

    #[test]
    fn test_kelvin_policy() {
        let mut values = vec![vec![293.15f32, 303.15]];
        apply_kelvin_policy("txx", &Units::Unknown, &mut values);
        assert!((values[0][0] - 20.0).abs() < 1e-3);

        let mut celsius = vec![vec![20.0f32, 30.0]];
        apply_kelvin_policy("txx", &Units::Unknown, &mut celsius);
        assert_eq!(celsius[0], vec![20.0, 30.0]);

        let mut labelled = vec![vec![1.0f32]];
        apply_kelvin_policy("txx", &Units::Kelvin, &mut labelled);
        assert!((labelled[0][0] - (1.0 - KELVIN_OFFSET)).abs() < 1e-3);
    }

    #[test]
    fn test_wide_and_long_csv() {
        let extraction = Extraction {
            indices: vec!["txx".to_string(), "r10mm".to_string()],
            years: vec![2001, 2002],
            records: vec![
                ExtractionRecord {
                    id: "a".to_string(),
                    year: 2001,
                    values: vec![30.5, 4.0],
                },
                ExtractionRecord {
                    id: "a".to_string(),
                    year: 2002,
                    values: vec![31.0, f32::NAN],
                },
            ],
        };
        let dir = temp_test_dir();

        let long = dir.path().join("long.csv");
        write_long_csv(&extraction, &long).unwrap();
        let text = fs::read_to_string(&long).unwrap();
        assert_eq!(text, "id,year,txx,r10mm\na,2001,30.5,4\na,2002,31,\n");

        let wide = dir.path().join("out/wide.csv");
        write_wide_csv(&extraction, &wide).unwrap();
        let text = fs::read_to_string(&wide).unwrap();
        assert_eq!(
            text,
            "id,txx_2001,txx_2002,r10mm_2001,r10mm_2002\na,30.5,31,4,\n"
        );
        assert_eq!(extraction.value("a", 2002, "txx"), Some(31.0));
    }
}
