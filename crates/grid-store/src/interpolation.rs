//! Point lookup on regular lat/lon grids.
//!
//! Grids are `[lat][lon]` row-major slices; coordinate vectors may be
//! ascending or descending.

use serde::{Deserialize, Serialize};

use crate::types::GridCoordinates;

/// Interpolation method for point lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpolationMethod {
    Nearest,
    Bilinear,
}

/// Fractional index of `value` along a monotonic axis, or None when outside.
fn fractional_index(axis: &[f64], value: f64) -> Option<f64> {
    let n = axis.len();
    if n == 0 || !value.is_finite() {
        return None;
    }
    if n == 1 {
        return ((axis[0] - value).abs() < 1e-9).then_some(0.0);
    }

    let ascending = axis[1] > axis[0];
    let (lo, hi) = if ascending {
        (axis[0], axis[n - 1])
    } else {
        (axis[n - 1], axis[0])
    };
    if value < lo || value > hi {
        return None;
    }

    // First index whose coordinate is past `value`.
    let upper = if ascending {
        axis.partition_point(|c| *c <= value)
    } else {
        axis.partition_point(|c| *c >= value)
    };
    let i0 = upper.saturating_sub(1).min(n - 2);
    let span = axis[i0 + 1] - axis[i0];
    Some(i0 as f64 + (value - axis[i0]) / span)
}

/// Index of the coordinate closest to `value`.
fn nearest_index(axis: &[f64], value: f64) -> Option<usize> {
    axis.iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            (*a - value)
                .abs()
                .partial_cmp(&(*b - value).abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(i, _)| i)
}

/// Nearest neighbor lookup. Points off the grid snap to the closest cell.
pub fn nearest_interpolate(data: &[f32], coords: &GridCoordinates, lat: f64, lon: f64) -> f32 {
    let (Some(row), Some(col)) = (nearest_index(&coords.lat, lat), nearest_index(&coords.lon, lon))
    else {
        return f32::NAN;
    };
    data[row * coords.lon.len() + col]
}

/// Bilinear interpolation between the four surrounding cells.
///
/// Returns NaN outside the grid or when any contributing corner is NaN.
pub fn bilinear_interpolate(data: &[f32], coords: &GridCoordinates, lat: f64, lon: f64) -> f32 {
    let width = coords.lon.len();
    let height = coords.lat.len();

    let (Some(y), Some(x)) = (
        fractional_index(&coords.lat, lat),
        fractional_index(&coords.lon, lon),
    ) else {
        return f32::NAN;
    };

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let xf = (x - x0 as f64) as f32;
    let yf = (y - y0 as f64) as f32;

    let weights = [
        (y0, x0, (1.0 - xf) * (1.0 - yf)),
        (y0, x1, xf * (1.0 - yf)),
        (y1, x0, (1.0 - xf) * yf),
        (y1, x1, xf * yf),
    ];

    let mut sum = 0.0f32;
    for (row, col, w) in weights {
        if w == 0.0 {
            continue;
        }
        let v = data[row * width + col];
        if v.is_nan() {
            return f32::NAN;
        }
        sum += v * w;
    }
    sum
}

/// Look up a point with the given method.
pub fn interpolate(
    data: &[f32],
    coords: &GridCoordinates,
    lat: f64,
    lon: f64,
    method: InterpolationMethod,
) -> f32 {
    match method {
        InterpolationMethod::Nearest => nearest_interpolate(data, coords, lat, lon),
        InterpolationMethod::Bilinear => bilinear_interpolate(data, coords, lat, lon),
    }
}
