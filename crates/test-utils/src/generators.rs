//! Synthetic daily series for climate tests.
//!
//! Every generator returns one value per day in calendar order, so a series
//! can be broadcast over a grid with `DailyStoreBuilder::uniform_series`.

use chrono::NaiveDate;

/// Number of days in a calendar year.
pub fn days_in_year(year: i32) -> usize {
    match NaiveDate::from_ymd_opt(year, 2, 29) {
        Some(_) => 366,
        None => 365,
    }
}

/// Total days in `start_year..=end_year`.
pub fn days_in_years(start_year: i32, end_year: i32) -> usize {
    (start_year..=end_year).map(days_in_year).sum()
}

/// A series with the same value every day.
pub fn constant_series(n_days: usize, value: f32) -> Vec<f32> {
    vec![value; n_days]
}

/// One year of `cool` for the first 200 days followed by `hot` for the rest.
///
/// For a 365-day year that is 200 cool days and 165 hot days.
pub fn hot_summer_year(n_days: usize, cool: f32, hot: f32) -> Vec<f32> {
    (0..n_days)
        .map(|d| if d < 200 { cool } else { hot })
        .collect()
}

/// [`hot_summer_year`] repeated for every year in `start_year..=end_year`.
pub fn hot_summer_series(start_year: i32, end_year: i32, cool: f32, hot: f32) -> Vec<f32> {
    (start_year..=end_year)
        .flat_map(|y| hot_summer_year(days_in_year(y), cool, hot))
        .collect()
}

/// Alternating dry (0 mm) and wet (`amount`) days, starting dry.
pub fn alternating_wet_series(n_days: usize, amount: f32) -> Vec<f32> {
    (0..n_days)
        .map(|d| if d % 2 == 0 { 0.0 } else { amount })
        .collect()
}

/// Linear ramp `start, start + step, ...`.
pub fn ramp_series(n_days: usize, start: f32, step: f32) -> Vec<f32> {
    (0..n_days).map(|d| start + d as f32 * step).collect()
}

/// Deterministic pseudo-random values in `[lo, hi)`.
pub fn noisy_series(n_days: usize, lo: f32, hi: f32, seed: u32) -> Vec<f32> {
    (0..n_days)
        .map(|d| {
            let h = simple_hash(d as u32, seed);
            lo + (h % 10_000) as f32 / 10_000.0 * (hi - lo)
        })
        .collect()
}

/// Simple hash function for deterministic pseudo-random values.
fn simple_hash(x: u32, seed: u32) -> u32 {
    let mut h = seed;
    h = h.wrapping_mul(31).wrapping_add(x);
    h ^= h >> 16;
    h = h.wrapping_mul(0x85ebca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2ae35);
    h ^= h >> 16;
    h
}
