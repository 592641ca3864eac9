//! Annual grouping and NaN-aware reductions.

use std::ops::Range;

use chrono::{Datelike, NaiveDate};

/// Contiguous time indices belonging to one calendar year.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YearGroup {
    pub year: i32,
    pub range: Range<usize>,
}

/// Group an increasing date axis by calendar year.
pub fn year_groups(dates: &[NaiveDate]) -> Vec<YearGroup> {
    let mut groups: Vec<YearGroup> = Vec::new();
    for (i, date) in dates.iter().enumerate() {
        match groups.last_mut() {
            Some(g) if g.year == date.year() => g.range.end = i + 1,
            _ => groups.push(YearGroup {
                year: date.year(),
                range: i..i + 1,
            }),
        }
    }
    groups
}

/// Number of non-NaN values satisfying `pred`; NaN when every value is NaN.
pub fn count_where(values: &[f32], pred: impl Fn(usize, f32) -> bool) -> f32 {
    let mut valid = 0usize;
    let mut count = 0usize;
    for (i, v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        valid += 1;
        if pred(i, *v) {
            count += 1;
        }
    }
    if valid == 0 {
        f32::NAN
    } else {
        count as f32
    }
}

pub fn nan_max(values: &[f32]) -> f32 {
    values
        .iter()
        .filter(|v| !v.is_nan())
        .fold(f32::NAN, |acc, v| if acc.is_nan() { *v } else { acc.max(*v) })
}

pub fn nan_min(values: &[f32]) -> f32 {
    values
        .iter()
        .filter(|v| !v.is_nan())
        .fold(f32::NAN, |acc, v| if acc.is_nan() { *v } else { acc.min(*v) })
}

pub fn nan_sum(values: &[f32]) -> f32 {
    let mut any = false;
    let mut sum = 0.0f64;
    for v in values.iter().filter(|v| !v.is_nan()) {
        any = true;
        sum += *v as f64;
    }
    if any {
        sum as f32
    } else {
        f32::NAN
    }
}

pub fn nan_mean(values: &[f32]) -> f32 {
    let mut n = 0usize;
    let mut sum = 0.0f64;
    for v in values.iter().filter(|v| !v.is_nan()) {
        n += 1;
        sum += *v as f64;
    }
    if n == 0 {
        f32::NAN
    } else {
        (sum / n as f64) as f32
    }
}

/// Longest run of consecutive values satisfying `pred`. NaN ends a run.
///
/// NaN when every value is NaN.
pub fn longest_run(values: &[f32], pred: impl Fn(f32) -> bool) -> f32 {
    if values.iter().all(|v| v.is_nan()) {
        return f32::NAN;
    }
    let mut best = 0usize;
    let mut current = 0usize;
    for v in values {
        if !v.is_nan() && pred(*v) {
            current += 1;
            best = best.max(current);
        } else {
            current = 0;
        }
    }
    best as f32
}
