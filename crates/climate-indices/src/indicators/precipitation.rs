//! Precipitation indices. Inputs are daily totals in mm/day.

use std::sync::Arc;

use grid_store::Units;

use super::resample::{count_where, longest_run, nan_max};
use super::{IndexComputation, IndexKind, YearSlice};
use crate::error::IndexError;

const PR: [&str; 1] = ["pr"];

/// Total precipitation on wet days.
struct TotalWet {
    wet_day: f32,
}

impl IndexComputation for TotalWet {
    fn name(&self) -> &str {
        "prcptot"
    }

    fn description(&self) -> &str {
        "Total precipitation on wet days"
    }

    fn required_inputs(&self) -> &[&'static str] {
        &PR
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Amount
    }

    fn units(&self) -> Units {
        Units::Millimeters
    }

    fn compute(&self, year: &YearSlice<'_>) -> Result<f32, IndexError> {
        let pr = year.var("pr")?;
        Ok(wet_total(pr, |v| v >= self.wet_day))
    }
}

fn wet_total(values: &[f32], pred: impl Fn(f32) -> bool) -> f32 {
    let mut any = false;
    let mut total = 0.0f64;
    for v in values.iter().filter(|v| !v.is_nan()) {
        any = true;
        if pred(*v) {
            total += *v as f64;
        }
    }
    if any {
        total as f32
    } else {
        f32::NAN
    }
}

/// Days with at least a fixed amount.
struct HeavyDays {
    name: &'static str,
    description: &'static str,
    limit: f32,
}

impl IndexComputation for HeavyDays {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn required_inputs(&self) -> &[&'static str] {
        &PR
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Count
    }

    fn units(&self) -> Units {
        Units::Days
    }

    fn compute(&self, year: &YearSlice<'_>) -> Result<f32, IndexError> {
        let pr = year.var("pr")?;
        Ok(count_where(pr, |_, v| v >= self.limit))
    }
}

/// Annual maximum of an n-day running total.
struct MaxRunningTotal {
    name: &'static str,
    description: &'static str,
    days: usize,
}

impl IndexComputation for MaxRunningTotal {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn required_inputs(&self) -> &[&'static str] {
        &PR
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Amount
    }

    fn units(&self) -> Units {
        Units::Millimeters
    }

    fn compute(&self, year: &YearSlice<'_>) -> Result<f32, IndexError> {
        let pr = year.var("pr")?;
        if self.days <= 1 {
            return Ok(nan_max(pr));
        }
        // Windows containing a missing day are skipped.
        let sums: Vec<f32> = pr
            .windows(self.days)
            .map(|w| {
                if w.iter().any(|v| v.is_nan()) {
                    f32::NAN
                } else {
                    w.iter().sum()
                }
            })
            .collect();
        Ok(nan_max(&sums))
    }
}

/// Longest spell of dry or wet days.
struct Spell {
    name: &'static str,
    description: &'static str,
    wet_day: f32,
    wet: bool,
}

impl IndexComputation for Spell {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn required_inputs(&self) -> &[&'static str] {
        &PR
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Count
    }

    fn units(&self) -> Units {
        Units::Days
    }

    fn compute(&self, year: &YearSlice<'_>) -> Result<f32, IndexError> {
        let pr = year.var("pr")?;
        Ok(if self.wet {
            longest_run(pr, |v| v >= self.wet_day)
        } else {
            longest_run(pr, |v| v < self.wet_day)
        })
    }
}

/// Simple daily intensity: wet-day total over wet-day count.
struct Intensity {
    wet_day: f32,
}

impl IndexComputation for Intensity {
    fn name(&self) -> &str {
        "sdii"
    }

    fn description(&self) -> &str {
        "Mean precipitation on wet days"
    }

    fn required_inputs(&self) -> &[&'static str] {
        &PR
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Intensity
    }

    fn units(&self) -> Units {
        Units::MillimetersPerDay
    }

    fn compute(&self, year: &YearSlice<'_>) -> Result<f32, IndexError> {
        let pr = year.var("pr")?;
        let wet_days = count_where(pr, |_, v| v >= self.wet_day);
        if wet_days.is_nan() {
            return Ok(f32::NAN);
        }
        if wet_days == 0.0 {
            return Ok(0.0);
        }
        Ok(wet_total(pr, |v| v >= self.wet_day) / wet_days)
    }
}

/// Precipitation from wet days above a baseline percentile.
struct PercentileTotal {
    name: &'static str,
    description: &'static str,
    thresholds: [&'static str; 1],
    wet_day: f32,
}

impl IndexComputation for PercentileTotal {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn required_inputs(&self) -> &[&'static str] {
        &PR
    }

    fn thresholds(&self) -> &[&'static str] {
        &self.thresholds
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Amount
    }

    fn units(&self) -> Units {
        Units::Millimeters
    }

    fn compute(&self, year: &YearSlice<'_>) -> Result<f32, IndexError> {
        let pr = year.var("pr")?;
        let thresholds = year.threshold(self.thresholds[0])?;

        let mut any = false;
        let mut total = 0.0f64;
        for (i, v) in pr.iter().enumerate() {
            if v.is_nan() {
                continue;
            }
            any = true;
            let t = year.threshold_on(thresholds, i);
            if *v >= self.wet_day && *v > t {
                total += *v as f64;
            }
        }
        Ok(if any { total as f32 } else { f32::NAN })
    }
}

pub(super) fn indices(wet_day: f32) -> Vec<Arc<dyn IndexComputation>> {
    vec![
        Arc::new(TotalWet { wet_day }),
        Arc::new(HeavyDays {
            name: "r10mm",
            description: "Days with precipitation of at least 10 mm",
            limit: 10.0,
        }),
        Arc::new(HeavyDays {
            name: "r20mm",
            description: "Days with precipitation of at least 20 mm",
            limit: 20.0,
        }),
        Arc::new(MaxRunningTotal {
            name: "rx1day",
            description: "Annual maximum one-day precipitation",
            days: 1,
        }),
        Arc::new(MaxRunningTotal {
            name: "rx5day",
            description: "Annual maximum consecutive five-day precipitation",
            days: 5,
        }),
        Arc::new(Spell {
            name: "cdd",
            description: "Maximum number of consecutive dry days",
            wet_day,
            wet: false,
        }),
        Arc::new(Spell {
            name: "cwd",
            description: "Maximum number of consecutive wet days",
            wet_day,
            wet: true,
        }),
        Arc::new(Intensity { wet_day }),
        Arc::new(PercentileTotal {
            name: "r95ptot",
            description: "Precipitation on wet days above the baseline 95th percentile",
            thresholds: ["pr_p95"],
            wet_day,
        }),
        Arc::new(PercentileTotal {
            name: "r99ptot",
            description: "Precipitation on wet days above the baseline 99th percentile",
            thresholds: ["pr_p99"],
            wet_day,
        }),
    ]
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use grid_store::time::daily_dates;
    use grid_store::GridCoordinates;
    use test_utils::assert_approx_eq;

    use super::super::test_support::single_cell_inputs;
    use super::super::{compute_index_tile, IndexRegistry};
    use super::*;
    use crate::baseline::{BaselineThresholds, ThresholdArray};

    fn run(name: &str, pr: Vec<f32>) -> f32 {
        let registry = IndexRegistry::standard();
        let index = registry.get(name).unwrap();
        let dates = daily_dates(2001, 2001).unwrap();
        let inputs = single_cell_inputs(&dates, &[("pr", Units::MillimetersPerDay, pr)], None);
        compute_index_tile(index.as_ref(), &inputs).unwrap()[0]
    }

    fn year_with(days: &[(usize, f32)]) -> Vec<f32> {
        let mut pr = vec![0.0; 365];
        for (d, v) in days {
            pr[*d] = *v;
        }
        pr
    }

    #[test]
    fn test_totals_and_counts() {
        let pr = year_with(&[(10, 0.5), (11, 12.0), (12, 25.0), (100, 3.0)]);
        assert_approx_eq!(run("prcptot", pr.clone()), 40.0, 1e-4);
        assert_eq!(run("r10mm", pr.clone()), 2.0);
        assert_eq!(run("r20mm", pr.clone()), 1.0);
        assert_eq!(run("rx1day", pr.clone()), 25.0);
        assert_approx_eq!(run("rx5day", pr.clone()), 37.5, 1e-4);
        assert_approx_eq!(run("sdii", pr), 40.0 / 3.0, 1e-4);
    }

    #[test]
    fn test_spells() {
        let mut pr = vec![5.0; 365];
        for v in pr.iter_mut().skip(50).take(40) {
            *v = 0.0;
        }
        assert_eq!(run("cdd", pr.clone()), 40.0);
        assert_eq!(run("cwd", pr), (365 - 90) as f32);
    }

    #[test]
    fn test_sdii_without_wet_days() {
        assert_eq!(run("sdii", vec![0.0; 365]), 0.0);
    }

    #[test]
    fn test_percentile_total() {
        let mut thresholds = BTreeMap::new();
        thresholds.insert(
            "pr_p95".to_string(),
            ThresholdArray {
                name: "pr_p95".to_string(),
                variable: "pr".to_string(),
                percentile: 95,
                units: Units::MillimetersPerDay,
                data: vec![10.0; 366],
                attrs: Default::default(),
            },
        );
        let baseline = Arc::new(BaselineThresholds {
            coords: GridCoordinates::new(vec![40.0], vec![-100.0]).unwrap(),
            start_year: 1981,
            end_year: 2010,
            window_days: 5,
            thresholds,
        });

        let dates = daily_dates(2001, 2001).unwrap();
        let pr = year_with(&[(5, 8.0), (6, 11.0), (7, 30.0)]);
        let inputs = single_cell_inputs(
            &dates,
            &[("pr", Units::MillimetersPerDay, pr)],
            Some(baseline),
        );
        let registry = IndexRegistry::standard();
        let r95 = registry.get("r95ptot").unwrap();
        assert_eq!(compute_index_tile(r95.as_ref(), &inputs).unwrap(), vec![41.0]);
    }
}
