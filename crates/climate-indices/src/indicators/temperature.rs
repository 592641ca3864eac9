//! Temperature indices.

use std::sync::Arc;

use grid_store::Units;

use super::resample::{count_where, nan_max, nan_mean, nan_min};
use super::{IndexComputation, IndexKind, YearSlice};
use crate::error::IndexError;

/// Days above or below a day-of-year baseline percentile.
struct PercentileDays {
    name: &'static str,
    description: &'static str,
    inputs: [&'static str; 1],
    thresholds: [&'static str; 1],
    above: bool,
}

impl IndexComputation for PercentileDays {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn required_inputs(&self) -> &[&'static str] {
        &self.inputs
    }

    fn thresholds(&self) -> &[&'static str] {
        &self.thresholds
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Count
    }

    fn units(&self) -> Units {
        Units::Days
    }

    fn compute(&self, year: &YearSlice<'_>) -> Result<f32, IndexError> {
        let values = year.var(self.inputs[0])?;
        let thresholds = year.threshold(self.thresholds[0])?;
        Ok(count_where(values, |i, v| {
            let t = year.threshold_on(thresholds, i);
            if self.above {
                v > t
            } else {
                v < t
            }
        }))
    }
}

/// Days above or below a fixed temperature.
struct FixedDays {
    name: &'static str,
    description: &'static str,
    inputs: [&'static str; 1],
    limit: f32,
    above: bool,
}

impl IndexComputation for FixedDays {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn required_inputs(&self) -> &[&'static str] {
        &self.inputs
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Count
    }

    fn units(&self) -> Units {
        Units::Days
    }

    fn compute(&self, year: &YearSlice<'_>) -> Result<f32, IndexError> {
        let values = year.var(self.inputs[0])?;
        Ok(count_where(values, |_, v| {
            if self.above {
                v > self.limit
            } else {
                v < self.limit
            }
        }))
    }
}

/// Annual extreme of a temperature variable.
struct Extreme {
    name: &'static str,
    description: &'static str,
    inputs: [&'static str; 1],
    maximum: bool,
}

impl IndexComputation for Extreme {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn required_inputs(&self) -> &[&'static str] {
        &self.inputs
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Temperature
    }

    fn units(&self) -> Units {
        Units::Celsius
    }

    fn compute(&self, year: &YearSlice<'_>) -> Result<f32, IndexError> {
        let values = year.var(self.inputs[0])?;
        Ok(if self.maximum {
            nan_max(values)
        } else {
            nan_min(values)
        })
    }
}

/// Mean daily temperature range.
struct DiurnalRange;

impl IndexComputation for DiurnalRange {
    fn name(&self) -> &str {
        "dtr"
    }

    fn description(&self) -> &str {
        "Mean daily temperature range (tasmax - tasmin)"
    }

    fn required_inputs(&self) -> &[&'static str] {
        &["tasmax", "tasmin"]
    }

    fn kind(&self) -> IndexKind {
        IndexKind::TemperatureDifference
    }

    fn units(&self) -> Units {
        Units::KelvinDelta
    }

    fn compute(&self, year: &YearSlice<'_>) -> Result<f32, IndexError> {
        let tasmax = year.var("tasmax")?;
        let tasmin = year.var("tasmin")?;
        let range: Vec<f32> = tasmax.iter().zip(tasmin).map(|(a, b)| a - b).collect();
        Ok(nan_mean(&range))
    }
}

pub(super) fn indices() -> Vec<Arc<dyn IndexComputation>> {
    vec![
        Arc::new(PercentileDays {
            name: "tx90p",
            description: "Days with maximum temperature above the baseline 90th percentile",
            inputs: ["tasmax"],
            thresholds: ["tasmax_p90"],
            above: true,
        }),
        Arc::new(PercentileDays {
            name: "tx10p",
            description: "Days with maximum temperature below the baseline 10th percentile",
            inputs: ["tasmax"],
            thresholds: ["tasmax_p10"],
            above: false,
        }),
        Arc::new(PercentileDays {
            name: "tn90p",
            description: "Days with minimum temperature above the baseline 90th percentile",
            inputs: ["tasmin"],
            thresholds: ["tasmin_p90"],
            above: true,
        }),
        Arc::new(PercentileDays {
            name: "tn10p",
            description: "Days with minimum temperature below the baseline 10th percentile",
            inputs: ["tasmin"],
            thresholds: ["tasmin_p10"],
            above: false,
        }),
        Arc::new(FixedDays {
            name: "summer_days",
            description: "Days with maximum temperature above 25 degC",
            inputs: ["tasmax"],
            limit: 25.0,
            above: true,
        }),
        Arc::new(FixedDays {
            name: "frost_days",
            description: "Days with minimum temperature below 0 degC",
            inputs: ["tasmin"],
            limit: 0.0,
            above: false,
        }),
        Arc::new(FixedDays {
            name: "tropical_nights",
            description: "Days with minimum temperature above 20 degC",
            inputs: ["tasmin"],
            limit: 20.0,
            above: true,
        }),
        Arc::new(Extreme {
            name: "txx",
            description: "Annual maximum of daily maximum temperature",
            inputs: ["tasmax"],
            maximum: true,
        }),
        Arc::new(Extreme {
            name: "tnn",
            description: "Annual minimum of daily minimum temperature",
            inputs: ["tasmin"],
            maximum: false,
        }),
        Arc::new(DiurnalRange),
    ]
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::NaiveDate;
    use grid_store::time::daily_dates;
    use grid_store::GridCoordinates;

    use super::super::test_support::single_cell_inputs;
    use super::super::{compute_index_tile, IndexRegistry};
    use super::*;
    use crate::baseline::{BaselineThresholds, ThresholdArray};

    fn baseline_with(name: &str, variable: &str, value: f32) -> Arc<BaselineThresholds> {
        let mut thresholds = BTreeMap::new();
        thresholds.insert(
            name.to_string(),
            ThresholdArray {
                name: name.to_string(),
                variable: variable.to_string(),
                percentile: 90,
                units: Units::Celsius,
                data: vec![value; 366],
                attrs: Default::default(),
            },
        );
        Arc::new(BaselineThresholds {
            coords: GridCoordinates::new(vec![40.0], vec![-100.0]).unwrap(),
            start_year: 1981,
            end_year: 2010,
            window_days: 5,
            thresholds,
        })
    }

    fn run(name: &str, dates: &[NaiveDate], series: &[(&str, Units, Vec<f32>)]) -> Vec<f32> {
        let registry = IndexRegistry::standard();
        let index = registry.get(name).unwrap();
        let inputs = single_cell_inputs(dates, series, None);
        compute_index_tile(index.as_ref(), &inputs).unwrap()
    }

    #[test]
    fn test_fixed_threshold_counts() {
        let dates = daily_dates(2001, 2001).unwrap();
        let tasmax = test_utils::hot_summer_year(365, 20.0, 35.0);
        assert_eq!(
            run("summer_days", &dates, &[("tasmax", Units::Celsius, tasmax)]),
            vec![165.0]
        );

        let tasmin: Vec<f32> = (0..365).map(|d| if d < 30 { -5.0 } else { 21.0 }).collect();
        let series = [("tasmin", Units::Celsius, tasmin)];
        assert_eq!(run("frost_days", &dates, &series), vec![30.0]);
        assert_eq!(run("tropical_nights", &dates, &series), vec![335.0]);
    }

    #[test]
    fn test_strict_comparison_at_limit() {
        let dates = daily_dates(2001, 2001).unwrap();
        let series = [("tasmax", Units::Celsius, vec![25.0; 365])];
        assert_eq!(run("summer_days", &dates, &series), vec![0.0]);
    }

    #[test]
    fn test_extremes_and_range() {
        let dates = daily_dates(2001, 2001).unwrap();
        let tasmax = test_utils::ramp_series(365, 0.0, 0.1);
        let tasmin: Vec<f32> = tasmax.iter().map(|v| v - 8.0).collect();
        let series = [
            ("tasmax", Units::Celsius, tasmax),
            ("tasmin", Units::Celsius, tasmin),
        ];
        test_utils::assert_approx_eq!(run("txx", &dates, &series)[0], 36.4, 1e-3);
        test_utils::assert_approx_eq!(run("tnn", &dates, &series)[0], -8.0, 1e-3);
        test_utils::assert_approx_eq!(run("dtr", &dates, &series)[0], 8.0, 1e-3);
    }

    #[test]
    fn test_percentile_days() {
        let dates = daily_dates(2001, 2001).unwrap();
        let tasmax = test_utils::hot_summer_year(365, 20.0, 35.0);
        let registry = IndexRegistry::standard();
        let tx90p = registry.get("tx90p").unwrap();
        let inputs = single_cell_inputs(
            &dates,
            &[("tasmax", Units::Celsius, tasmax)],
            Some(baseline_with("tasmax_p90", "tasmax", 30.0)),
        );
        assert_eq!(compute_index_tile(tx90p.as_ref(), &inputs).unwrap(), vec![165.0]);
    }

    #[test]
    fn test_all_nan_year_is_nan() {
        let dates = daily_dates(2001, 2001).unwrap();
        let series = [("tasmax", Units::Celsius, vec![f32::NAN; 365])];
        assert!(run("summer_days", &dates, &series)[0].is_nan());
        assert!(run("txx", &dates, &series)[0].is_nan());
    }
}
