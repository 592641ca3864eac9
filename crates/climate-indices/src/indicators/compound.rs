//! Compound temperature/precipitation indices.
//!
//! Cold and warm days are below the baseline 25th / above the 75th percentile
//! of daily mean temperature; dry and wet days are below the 25th / above the
//! 75th wet-day percentile of precipitation.

use std::sync::Arc;

use grid_store::Units;

use super::resample::count_where;
use super::{IndexComputation, IndexKind, YearSlice};
use crate::error::IndexError;

#[derive(Clone, Copy)]
enum Side {
    Below,
    Above,
}

impl Side {
    fn test(self, value: f32, threshold: f32) -> bool {
        match self {
            Side::Below => value < threshold,
            Side::Above => value > threshold,
        }
    }
}

struct CompoundDays {
    name: &'static str,
    description: &'static str,
    thresholds: [&'static str; 2],
    temperature: Side,
    precipitation: Side,
}

impl IndexComputation for CompoundDays {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn required_inputs(&self) -> &[&'static str] {
        &["tas", "pr"]
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
        let tas = year.var("tas")?;
        let pr = year.var("pr")?;
        let tas_t = year.threshold(self.thresholds[0])?;
        let pr_t = year.threshold(self.thresholds[1])?;

        // A day counts only when both variables are present.
        let joint: Vec<f32> = tas
            .iter()
            .zip(pr)
            .map(|(t, p)| if p.is_nan() { f32::NAN } else { *t })
            .collect();

        Ok(count_where(&joint, |i, t| {
            self.temperature.test(t, year.threshold_on(tas_t, i))
                && self.precipitation.test(pr[i], year.threshold_on(pr_t, i))
        }))
    }
}

pub(super) fn indices() -> Vec<Arc<dyn IndexComputation>> {
    vec![
        Arc::new(CompoundDays {
            name: "cold_dry_days",
            description: "Days both colder than the 25th and drier than the 25th percentile",
            thresholds: ["tas_p25", "pr_p25"],
            temperature: Side::Below,
            precipitation: Side::Below,
        }),
        Arc::new(CompoundDays {
            name: "cold_wet_days",
            description: "Days both colder than the 25th and wetter than the 75th percentile",
            thresholds: ["tas_p25", "pr_p75"],
            temperature: Side::Below,
            precipitation: Side::Above,
        }),
        Arc::new(CompoundDays {
            name: "warm_dry_days",
            description: "Days both warmer than the 75th and drier than the 25th percentile",
            thresholds: ["tas_p75", "pr_p25"],
            temperature: Side::Above,
            precipitation: Side::Below,
        }),
        Arc::new(CompoundDays {
            name: "warm_wet_days",
            description: "Days both warmer than the 75th and wetter than the 75th percentile",
            thresholds: ["tas_p75", "pr_p75"],
            temperature: Side::Above,
            precipitation: Side::Above,
        }),
    ]
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use grid_store::time::daily_dates;
    use grid_store::GridCoordinates;

    use super::super::test_support::single_cell_inputs;
    use super::super::{compute_index_tile, IndexRegistry};
    use super::*;
    use crate::baseline::{BaselineThresholds, ThresholdArray};

    fn baseline() -> Arc<BaselineThresholds> {
        let mut thresholds = BTreeMap::new();
        for (name, variable, value) in [
            ("tas_p25", "tas", 5.0),
            ("tas_p75", "tas", 20.0),
            ("pr_p25", "pr", 2.0),
            ("pr_p75", "pr", 10.0),
        ] {
            thresholds.insert(
                name.to_string(),
                ThresholdArray {
                    name: name.to_string(),
                    variable: variable.to_string(),
                    percentile: 25,
                    units: Units::Unknown,
                    data: vec![value; 366],
                    attrs: Default::default(),
                },
            );
        }
        Arc::new(BaselineThresholds {
            coords: GridCoordinates::new(vec![40.0], vec![-100.0]).unwrap(),
            start_year: 1981,
            end_year: 2010,
            window_days: 5,
            thresholds,
        })
    }

    #[test]
    fn test_compound_quadrants() {
        let dates = daily_dates(2001, 2001).unwrap();
        // 10 cold-dry, 20 cold-wet, 30 warm-dry, 40 warm-wet, rest neutral.
        let mut tas = vec![12.0; 365];
        let mut pr = vec![5.0; 365];
        let mut fill = |range: std::ops::Range<usize>, t: f32, p: f32| {
            for i in range {
                tas[i] = t;
                pr[i] = p;
            }
        };
        fill(0..10, 0.0, 0.0);
        fill(10..30, 0.0, 15.0);
        fill(30..60, 25.0, 1.0);
        fill(60..100, 25.0, 15.0);

        let inputs = single_cell_inputs(
            &dates,
            &[
                ("tas", Units::Celsius, tas),
                ("pr", Units::MillimetersPerDay, pr),
            ],
            Some(baseline()),
        );
        let registry = IndexRegistry::standard();
        for (name, expected) in [
            ("cold_dry_days", 10.0),
            ("cold_wet_days", 20.0),
            ("warm_dry_days", 30.0),
            ("warm_wet_days", 40.0),
        ] {
            let index = registry.get(name).unwrap();
            assert_eq!(
                compute_index_tile(index.as_ref(), &inputs).unwrap(),
                vec![expected],
                "{name}"
            );
        }
    }
}
