//! Climate index formulas and the registry that names them.
//!
//! Every index implements [`IndexComputation`]: it declares the canonical
//! variables and baseline thresholds it needs, and reduces one cell-year of
//! daily data to a single value. [`compute_index_tile`] drives a formula over
//! a forced spatial tile.

mod compound;
mod precipitation;
pub mod resample;
mod temperature;

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use grid_store::time::DAYS_IN_LEAP_YEAR;
use grid_store::{InterpolationMethod, TileSeries, TileWindow, Units};
use serde::{Deserialize, Serialize};

use crate::baseline::BaselineThresholds;
use crate::error::{EngineError, IndexError};

pub use resample::{year_groups, YearGroup};

/// What an index value measures. Drives interpolation and unit handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Number of days.
    Count,
    /// An absolute temperature.
    Temperature,
    /// A temperature difference; never offset between scales.
    TemperatureDifference,
    /// Accumulated precipitation.
    Amount,
    /// Precipitation per wet day.
    Intensity,
}

impl IndexKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Temperature => "temperature",
            Self::TemperatureDifference => "temperature_difference",
            Self::Amount => "amount",
            Self::Intensity => "intensity",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "count" => Some(Self::Count),
            "temperature" => Some(Self::Temperature),
            "temperature_difference" => Some(Self::TemperatureDifference),
            "amount" => Some(Self::Amount),
            "intensity" => Some(Self::Intensity),
            _ => None,
        }
    }

    /// Point lookup method for this kind.
    pub fn interpolation(&self) -> InterpolationMethod {
        match self {
            Self::Count => InterpolationMethod::Nearest,
            _ => InterpolationMethod::Bilinear,
        }
    }
}

/// Canonical units each input variable must be in.
pub fn expected_units(variable: &str) -> Option<Units> {
    match variable {
        "tasmax" | "tasmin" | "tas" => Some(Units::Celsius),
        "pr" => Some(Units::MillimetersPerDay),
        "hurs" => Some(Units::Percent),
        _ => None,
    }
}

/// One cell's data for one year.
pub struct YearSlice<'a> {
    index: &'a str,
    pub year: i32,
    /// 1-based ordinal day of every value in the year.
    pub doys: &'a [usize],
    range: Range<usize>,
    variables: &'a BTreeMap<&'a str, Vec<f32>>,
    thresholds: &'a BTreeMap<&'a str, &'a [f32]>,
}

impl<'a> YearSlice<'a> {
    /// Daily values of an input variable.
    pub fn var(&self, name: &str) -> Result<&[f32], IndexError> {
        self.variables
            .get(name)
            .map(|v| &v[self.range.clone()])
            .ok_or_else(|| IndexError::MissingInput {
                index: self.index.to_string(),
                input: name.to_string(),
            })
    }

    /// Day-of-year thresholds (366 slots) of a baseline threshold.
    pub fn threshold(&self, name: &str) -> Result<&[f32], IndexError> {
        self.thresholds
            .get(name)
            .copied()
            .ok_or_else(|| IndexError::MissingThreshold {
                index: self.index.to_string(),
                threshold: name.to_string(),
            })
    }

    /// Threshold applying to the `i`-th day of the year.
    pub fn threshold_on(&self, thresholds: &[f32], i: usize) -> f32 {
        thresholds[self.doys[i] - 1]
    }
}

/// A climate index formula.
pub trait IndexComputation: Send + Sync {
    /// Registry name, also the output variable name.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Canonical input variables.
    fn required_inputs(&self) -> &[&'static str];

    /// Baseline thresholds consumed, by name.
    fn thresholds(&self) -> &[&'static str] {
        &[]
    }

    fn kind(&self) -> IndexKind;

    /// Units of the result.
    fn units(&self) -> Units;

    /// Reduce one cell-year to a value.
    fn compute(&self, year: &YearSlice<'_>) -> Result<f32, IndexError>;
}

/// Forced inputs for one spatial tile of one chunk.
pub struct TileInputs {
    pub tile: TileWindow,
    pub series: BTreeMap<String, TileSeries>,
    pub thresholds: Option<Arc<BaselineThresholds>>,
    pub years: Vec<YearGroup>,
    /// 1-based ordinal day of every time step.
    pub doys: Vec<usize>,
}

/// Evaluate `index` on every cell-year of a tile.
///
/// Output is `[year][lat][lon]` in tile-local order.
pub fn compute_index_tile(
    index: &dyn IndexComputation,
    inputs: &TileInputs,
) -> Result<Vec<f32>, IndexError> {
    let name = index.name();

    for input in index.required_inputs() {
        let series = inputs
            .series
            .get(*input)
            .ok_or_else(|| IndexError::MissingInput {
                index: name.to_string(),
                input: input.to_string(),
            })?;
        if let Some(expected) = expected_units(input) {
            if series.units != expected && series.units != Units::Unknown {
                return Err(IndexError::Units {
                    index: name.to_string(),
                    input: input.to_string(),
                    expected: expected.as_attr(),
                    actual: series.units.as_attr(),
                });
            }
        }
    }

    let baseline = match (index.thresholds().is_empty(), &inputs.thresholds) {
        (true, _) => None,
        (false, Some(b)) => Some(b.as_ref()),
        (false, None) => {
            return Err(IndexError::MissingThreshold {
                index: name.to_string(),
                threshold: index.thresholds().join(", "),
            })
        }
    };
    if let Some(baseline) = baseline {
        for t in index.thresholds() {
            if baseline.get(t).is_none() {
                return Err(IndexError::MissingThreshold {
                    index: name.to_string(),
                    threshold: t.to_string(),
                });
            }
        }
    }

    let tile = inputs.tile;
    let cells = tile.cells();
    let mut out = vec![f32::NAN; inputs.years.len() * cells];

    for y in 0..tile.lat_len {
        for x in 0..tile.lon_len {
            let variables: BTreeMap<&str, Vec<f32>> = index
                .required_inputs()
                .iter()
                .map(|v| (*v, inputs.series[*v].cell_series(y, x)))
                .collect();

            let mut thresholds: BTreeMap<&str, &[f32]> = BTreeMap::new();
            if let Some(baseline) = baseline {
                for t in index.thresholds() {
                    if let Some(cell) =
                        baseline.cell(t, tile.lat_start + y, tile.lon_start + x)
                    {
                        debug_assert_eq!(cell.len(), DAYS_IN_LEAP_YEAR);
                        thresholds.insert(*t, cell);
                    }
                }
            }

            for (yi, group) in inputs.years.iter().enumerate() {
                let slice = YearSlice {
                    index: name,
                    year: group.year,
                    doys: &inputs.doys[group.range.clone()],
                    range: group.range.clone(),
                    variables: &variables,
                    thresholds: &thresholds,
                };
                out[yi * cells + y * tile.lon_len + x] = index.compute(&slice)?;
            }
        }
    }

    Ok(out)
}

/// Index formulas keyed by name.
#[derive(Clone)]
pub struct IndexRegistry {
    indices: BTreeMap<String, Arc<dyn IndexComputation>>,
}

impl IndexRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            indices: BTreeMap::new(),
        }
    }

    /// The standard index set with a 1 mm wet-day threshold.
    pub fn standard() -> Self {
        Self::with_wet_day_threshold(1.0)
    }

    /// The standard index set with the given wet-day threshold (mm/day).
    pub fn with_wet_day_threshold(wet_day_mm: f32) -> Self {
        let mut registry = Self::new();
        for index in temperature::indices() {
            registry.register(index);
        }
        for index in precipitation::indices(wet_day_mm) {
            registry.register(index);
        }
        for index in compound::indices() {
            registry.register(index);
        }
        registry
    }

    pub fn register(&mut self, index: Arc<dyn IndexComputation>) {
        self.indices.insert(index.name().to_string(), index);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn IndexComputation>> {
        self.indices.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.indices.keys().cloned().collect()
    }

    /// Look up every requested name; unknown names are a configuration error.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<Arc<dyn IndexComputation>>, EngineError> {
        let unknown: Vec<&str> = names
            .iter()
            .filter(|n| !self.indices.contains_key(n.as_str()))
            .map(|n| n.as_str())
            .collect();
        if !unknown.is_empty() {
            return Err(EngineError::config(format!(
                "unknown indices: {} (available: {})",
                unknown.join(", "),
                self.names().join(", ")
            )));
        }

        let mut resolved = Vec::with_capacity(names.len());
        for name in names {
            if resolved
                .iter()
                .any(|i: &Arc<dyn IndexComputation>| i.name() == name.as_str())
            {
                continue;
            }
            resolved.push(self.indices[name.as_str()].clone());
        }
        Ok(resolved)
    }
}

impl Default for IndexRegistry {
    fn default() -> Self {
        Self::standard()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::single_cell_inputs;
    use super::*;
    use grid_store::time::daily_dates;

    #[test]
    fn test_standard_registry() {
        let registry = IndexRegistry::standard();
        for name in [
            "tx90p",
            "tx10p",
            "tn90p",
            "tn10p",
            "summer_days",
            "frost_days",
            "tropical_nights",
            "txx",
            "tnn",
            "dtr",
            "prcptot",
            "r10mm",
            "r20mm",
            "rx1day",
            "rx5day",
            "cdd",
            "cwd",
            "sdii",
            "r95ptot",
            "r99ptot",
            "cold_dry_days",
            "cold_wet_days",
            "warm_dry_days",
            "warm_wet_days",
        ] {
            assert!(registry.get(name).is_some(), "missing {name}");
        }
    }

    #[test]
    fn test_resolve_unknown_is_config_error() {
        let registry = IndexRegistry::standard();
        let err = registry
            .resolve(&["summer_days".to_string(), "nope".to_string()])
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::Config(_)));
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_resolve_deduplicates() {
        let registry = IndexRegistry::standard();
        let resolved = registry
            .resolve(&["txx".to_string(), "txx".to_string()])
            .unwrap();
        assert_eq!(resolved.len(), 1);
    }

    #[test]
    fn test_kind_interpolation() {
        assert_eq!(IndexKind::Count.interpolation(), InterpolationMethod::Nearest);
        assert_eq!(
            IndexKind::Temperature.interpolation(),
            InterpolationMethod::Bilinear
        );
        assert_eq!(
            IndexKind::from_str("temperature_difference"),
            Some(IndexKind::TemperatureDifference)
        );
    }

    #[test]
    fn test_missing_input_and_threshold() {
        let registry = IndexRegistry::standard();
        let dates = daily_dates(2001, 2001).unwrap();
        let inputs = single_cell_inputs(&dates, &[], None);

        let su = registry.get("summer_days").unwrap();
        assert!(matches!(
            compute_index_tile(su.as_ref(), &inputs),
            Err(IndexError::MissingInput { .. })
        ));

        let inputs = single_cell_inputs(
            &dates,
            &[("tasmax", Units::Celsius, vec![30.0; 365])],
            None,
        );
        let tx90p = registry.get("tx90p").unwrap();
        assert!(matches!(
            compute_index_tile(tx90p.as_ref(), &inputs),
            Err(IndexError::MissingThreshold { .. })
        ));
    }

    #[test]
    fn test_wrong_units_rejected() {
        let registry = IndexRegistry::standard();
        let dates = daily_dates(2001, 2001).unwrap();
        let inputs = single_cell_inputs(
            &dates,
            &[("tasmax", Units::Kelvin, vec![300.0; 365])],
            None,
        );
        let su = registry.get("summer_days").unwrap();
        assert!(matches!(
            compute_index_tile(su.as_ref(), &inputs),
            Err(IndexError::Units { .. })
        ));
    }

    #[test]
    fn test_output_layout_per_year() {
        let registry = IndexRegistry::standard();
        let dates = daily_dates(2001, 2002).unwrap();
        let mut tasmax = vec![20.0; 730];
        for v in tasmax.iter_mut().skip(365).take(10) {
            *v = 30.0;
        }
        let inputs = single_cell_inputs(&dates, &[("tasmax", Units::Celsius, tasmax)], None);
        let su = registry.get("summer_days").unwrap();
        let out = compute_index_tile(su.as_ref(), &inputs).unwrap();
        assert_eq!(out, vec![0.0, 10.0]);
    }
}
