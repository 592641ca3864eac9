//! Physical units carried as metadata through every pipeline stage.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Offset between the Kelvin and Celsius scales.
pub const KELVIN_OFFSET: f32 = 273.15;

/// Seconds per day, for flux-to-depth conversion of precipitation.
const SECONDS_PER_DAY: f32 = 86_400.0;

/// Units understood by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Units {
    Celsius,
    Kelvin,
    /// Daily precipitation depth.
    MillimetersPerDay,
    /// Precipitation flux (kg m-2 s-1).
    KgPerSquareMeterPerSecond,
    /// Daily precipitation depth in meters.
    MetersPerDay,
    /// Accumulated precipitation depth.
    Millimeters,
    Days,
    Percent,
    /// Temperature difference; never offset between scales.
    KelvinDelta,
    Other(String),
    Unknown,
}

impl Units {
    /// Parse a CF-style units attribute.
    pub fn parse(s: &str) -> Self {
        let normalized = s.trim().to_lowercase();
        match normalized.as_str() {
            "" => Self::Unknown,
            "degc" | "c" | "°c" | "celsius" | "deg_c" | "degree_celsius" | "degrees_celsius" => {
                Self::Celsius
            }
            "k" | "kelvin" | "degk" => Self::Kelvin,
            "mm/day" | "mm d-1" | "mm day-1" | "mm/d" => Self::MillimetersPerDay,
            "kg m-2 s-1" | "kg/m2/s" | "kg m**-2 s**-1" => Self::KgPerSquareMeterPerSecond,
            "m/day" | "m d-1" | "m" => Self::MetersPerDay,
            "mm" => Self::Millimeters,
            "days" | "day" | "d" => Self::Days,
            "%" | "percent" => Self::Percent,
            "delta_degc" | "delta_k" => Self::KelvinDelta,
            _ => Self::Other(s.trim().to_string()),
        }
    }

    /// Attribute string written to archives.
    pub fn as_attr(&self) -> String {
        match self {
            Self::Celsius => "degC".to_string(),
            Self::Kelvin => "K".to_string(),
            Self::MillimetersPerDay => "mm/day".to_string(),
            Self::KgPerSquareMeterPerSecond => "kg m-2 s-1".to_string(),
            Self::MetersPerDay => "m/day".to_string(),
            Self::Millimeters => "mm".to_string(),
            Self::Days => "days".to_string(),
            Self::Percent => "%".to_string(),
            Self::KelvinDelta => "delta_degC".to_string(),
            Self::Other(s) => s.clone(),
            Self::Unknown => String::new(),
        }
    }

    /// True for absolute temperature scales.
    pub fn is_temperature(&self) -> bool {
        matches!(self, Self::Celsius | Self::Kelvin)
    }

    /// True for any representation of precipitation.
    pub fn is_precipitation(&self) -> bool {
        matches!(
            self,
            Self::MillimetersPerDay | Self::KgPerSquareMeterPerSecond | Self::MetersPerDay
        )
    }

    /// Return the affine transform `value * scale + offset` converting `self` into `target`.
    pub fn conversion_to(&self, target: &Units) -> Result<(f32, f32)> {
        if self == target {
            return Ok((1.0, 0.0));
        }
        match (self, target) {
            (Self::Kelvin, Self::Celsius) => Ok((1.0, -KELVIN_OFFSET)),
            (Self::Celsius, Self::Kelvin) => Ok((1.0, KELVIN_OFFSET)),
            (Self::KgPerSquareMeterPerSecond, Self::MillimetersPerDay) => {
                Ok((SECONDS_PER_DAY, 0.0))
            }
            (Self::MetersPerDay, Self::MillimetersPerDay) => Ok((1000.0, 0.0)),
            // A daily total in mm is the same number as mm/day.
            (Self::Millimeters, Self::MillimetersPerDay) => Ok((1.0, 0.0)),
            _ => Err(StoreError::UnitConversion {
                from: self.as_attr(),
                to: target.as_attr(),
            }),
        }
    }

    /// Convert a buffer in place. NaN stays NaN.
    pub fn convert_in_place(&self, target: &Units, values: &mut [f32]) -> Result<()> {
        let (scale, offset) = self.conversion_to(target)?;
        if scale == 1.0 && offset == 0.0 {
            return Ok(());
        }
        for v in values.iter_mut() {
            *v = *v * scale + offset;
        }
        Ok(())
    }
}

impl std::fmt::Display for Units {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_attr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_common_attributes() {
        assert_eq!(Units::parse("degC"), Units::Celsius);
        assert_eq!(Units::parse("K"), Units::Kelvin);
        assert_eq!(Units::parse("mm/day"), Units::MillimetersPerDay);
        assert_eq!(Units::parse("kg m-2 s-1"), Units::KgPerSquareMeterPerSecond);
        assert_eq!(Units::parse(""), Units::Unknown);
        assert_eq!(Units::parse("furlongs"), Units::Other("furlongs".to_string()));
    }

    #[test]
    fn test_kelvin_to_celsius() {
        let mut values = vec![273.15, 300.0, f32::NAN];
        Units::Kelvin
            .convert_in_place(&Units::Celsius, &mut values)
            .unwrap();
        assert!(values[0].abs() < 1e-4);
        assert!((values[1] - 26.85).abs() < 1e-3);
        assert!(values[2].is_nan());
    }

    #[test]
    fn test_flux_to_depth() {
        let mut values = vec![1.0 / 86_400.0];
        Units::KgPerSquareMeterPerSecond
            .convert_in_place(&Units::MillimetersPerDay, &mut values)
            .unwrap();
        assert!((values[0] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_incompatible_units_error() {
        assert!(Units::Kelvin.conversion_to(&Units::MillimetersPerDay).is_err());
        assert!(Units::KelvinDelta.conversion_to(&Units::Celsius).is_err());
    }
}
