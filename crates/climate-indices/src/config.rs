//! Configuration for the indices engine.

use grid_store::StoreConfig;
use serde::{Deserialize, Serialize};

use crate::baseline::{default_catalog, PercentileSpec};
use crate::quantile::QuantileMethod;

const MB: u64 = 1024 * 1024;

/// Tuning knobs shared by the baseline engine and the streaming executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Years per temporal chunk before memory clamping.
    pub chunk_years: usize,

    /// Memory ceiling for one chunk's input variables, in megabytes.
    pub memory_limit_mb: u64,

    /// Worker threads for tile-parallel computation.
    pub workers: usize,

    /// Memory limit per worker (one tile), in megabytes.
    pub worker_memory_limit_mb: u64,

    /// Spatial tile override `(lat, lon)`; the store's chunk shape when unset.
    pub tile_shape: Option<(usize, usize)>,

    /// Width of the centered day-of-year pooling window.
    pub window_days: usize,

    /// Precipitation below this amount (mm/day) is a dry day.
    pub wet_day_threshold_mm: f32,

    /// Sample quantile definition for percentile thresholds.
    pub quantile_method: QuantileMethod,

    /// Percentile thresholds computed by the baseline engine.
    pub percentiles: Vec<PercentileSpec>,

    /// Archive writing options.
    pub store: StoreConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_years: 10,
            memory_limit_mb: 16 * 1024,
            workers: 4,
            worker_memory_limit_mb: 2048,
            tile_shape: None,
            window_days: 5,
            wet_day_threshold_mm: 1.0,
            quantile_method: QuantileMethod::default(),
            percentiles: default_catalog(),
            store: StoreConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self {
            store: StoreConfig::from_env(),
            ..Self::default()
        };

        if let Ok(val) = std::env::var("INDICES_CHUNK_YEARS") {
            if let Ok(years) = val.parse() {
                config.chunk_years = years;
            }
        }

        if let Ok(val) = std::env::var("INDICES_MEMORY_LIMIT_MB") {
            if let Ok(mb) = val.parse() {
                config.memory_limit_mb = mb;
            }
        }

        if let Ok(val) = std::env::var("INDICES_WORKERS") {
            if let Ok(workers) = val.parse() {
                config.workers = workers;
            }
        }

        if let Ok(val) = std::env::var("INDICES_WORKER_MEMORY_LIMIT_MB") {
            if let Ok(mb) = val.parse() {
                config.worker_memory_limit_mb = mb;
            }
        }

        if let Ok(val) = std::env::var("INDICES_WINDOW_DAYS") {
            if let Ok(days) = val.parse() {
                config.window_days = days;
            }
        }

        if let Ok(val) = std::env::var("INDICES_QUANTILE_METHOD") {
            if let Some(method) = QuantileMethod::from_str(&val) {
                config.quantile_method = method;
            }
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_years == 0 {
            return Err("chunk_years must be > 0".to_string());
        }

        if self.workers == 0 {
            return Err("workers must be > 0".to_string());
        }

        if self.memory_limit_mb == 0 || self.worker_memory_limit_mb == 0 {
            return Err("memory limits must be > 0".to_string());
        }

        if self.window_days == 0 || self.window_days % 2 == 0 {
            return Err("window_days must be odd and > 0".to_string());
        }

        if !(self.wet_day_threshold_mm >= 0.0) {
            return Err("wet_day_threshold_mm must be >= 0".to_string());
        }

        if let Some((lat, lon)) = self.tile_shape {
            if lat == 0 || lon == 0 {
                return Err("tile_shape dimensions must be > 0".to_string());
            }
        }

        for spec in &self.percentiles {
            if spec.percentile == 0 || spec.percentile >= 100 {
                return Err(format!(
                    "percentile for '{}' must be in 1..=99",
                    spec.variable
                ));
            }
        }

        self.store.validate()
    }

    /// Memory ceiling in bytes.
    pub fn memory_limit_bytes(&self) -> u64 {
        self.memory_limit_mb * MB
    }

    /// Per-worker memory limit in bytes.
    pub fn worker_memory_limit_bytes(&self) -> u64 {
        self.worker_memory_limit_mb * MB
    }

    /// Half-width of the pooling window.
    pub fn half_window(&self) -> usize {
        self.window_days / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.chunk_years, 10);
        assert_eq!(config.window_days, 5);
        assert_eq!(config.half_window(), 2);
        assert_eq!(config.wet_day_threshold_mm, 1.0);
        assert_eq!(config.quantile_method, QuantileMethod::MedianUnbiased);
        assert_eq!(config.percentiles.len(), 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();
        config.chunk_years = 0;
        assert!(config.validate().is_err());

        config = EngineConfig::default();
        config.window_days = 4;
        assert!(config.validate().is_err());

        config = EngineConfig::default();
        config.tile_shape = Some((0, 8));
        assert!(config.validate().is_err());

        config = EngineConfig::default();
        config.percentiles[0].percentile = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"chunk_years": 5, "quantile_method": "linear"}"#).unwrap();
        assert_eq!(config.chunk_years, 5);
        assert_eq!(config.quantile_method, QuantileMethod::Linear);
        assert_eq!(config.workers, 4);
    }
}
