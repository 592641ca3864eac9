//! Configuration loader for the indices runner.
//!
//! Loads a single YAML file with three sections:
//! - `logging`: level and output format
//! - `paths`: default data root, output directory and baseline archive
//! - `engine`: chunking, memory limits, workers and the percentile catalog
//!
//! Every field is optional. Supports environment variable substitution using
//! ${VAR} syntax.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use climate_indices::EngineConfig;
use serde::{Deserialize, Serialize};

// ============================================================================
// Runner Configuration
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub logging: LoggingConfig,
    pub paths: PathsConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_root: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub baseline: Option<PathBuf>,
}

impl RunnerConfig {
    /// Configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self {
            engine: EngineConfig::from_env(),
            ..Self::default()
        };
        if let Ok(level) = std::env::var("INDICES_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(root) = std::env::var("INDICES_DATA_ROOT") {
            config.paths.data_root = Some(PathBuf::from(root));
        }
        if let Ok(dir) = std::env::var("INDICES_OUTPUT_DIR") {
            config.paths.output_dir = Some(PathBuf::from(dir));
        }
        config
    }
}

// ============================================================================
// Loading Functions
// ============================================================================

/// Load and parse a runner YAML file with environment variable substitution
pub fn load_runner_config<P: AsRef<Path>>(path: P) -> Result<RunnerConfig> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read runner config from {:?}", path.as_ref()))?;

    let expanded = expand_env_vars(&content)?;

    let config: RunnerConfig = serde_yaml::from_str(&expanded)
        .with_context(|| format!("Failed to parse runner config from {:?}", path.as_ref()))?;

    validate_runner_config(&config)?;

    Ok(config)
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in YAML content
/// Supports ${VAR} and ${VAR:-default} syntax
fn expand_env_vars(content: &str) -> Result<String> {
    let mut result = String::new();
    let mut chars = content.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'

            let mut var_expr = String::new();
            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(c) => var_expr.push(c),
                    None => anyhow::bail!("Unclosed variable substitution: ${{{}", var_expr),
                }
            }

            result.push_str(&resolve_var_expr(&var_expr)?);
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}

/// Resolve variable expression (supports VAR and VAR:-default syntax)
fn resolve_var_expr(expr: &str) -> Result<String> {
    if let Some((var_name, default)) = expr.split_once(":-") {
        match std::env::var(var_name.trim()) {
            Ok(val) if !val.is_empty() => Ok(val),
            _ => Ok(default.to_string()),
        }
    } else {
        std::env::var(expr.trim()).with_context(|| format!("Environment variable {} not set", expr))
    }
}

// ============================================================================
// Validation
// ============================================================================

pub fn validate_runner_config(config: &RunnerConfig) -> Result<()> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    anyhow::ensure!(
        valid_levels.contains(&config.logging.level.to_lowercase().as_str()),
        "Invalid log level: {}. Must be one of: {:?}",
        config.logging.level,
        valid_levels
    );

    config
        .engine
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid engine config: {e}"))?;

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use climate_indices::QuantileMethod;

    #[test]
    fn test_expand_env_vars_simple() {
        std::env::set_var("RUNNER_TEST_ROOT", "/data/stores");
        let result = expand_env_vars("data_root: ${RUNNER_TEST_ROOT}/daily").unwrap();
        assert_eq!(result, "data_root: /data/stores/daily");
    }

    #[test]
    fn test_expand_env_vars_with_default() {
        std::env::remove_var("RUNNER_UNSET_WORKERS");
        let result = expand_env_vars("workers: ${RUNNER_UNSET_WORKERS:-8}").unwrap();
        assert_eq!(result, "workers: 8");
    }

    #[test]
    fn test_expand_env_vars_errors() {
        std::env::remove_var("RUNNER_REQUIRED_VAR");
        assert!(expand_env_vars("${RUNNER_REQUIRED_VAR}").is_err());
        assert!(expand_env_vars("${UNCLOSED").is_err());
    }

    #[test]
    fn test_load_partial_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runner.yaml");
        std::env::set_var("RUNNER_TEST_OUTPUT", "/tmp/indices");
        fs::write(
            &path,
            r#"
logging:
  level: debug
  format: pretty
paths:
  output_dir: ${RUNNER_TEST_OUTPUT}
engine:
  chunk_years: 5
  workers: ${RUNNER_TEST_WORKERS:-2}
  quantile_method: linear
  percentiles:
    - variable: tasmax
      percentile: 95
    - variable: pr
      percentile: 90
      wet_days: true
"#,
        )
        .unwrap();

        let config = load_runner_config(&path).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.paths.output_dir, Some(PathBuf::from("/tmp/indices")));
        assert_eq!(config.paths.data_root, None);
        assert_eq!(config.engine.chunk_years, 5);
        assert_eq!(config.engine.workers, 2);
        assert_eq!(config.engine.window_days, 5);
        assert_eq!(config.engine.quantile_method, QuantileMethod::Linear);
        assert_eq!(config.engine.percentiles.len(), 2);
        assert!(config.engine.percentiles[1].wet_days);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();

        let path = dir.path().join("level.yaml");
        fs::write(&path, "logging:\n  level: loud\n").unwrap();
        assert!(load_runner_config(&path).is_err());

        let path = dir.path().join("window.yaml");
        fs::write(&path, "engine:\n  window_days: 4\n").unwrap();
        let err = load_runner_config(&path).unwrap_err();
        assert!(err.to_string().contains("window_days"));
    }
}
