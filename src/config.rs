//! Engine configuration
//!
//! Every knob has a default matching the production deployment, so an empty
//! TOML file (or no file at all) yields a working engine. A handful of
//! settings can be overridden from `ROUND_FORECAST_*` environment variables.

use crate::error::{ForecastError, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub history: HistoryConfig,
    pub ledger: LedgerConfig,
    pub ensemble: EnsembleConfig,
    pub training: TrainingConfig,
    pub service: ServiceConfig,
}

/// Session history bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Sessions retained per table
    pub max_history: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { max_history: 1000 }
    }
}

/// Accuracy ledger bounds and windows
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Predictions retained per table
    pub max_predictions: usize,
    /// Correctness values retained per model
    pub model_window: usize,
    /// Window used when deriving a model's dynamic weight
    pub recent_model_window: usize,
    /// Window used by the "recent accuracy" statistic
    pub recent_accuracy_limit: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_predictions: 500,
            model_window: 100,
            recent_model_window: 20,
            recent_accuracy_limit: 50,
        }
    }
}

/// Ensemble combination and confidence rules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    /// Rounds required before any forecast is produced
    pub min_history: usize,
    /// Lower bound on a model's dynamic weight
    pub weight_floor: Decimal,
    /// History length that upgrades confidence to medium
    pub medium_confidence_history: usize,
    /// History length that upgrades confidence to high
    pub high_confidence_history: usize,
    /// Cross-model standard deviation below which confidence is forced high
    pub consensus_std_dev: f64,
    /// Score each model's own call on resolve and feed its accuracy window.
    /// Off by default: weights then stay at the neutral 0.5 for every model.
    pub attribute_model_accuracy: bool,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            min_history: 10,
            weight_floor: dec!(0.1),
            medium_confidence_history: 20,
            high_confidence_history: 50,
            consensus_std_dev: 0.1,
            attribute_model_accuracy: false,
        }
    }
}

/// Hyper-parameters for the trainable predictors
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// History length required before the trainable models fit anything
    pub min_history: usize,
    /// First history index used as a training label
    pub first_label_index: usize,
    /// Minimum usable training rows
    pub min_rows: usize,
    pub logistic_steps: usize,
    pub logistic_learning_rate: f64,
    pub nn_hidden_layers: Vec<usize>,
    pub nn_iterations: usize,
    pub nn_error_threshold: f64,
    pub nn_learning_rate: f64,
    pub nn_momentum: f64,
    /// Seed for network weight initialisation
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            min_history: 20,
            first_label_index: 10,
            min_rows: 5,
            logistic_steps: 1000,
            logistic_learning_rate: 0.1,
            nn_hidden_layers: vec![5, 3],
            nn_iterations: 100,
            nn_error_threshold: 0.01,
            nn_learning_rate: 0.3,
            nn_momentum: 0.1,
            seed: 42,
        }
    }
}

/// Async service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Command channel capacity
    pub channel_buffer_size: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self { channel_buffer_size: 1024 }
    }
}

impl EngineConfig {
    /// Parse a TOML document
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(raw).map_err(|e| ForecastError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `ROUND_FORECAST_*` overrides on top of the current values
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(v) = env_parse::<usize>("ROUND_FORECAST_MAX_HISTORY")? {
            self.history.max_history = v;
        }
        if let Some(v) = env_parse::<usize>("ROUND_FORECAST_MAX_PREDICTIONS")? {
            self.ledger.max_predictions = v;
        }
        if let Some(v) = env_parse::<bool>("ROUND_FORECAST_ATTRIBUTE_MODELS")? {
            self.ensemble.attribute_model_accuracy = v;
        }
        if let Some(v) = env_parse::<u64>("ROUND_FORECAST_SEED")? {
            self.training.seed = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.history.max_history == 0 {
            return Err(ForecastError::Config("history.max_history must be > 0".into()));
        }
        if self.ledger.max_predictions == 0 || self.ledger.model_window == 0 {
            return Err(ForecastError::Config("ledger windows must be > 0".into()));
        }
        if self.ensemble.min_history == 0 {
            return Err(ForecastError::Config("ensemble.min_history must be > 0".into()));
        }
        if self.ensemble.weight_floor <= Decimal::ZERO {
            return Err(ForecastError::Config("ensemble.weight_floor must be positive".into()));
        }
        if self.training.nn_hidden_layers.iter().any(|&n| n == 0) {
            return Err(ForecastError::Config("hidden layers must have at least one unit".into()));
        }
        let rates = [self.training.logistic_learning_rate, self.training.nn_learning_rate];
        if !rates.iter().all(|r| r.is_finite() && *r > 0.0) {
            return Err(ForecastError::Config("learning rates must be positive".into()));
        }
        let consensus = self.ensemble.consensus_std_dev;
        if !(consensus.is_finite() && consensus >= 0.0) {
            return Err(ForecastError::Config("ensemble.consensus_std_dev must be >= 0".into()));
        }
        let threshold = self.training.nn_error_threshold;
        if !(threshold.is_finite() && threshold >= 0.0) {
            return Err(ForecastError::Config("training.nn_error_threshold must be >= 0".into()));
        }
        if !(0.0..1.0).contains(&self.training.nn_momentum) {
            return Err(ForecastError::Config("training.nn_momentum must be in [0, 1)".into()));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ForecastError::Config(format!("{} has invalid value {:?}", key, raw))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.history.max_history, 1000);
        assert_eq!(config.ledger.max_predictions, 500);
        assert_eq!(config.ledger.model_window, 100);
        assert_eq!(config.ensemble.min_history, 10);
        assert_eq!(config.ensemble.weight_floor, dec!(0.1));
        assert_eq!(config.training.nn_hidden_layers, vec![5, 3]);
        assert!(!config.ensemble.attribute_model_accuracy);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [history]
            max_history = 200

            [ensemble]
            attribute_model_accuracy = true
            "#,
        )
        .unwrap();

        assert_eq!(config.history.max_history, 200);
        assert!(config.ensemble.attribute_model_accuracy);
        assert_eq!(config.ledger.max_predictions, 500);
        assert_eq!(config.training.logistic_steps, 1000);
    }

    #[test]
    fn test_invalid_toml_rejected() {
        let err = EngineConfig::from_toml_str("[history]\nmax_history = 0\n").unwrap_err();
        assert!(matches!(err, ForecastError::Config(_)));

        let err = EngineConfig::from_toml_str("[history\n").unwrap_err();
        assert!(matches!(err, ForecastError::Config(_)));
    }

    #[test]
    fn test_out_of_range_floats_rejected() {
        let cases = [
            "[ensemble]\nconsensus_std_dev = -0.1\n",
            "[ensemble]\nconsensus_std_dev = nan\n",
            "[training]\nnn_error_threshold = -1.0\n",
            "[training]\nnn_error_threshold = inf\n",
            "[training]\nnn_momentum = 1.5\n",
            "[training]\nnn_momentum = nan\n",
            "[training]\nlogistic_learning_rate = inf\n",
        ];
        for raw in cases {
            let err = EngineConfig::from_toml_str(raw).unwrap_err();
            assert!(matches!(err, ForecastError::Config(_)), "accepted {:?}", raw);
        }

        let config = EngineConfig::from_toml_str(
            "[ensemble]\nconsensus_std_dev = 0.0\n[training]\nnn_momentum = 0.0\n",
        )
        .unwrap();
        assert_eq!(config.training.nn_momentum, 0.0);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[training]\nseed = 7\nnn_iterations = 50").unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.training.seed, 7);
        assert_eq!(config.training.nn_iterations, 50);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = EngineConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ForecastError::Io(_)));
    }
}
