//! Error types for the forecasting engine

use thiserror::Error;

/// Errors surfaced by the engine and its service wrapper
#[derive(Debug, Error)]
pub enum ForecastError {
    /// Forecast requested before enough rounds were ingested
    #[error("insufficient data: need at least {required} rounds, have {available}")]
    InsufficientData { required: usize, available: usize },

    /// A trainable model failed to fit or predict
    #[error("model {model} training failed: {reason}")]
    ModelTraining { model: String, reason: String },

    /// Round event that cannot be turned into a session
    #[error("invalid round: {0}")]
    InvalidRound(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The service task has stopped and no longer accepts commands
    #[error("forecast service closed")]
    ServiceClosed,
}

impl ForecastError {
    /// Error code used by reporting layers (mirrors the upstream API codes)
    pub fn code(&self) -> &'static str {
        match self {
            ForecastError::InsufficientData { .. } => "INSUFFICIENT_DATA",
            ForecastError::ModelTraining { .. } => "MODEL_TRAINING_FAILURE",
            ForecastError::InvalidRound(_) => "INVALID_ROUND",
            ForecastError::Config(_) => "CONFIG",
            ForecastError::Io(_) => "IO",
            ForecastError::Json(_) => "JSON",
            ForecastError::ServiceClosed => "SERVICE_CLOSED",
        }
    }

    /// Whether the caller can retry after ingesting more data
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ForecastError::InsufficientData { .. } | ForecastError::ModelTraining { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ForecastError>;
