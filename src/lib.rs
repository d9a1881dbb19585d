//! Round forecasting engine
//!
//! Forecasts the next round of a repeating three-dice game (over when the
//! total is 11 or more, under otherwise):
//! - `history`: bounded, deduplicated, id-ordered session store per table
//! - `ml`: feature extraction, five predictors and the weighted ensemble
//! - `ledger`: forecast bookkeeping and accuracy statistics
//! - `engine`: synchronous facade tying ingestion, resolution and forecasting together
//! - `service`: tokio actor running an engine behind channels

pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod ledger;
pub mod ml;
pub mod service;
pub mod types;

pub use config::EngineConfig;
pub use engine::{ForecastEngine, IngestOutcome, TableStats, TableStatus};
pub use error::{ForecastError, Result};
pub use history::{HistorySummary, SessionHistoryStore};
pub use ledger::{AccuracyLedger, DetailedStats, Prediction};
pub use ml::{EnsembleCoordinator, ModelKind, Predictor};
pub use service::{ForecastEvent, ForecastService, ServiceHandle};
pub use types::{Confidence, Outcome, RoundEvent, Session, OUTCOME_THRESHOLD};
