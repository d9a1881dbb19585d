//! Prediction models and ensemble
//!
//! Provides the forecasting pipeline for over/under rounds:
//! - Feature engineering from session history
//! - Closed-form predictors (Markov chain, frequency, streak heuristic)
//! - Trainable predictors (logistic regression, small neural net) refitted on every call
//! - Accuracy-weighted ensemble with confidence grading

pub mod ensemble;
pub mod features;
pub mod logistic;
pub mod models;
pub mod neural;
pub mod predictor;
pub mod training;


pub use ensemble::EnsembleCoordinator;
pub use features::{FeatureConfig, FeatureExtractor, RoundFeatures};
pub use logistic::LogisticRegression;
pub use models::{FrequencyModel, HeuristicPatternModel, MarkovChainModel, MarkovEstimate};
pub use neural::NeuralNetwork;
pub use predictor::{ModelKind, Predictor};
pub use training::{Classifier, RetrainingModel, TrainingRow};

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

/// Probability returned by any model that cannot say anything useful
pub const NEUTRAL_PROBABILITY: Decimal = Decimal::from_parts(5, 0, 0, false, 1);

/// `None` for NaN and infinities
pub(crate) fn f64_to_decimal(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_f64(value)
}

pub(crate) fn decimal_to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.5)
}
