//! Shared plumbing for the trainable predictors
//!
//! Both trainable models rebuild their training set from the full history
//! and fit a brand-new classifier on every call. The `Classifier` trait is the
//! seam where an incremental implementation could replace the batch fitters.

use super::features::FeatureExtractor;
use super::{f64_to_decimal, NEUTRAL_PROBABILITY};
use crate::config::TrainingConfig;
use crate::error::{ForecastError, Result};
use crate::types::Session;
use rust_decimal::Decimal;
use std::marker::PhantomData;

/// One replayed (features, label) pair
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRow {
    pub features: Vec<f64>,
    /// 1.0 = over, 0.0 = under
    pub label: f64,
}

/// Replay `history` into training rows.
///
/// Row `i` (for `i >= first_label_index`) is labelled with the outcome of
/// `history[i]` and uses features from rounds strictly before it.
pub fn build_training_rows(
    history: &[Session],
    extractor: &FeatureExtractor,
    first_label_index: usize,
) -> Vec<TrainingRow> {
    (first_label_index..history.len())
        .filter_map(|i| {
            let target = &history[i];
            extractor
                .extract(&history[..i], Some(target.id))
                .map(|f| TrainingRow {
                    features: f.to_vector(),
                    label: target.outcome.as_binary(),
                })
        })
        .collect()
}

/// Binary classifier producing a probability of `Over`
pub trait Classifier: Sized {
    /// Model name used in logs and errors
    const NAME: &'static str;

    /// Fresh, untrained instance
    fn from_config(config: &TrainingConfig) -> Self;

    fn fit(&mut self, rows: &[TrainingRow]) -> Result<()>;

    fn predict_proba(&self, features: &[f64]) -> Result<f64>;

    fn training_error(reason: impl Into<String>) -> ForecastError {
        ForecastError::ModelTraining {
            model: Self::NAME.to_string(),
            reason: reason.into(),
        }
    }
}

/// Predictor that refits `C` from scratch on every call
#[derive(Debug, Clone)]
pub struct RetrainingModel<C> {
    config: TrainingConfig,
    extractor: FeatureExtractor,
    _classifier: PhantomData<C>,
}

impl<C: Classifier> RetrainingModel<C> {
    pub fn new(config: TrainingConfig) -> Self {
        Self {
            config,
            extractor: FeatureExtractor::with_defaults(),
            _classifier: PhantomData,
        }
    }

    /// Probability of `Over`; neutral below the sample bar, error on failure
    pub fn predict(&self, history: &[Session]) -> Result<Decimal> {
        if history.len() < self.config.min_history {
            return Ok(NEUTRAL_PROBABILITY);
        }

        let rows = build_training_rows(history, &self.extractor, self.config.first_label_index);
        if rows.len() < self.config.min_rows {
            return Ok(NEUTRAL_PROBABILITY);
        }

        let current = match self.extractor.extract_vector(history, None) {
            Some(v) => v,
            None => return Ok(NEUTRAL_PROBABILITY),
        };

        let mut classifier = C::from_config(&self.config);
        classifier.fit(&rows)?;
        let p = classifier.predict_proba(&current)?;

        if !p.is_finite() {
            return Err(C::training_error(format!("non-finite output {}", p)));
        }
        f64_to_decimal(p.clamp(0.0, 1.0))
            .ok_or_else(|| C::training_error(format!("unrepresentable output {}", p)))
    }
}

/// Per-column z-score scaling learned from the training rows
#[derive(Debug, Clone, Default)]
pub struct Standardizer {
    means: Vec<f64>,
    scales: Vec<f64>,
}

impl Standardizer {
    pub fn fit(rows: &[TrainingRow]) -> Self {
        let dims = rows.first().map_or(0, |r| r.features.len());
        let n = rows.len().max(1) as f64;

        let mut means = vec![0.0; dims];
        for row in rows {
            for (m, x) in means.iter_mut().zip(&row.features) {
                *m += x / n;
            }
        }

        let mut scales = vec![0.0; dims];
        for row in rows {
            for ((s, x), m) in scales.iter_mut().zip(&row.features).zip(&means) {
                *s += (x - m).powi(2) / n;
            }
        }
        // Constant columns pass through centred but unscaled
        for s in scales.iter_mut() {
            *s = if *s > 1e-12 { s.sqrt() } else { 1.0 };
        }

        Self { means, scales }
    }

    pub fn dims(&self) -> usize {
        self.means.len()
    }

    pub fn transform(&self, features: &[f64]) -> Vec<f64> {
        features
            .iter()
            .zip(self.means.iter().zip(&self.scales))
            .map(|(x, (m, s))| (x - m) / s)
            .collect()
    }
}

pub(crate) fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Common input validation for `fit`
pub(crate) fn check_rows<C: Classifier>(rows: &[TrainingRow]) -> Result<usize> {
    let dims = match rows.first() {
        Some(r) if !r.features.is_empty() => r.features.len(),
        _ => return Err(C::training_error("empty training set")),
    };
    if rows.iter().any(|r| r.features.len() != dims) {
        return Err(C::training_error("ragged feature rows"));
    }
    if rows
        .iter()
        .any(|r| !r.label.is_finite() || r.features.iter().any(|x| !x.is_finite()))
    {
        return Err(C::training_error("non-finite training data"));
    }
    Ok(dims)
}
