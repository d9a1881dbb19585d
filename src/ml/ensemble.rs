//! Ensemble coordinator
//!
//! Combines the predictor roster into one forecast per round:
//! - Runs every predictor on the full table history
//! - Weights each model by its recent accuracy (floored so no model is starved)
//! - Grades confidence from sample size and cross-model agreement
//! - Records the forecast in the accuracy ledger and resolves it later

use super::predictor::Predictor;
use super::{decimal_to_f64, NEUTRAL_PROBABILITY};
use crate::config::{EngineConfig, EnsembleConfig, LedgerConfig, TrainingConfig};
use crate::error::{ForecastError, Result};
use crate::ledger::{AccuracyLedger, Prediction};
use crate::types::{Confidence, Outcome, Session};
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Accuracy-weighted ensemble over a fixed predictor roster
#[derive(Debug, Clone)]
pub struct EnsembleCoordinator {
    config: EnsembleConfig,
    predictors: Vec<Predictor>,
    ledger: AccuracyLedger,
}

impl EnsembleCoordinator {
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_predictors(
            config.ensemble.clone(),
            config.ledger.clone(),
            Predictor::roster(&config.training),
        )
    }

    pub fn with_defaults() -> Self {
        Self::with_predictors(
            EnsembleConfig::default(),
            LedgerConfig::default(),
            Predictor::roster(&TrainingConfig::default()),
        )
    }

    /// Coordinator over a custom roster; every member gets a ledger window
    pub fn with_predictors(
        config: EnsembleConfig,
        ledger_config: LedgerConfig,
        predictors: Vec<Predictor>,
    ) -> Self {
        let mut ledger = AccuracyLedger::new(ledger_config);
        for predictor in &predictors {
            ledger.register_model(predictor.name());
        }
        Self { config, predictors, ledger }
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    pub fn ledger(&self) -> &AccuracyLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut AccuracyLedger {
        &mut self.ledger
    }

    /// Forecast the round after the last one in `history` and record it.
    ///
    /// Fails with `InsufficientData`, touching nothing, below the minimum
    /// history length. A failing model contributes 0.5 instead of aborting.
    pub fn predict(&mut self, history: &[Session], table: &str) -> Result<Prediction> {
        let last = match history.last() {
            Some(last) if history.len() >= self.config.min_history => last,
            _ => {
                return Err(ForecastError::InsufficientData {
                    required: self.config.min_history,
                    available: history.len(),
                })
            }
        };

        let window = self.ledger.config().recent_model_window;
        let mut per_model_probability = BTreeMap::new();
        let mut per_model_weight = BTreeMap::new();
        let mut members = Vec::with_capacity(self.predictors.len());

        for predictor in &self.predictors {
            let name = predictor.name();
            let probability = match predictor.try_predict(history) {
                Ok(p) => p,
                Err(e) => {
                    warn!(table, model = name, error = %e, "model failed, using neutral probability");
                    NEUTRAL_PROBABILITY
                }
            };
            let weight = self
                .ledger
                .get_model_recent_accuracy(name, window)
                .max(self.config.weight_floor);
            debug!(table, model = name, %probability, %weight, "model output");

            per_model_probability.insert(name.to_string(), probability);
            per_model_weight.insert(name.to_string(), weight);
            members.push((probability, weight));
        }

        let ensemble = weighted_probability(&members);
        let predicted_outcome = model_call(ensemble);
        let probability_a = ensemble * dec!(100);
        let confidence = self.grade_confidence(history.len(), &members);

        let prediction = Prediction {
            target_id: last.id + 1,
            predicted_outcome,
            probability_a,
            probability_b: dec!(100) - probability_a,
            sample_size: history.len(),
            confidence,
            per_model_probability,
            per_model_weight,
            actual_outcome: None,
            correctness: None,
            created_at: Utc::now(),
        };

        info!(
            table,
            target_id = prediction.target_id,
            outcome = %prediction.predicted_outcome,
            probability_a = %prediction.probability_a.round_dp(2),
            confidence = ?prediction.confidence,
            "forecast issued"
        );

        Ok(self.ledger.add_prediction(table, prediction).clone())
    }

    /// Resolve the pending forecast for round `sid`.
    ///
    /// With `attribute_model_accuracy` set, each model's own call (p >= 0.5
    /// means `Over`) is also scored and fed into its accuracy window.
    pub fn resolve(&mut self, table: &str, sid: u64, actual: Outcome) -> bool {
        if !self.ledger.record_actual(table, sid, actual) {
            return false;
        }

        if let Some(resolved) = self.ledger.find_resolved(table, sid) {
            info!(
                table,
                target_id = sid,
                %actual,
                correct = resolved.is_correct().unwrap_or(false),
                "forecast checked"
            );

            if self.config.attribute_model_accuracy {
                let calls: Vec<(String, bool)> = resolved
                    .per_model_probability
                    .iter()
                    .map(|(name, p)| (name.clone(), model_call(*p) == actual))
                    .collect();
                for (name, correct) in calls {
                    self.ledger.update_model_accuracy(&name, correct);
                }
            }
        }
        true
    }

    fn grade_confidence(&self, history_len: usize, members: &[(Decimal, Decimal)]) -> Confidence {
        let mut confidence = if history_len >= self.config.high_confidence_history {
            Confidence::High
        } else if history_len >= self.config.medium_confidence_history {
            Confidence::Medium
        } else {
            Confidence::Low
        };

        if history_len >= self.config.medium_confidence_history {
            let raw: Vec<f64> = members.iter().map(|(p, _)| decimal_to_f64(*p)).collect();
            if population_std_dev(&raw) < self.config.consensus_std_dev {
                confidence = Confidence::High;
            }
        }
        confidence
    }
}

impl Default for EnsembleCoordinator {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Weighted mean of the member probabilities, clamped to [0, 1].
///
/// Accumulated as offsets from 0.5 so identical inputs come back exactly,
/// whatever the weights.
fn weighted_probability(members: &[(Decimal, Decimal)]) -> Decimal {
    let total_weight: Decimal = members.iter().map(|(_, w)| *w).sum();
    if total_weight <= Decimal::ZERO {
        return NEUTRAL_PROBABILITY;
    }
    let offset: Decimal = members
        .iter()
        .map(|(p, w)| (*p - NEUTRAL_PROBABILITY) * *w)
        .sum::<Decimal>()
        / total_weight;
    (NEUTRAL_PROBABILITY + offset).clamp(Decimal::ZERO, Decimal::ONE)
}

/// Directional call for a probability of `Over`; ties go to `Over`
fn model_call(probability: Decimal) -> Outcome {
    if probability >= NEUTRAL_PROBABILITY {
        Outcome::Over
    } else {
        Outcome::Under
    }
}

fn population_std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}
