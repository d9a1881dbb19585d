//! The fixed predictor roster
//!
//! Five tagged variants behind one capability: map a history to a
//! probability that the next round is `Over`. The roster is closed, so the
//! coordinator dispatches through a `match` rather than trait objects.

use super::logistic::LogisticRegression;
use super::models::{FrequencyModel, HeuristicPatternModel, MarkovChainModel};
use super::neural::NeuralNetwork;
use super::training::RetrainingModel;
use super::NEUTRAL_PROBABILITY;
use crate::config::TrainingConfig;
use crate::error::Result;
use crate::types::Session;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifiers for each model in the roster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Markov,
    Frequency,
    HeuristicPattern,
    Logistic,
    NeuralNet,
}

impl ModelKind {
    pub const ALL: [ModelKind; 5] = [
        ModelKind::Markov,
        ModelKind::Logistic,
        ModelKind::Frequency,
        ModelKind::NeuralNet,
        ModelKind::HeuristicPattern,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::Markov => "markov",
            ModelKind::Frequency => "frequency",
            ModelKind::HeuristicPattern => "heuristic_pattern",
            ModelKind::Logistic => "logistic",
            ModelKind::NeuralNet => "neural_net",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
pub enum Predictor {
    Markov(MarkovChainModel),
    Frequency(FrequencyModel),
    HeuristicPattern(HeuristicPatternModel),
    Logistic(RetrainingModel<LogisticRegression>),
    NeuralNet(RetrainingModel<NeuralNetwork>),
}

impl Predictor {
    pub fn new(kind: ModelKind, training: &TrainingConfig) -> Self {
        match kind {
            ModelKind::Markov => Predictor::Markov(MarkovChainModel),
            ModelKind::Frequency => Predictor::Frequency(FrequencyModel),
            ModelKind::HeuristicPattern => Predictor::HeuristicPattern(HeuristicPatternModel),
            ModelKind::Logistic => Predictor::Logistic(RetrainingModel::new(training.clone())),
            ModelKind::NeuralNet => Predictor::NeuralNet(RetrainingModel::new(training.clone())),
        }
    }

    /// Full roster in registration order
    pub fn roster(training: &TrainingConfig) -> Vec<Predictor> {
        ModelKind::ALL.iter().map(|&k| Predictor::new(k, training)).collect()
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            Predictor::Markov(_) => ModelKind::Markov,
            Predictor::Frequency(_) => ModelKind::Frequency,
            Predictor::HeuristicPattern(_) => ModelKind::HeuristicPattern,
            Predictor::Logistic(_) => ModelKind::Logistic,
            Predictor::NeuralNet(_) => ModelKind::NeuralNet,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Probability of `Over`; only the trainable variants can fail
    pub fn try_predict(&self, history: &[Session]) -> Result<Decimal> {
        match self {
            Predictor::Markov(m) => Ok(m.predict(history)),
            Predictor::Frequency(m) => Ok(m.predict(history)),
            Predictor::HeuristicPattern(m) => Ok(m.predict(history)),
            Predictor::Logistic(m) => m.predict(history),
            Predictor::NeuralNet(m) => m.predict(history),
        }
    }

    /// Probability of `Over`, degrading to neutral on failure
    pub fn predict(&self, history: &[Session]) -> Decimal {
        self.try_predict(history).unwrap_or(NEUTRAL_PROBABILITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn history(n: u64) -> Vec<Session> {
        (1..=n)
            .map(|id| match id % 3 {
                0 => Session::from_dice(id, 6, 6, 3),
                1 => Session::from_dice(id, 1, 2, 4),
                _ => Session::from_dice(id, 5, 2, 2),
            })
            .collect()
    }

    #[test]
    fn test_roster_is_complete_and_unique() {
        let roster = Predictor::roster(&TrainingConfig::default());
        assert_eq!(roster.len(), 5);
        let mut names: Vec<&str> = roster.iter().map(|p| p.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 5);
    }

    #[test]
    fn test_model_kind_names_round_trip() {
        for kind in ModelKind::ALL {
            assert_eq!(ModelKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ModelKind::from_name("naive_bayes"), None);
    }

    #[test]
    fn test_trainable_models_neutral_below_minimum() {
        let training = TrainingConfig::default();
        let short = history(19);
        for kind in [ModelKind::Logistic, ModelKind::NeuralNet] {
            let p = Predictor::new(kind, &training).try_predict(&short).unwrap();
            assert_eq!(p, dec!(0.5), "{} should be neutral", kind);
        }
    }

    #[test]
    fn test_all_models_return_probabilities() {
        let training = TrainingConfig::default();
        let long = history(40);
        for predictor in Predictor::roster(&training) {
            let p = predictor.predict(&long);
            assert!(p >= Decimal::ZERO && p <= Decimal::ONE, "{} -> {}", predictor.name(), p);
        }
    }

    #[test]
    fn test_trainable_models_deterministic() {
        let training = TrainingConfig::default();
        let long = history(30);
        for kind in [ModelKind::Logistic, ModelKind::NeuralNet] {
            let predictor = Predictor::new(kind, &training);
            assert_eq!(predictor.predict(&long), predictor.predict(&long));
        }
    }

    #[test]
    fn test_too_few_rows_is_neutral() {
        // 20 rounds but labels only from index 16 onward -> 4 rows
        let training = TrainingConfig {
            first_label_index: 16,
            ..Default::default()
        };
        let p = Predictor::new(ModelKind::Logistic, &training).try_predict(&history(20)).unwrap();
        assert_eq!(p, dec!(0.5));
    }
}
