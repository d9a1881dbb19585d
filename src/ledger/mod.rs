//! Forecast accuracy ledger
//!
//! Tracks, per table:
//! - Every issued forecast until its target round resolves (bounded window)
//! - Overall and recent hit rates
//! - Precision / recall / F1 with `Over` as the positive class, and Brier score
//!
//! Also keeps a short correctness window per model, which is what the
//! ensemble reads when weighting its members.

use crate::config::LedgerConfig;
use crate::types::{Confidence, Outcome};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::debug;

/// One ensemble forecast for the round `target_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Id of the round being forecast (last seen id + 1)
    pub target_id: u64,
    pub predicted_outcome: Outcome,
    /// Probability of `Over`, as a percentage
    pub probability_a: Decimal,
    /// `100 - probability_a`
    pub probability_b: Decimal,
    /// History length the forecast was built from
    pub sample_size: usize,
    pub confidence: Confidence,
    /// Raw probability of `Over` per model
    pub per_model_probability: BTreeMap<String, Decimal>,
    /// Weight each model received
    pub per_model_weight: BTreeMap<String, Decimal>,
    pub actual_outcome: Option<Outcome>,
    /// 1 when the call was right, 0 when wrong; unset while pending
    pub correctness: Option<u8>,
    pub created_at: DateTime<Utc>,
}

impl Prediction {
    pub fn is_pending(&self) -> bool {
        self.actual_outcome.is_none()
    }

    pub fn is_correct(&self) -> Option<bool> {
        self.correctness.map(|c| c == 1)
    }

    /// Probability of `Over` as a fraction
    pub fn probability_over(&self) -> Decimal {
        self.probability_a / dec!(100)
    }
}

/// Classification quality over resolved forecasts
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DetailedStats {
    /// Percentages
    pub precision: Decimal,
    pub recall: Decimal,
    pub f1: Decimal,
    /// Mean squared error of the probability of `Over`, as a fraction
    pub brier: Decimal,
    pub total_predictions: usize,
}

#[derive(Debug, Clone)]
pub struct AccuracyLedger {
    config: LedgerConfig,
    predictions: HashMap<String, VecDeque<Prediction>>,
    model_windows: HashMap<String, VecDeque<u8>>,
}

impl AccuracyLedger {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            config,
            predictions: HashMap::new(),
            model_windows: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(LedgerConfig::default())
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Create an empty window for `name` if it has none
    pub fn register_model(&mut self, name: &str) {
        self.model_windows.entry(name.to_string()).or_default();
    }

    /// Registered model names, sorted
    pub fn model_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.model_windows.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Store a forecast as pending, evicting the oldest beyond the cap.
    ///
    /// A pending forecast for the same target is replaced, so each round has
    /// at most one pending forecast per table.
    pub fn add_prediction(&mut self, table: &str, mut prediction: Prediction) -> &Prediction {
        prediction.created_at = Utc::now();
        prediction.actual_outcome = None;
        prediction.correctness = None;

        let cap = self.config.max_predictions.max(1);
        let queue = self.predictions.entry(table.to_string()).or_default();
        if let Some(pos) = queue
            .iter()
            .position(|p| p.target_id == prediction.target_id && p.is_pending())
        {
            debug!(table, target_id = prediction.target_id, "replacing pending forecast");
            queue.remove(pos);
        }
        queue.push_back(prediction);
        while queue.len() > cap {
            queue.pop_front();
        }
        &queue[queue.len() - 1]
    }

    /// Resolve the pending forecast for `target_id`.
    ///
    /// Returns false, with nothing changed, when no pending forecast targets
    /// that round. Already resolved forecasts are never touched again.
    pub fn record_actual(&mut self, table: &str, target_id: u64, actual: Outcome) -> bool {
        let Some(queue) = self.predictions.get_mut(table) else {
            return false;
        };

        let mut resolved = false;
        for prediction in queue
            .iter_mut()
            .filter(|p| p.target_id == target_id && p.is_pending())
        {
            prediction.actual_outcome = Some(actual);
            prediction.correctness = Some(u8::from(prediction.predicted_outcome == actual));
            resolved = true;
        }

        if resolved {
            debug!(table, target_id, %actual, "forecast resolved");
        }
        resolved
    }

    /// Append a correctness value to a model's window
    pub fn update_model_accuracy(&mut self, name: &str, correct: bool) {
        let cap = self.config.model_window.max(1);
        let window = self.model_windows.entry(name.to_string()).or_default();
        window.push_back(u8::from(correct));
        while window.len() > cap {
            window.pop_front();
        }
    }

    /// Mean of the last `window` values for `name`; 0.5 when empty
    pub fn get_model_recent_accuracy(&self, name: &str, window: usize) -> Decimal {
        let values = match self.model_windows.get(name) {
            Some(v) if !v.is_empty() && window > 0 => v,
            _ => return dec!(0.5),
        };
        let take = window.min(values.len());
        let hits: u64 = values.iter().rev().take(take).map(|&c| u64::from(c)).sum();
        Decimal::from(hits) / Decimal::from(take as u64)
    }

    pub fn model_window_len(&self, name: &str) -> usize {
        self.model_windows.get(name).map_or(0, VecDeque::len)
    }

    /// Percent correct over every resolved forecast (0 when none)
    pub fn get_overall_accuracy(&self, table: &str) -> Decimal {
        hit_rate(self.resolved(table))
    }

    /// Percent correct over the most recent `limit` resolved forecasts
    pub fn get_recent_accuracy(&self, table: &str, limit: usize) -> Decimal {
        let resolved: Vec<&Prediction> = self.resolved(table).collect();
        let start = resolved.len().saturating_sub(limit);
        hit_rate(resolved[start..].iter().copied())
    }

    pub fn get_detailed_stats(&self, table: &str) -> DetailedStats {
        let (mut tp, mut fp, mut fn_) = (0u64, 0u64, 0u64);
        let mut brier_sum = Decimal::ZERO;
        let mut total = 0usize;

        for p in self.resolved(table) {
            let Some(actual) = p.actual_outcome else { continue };
            total += 1;

            let target = if actual == Outcome::Over { Decimal::ONE } else { Decimal::ZERO };
            let diff = p.probability_over() - target;
            brier_sum += diff * diff;

            match (p.predicted_outcome, actual) {
                (Outcome::Over, Outcome::Over) => tp += 1,
                (Outcome::Over, Outcome::Under) => fp += 1,
                (Outcome::Under, Outcome::Over) => fn_ += 1,
                (Outcome::Under, Outcome::Under) => {}
            }
        }

        if total == 0 {
            return DetailedStats::default();
        }

        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1 = if precision + recall > Decimal::ZERO {
            dec!(2) * precision * recall / (precision + recall)
        } else {
            Decimal::ZERO
        };

        DetailedStats {
            precision: precision * dec!(100),
            recall: recall * dec!(100),
            f1: f1 * dec!(100),
            brier: brier_sum / Decimal::from(total as u64),
            total_predictions: total,
        }
    }

    /// Stored forecasts for a table, oldest first
    pub fn predictions(&self, table: &str) -> impl Iterator<Item = &Prediction> {
        self.predictions.get(table).into_iter().flatten()
    }

    pub fn prediction_count(&self, table: &str) -> usize {
        self.predictions.get(table).map_or(0, VecDeque::len)
    }

    pub fn pending_for(&self, table: &str, target_id: u64) -> Option<&Prediction> {
        self.predictions(table)
            .filter(|p| p.target_id == target_id && p.is_pending())
            .last()
    }

    /// Most recent resolved forecast for `target_id`
    pub fn find_resolved(&self, table: &str, target_id: u64) -> Option<&Prediction> {
        self.predictions(table)
            .filter(|p| p.target_id == target_id && !p.is_pending())
            .last()
    }

    fn resolved<'a>(&'a self, table: &str) -> impl Iterator<Item = &'a Prediction> + 'a {
        self.predictions
            .get(table)
            .into_iter()
            .flatten()
            .filter(|p| p.correctness.is_some())
    }
}

impl Default for AccuracyLedger {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn ratio(num: u64, den: u64) -> Decimal {
    if den == 0 {
        Decimal::ZERO
    } else {
        Decimal::from(num) / Decimal::from(den)
    }
}

fn hit_rate<'a>(predictions: impl Iterator<Item = &'a Prediction>) -> Decimal {
    let (mut hits, mut total) = (0u64, 0u64);
    for p in predictions {
        total += 1;
        hits += u64::from(p.correctness.unwrap_or(0));
    }
    ratio(hits, total) * dec!(100)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction(target_id: u64, outcome: Outcome, probability_a: Decimal) -> Prediction {
        Prediction {
            target_id,
            predicted_outcome: outcome,
            probability_a,
            probability_b: dec!(100) - probability_a,
            sample_size: 10,
            confidence: Confidence::Low,
            per_model_probability: BTreeMap::new(),
            per_model_weight: BTreeMap::new(),
            actual_outcome: Some(Outcome::Under),
            correctness: Some(1),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_add_prediction_resets_resolution() {
        let mut ledger = AccuracyLedger::with_defaults();
        let stored = ledger.add_prediction("tx", prediction(11, Outcome::Over, dec!(60)));
        assert!(stored.is_pending());
        assert_eq!(stored.correctness, None);
    }

    #[test]
    fn test_pending_forecast_replaced_per_target() {
        let mut ledger = AccuracyLedger::with_defaults();
        ledger.add_prediction("tx", prediction(11, Outcome::Over, dec!(60)));
        ledger.add_prediction("tx", prediction(11, Outcome::Under, dec!(45)));
        ledger.add_prediction("md5", prediction(11, Outcome::Over, dec!(70)));

        assert_eq!(ledger.prediction_count("tx"), 1);
        assert_eq!(ledger.pending_for("tx", 11).unwrap().probability_a, dec!(45));
        assert_eq!(ledger.prediction_count("md5"), 1);

        // A resolved forecast stays; the next one for that round is new
        assert!(ledger.record_actual("tx", 11, Outcome::Under));
        ledger.add_prediction("tx", prediction(11, Outcome::Over, dec!(60)));
        assert_eq!(ledger.prediction_count("tx"), 2);
        assert_eq!(ledger.get_detailed_stats("tx").total_predictions, 1);
    }

    #[test]
    fn test_record_actual_one_way() {
        let mut ledger = AccuracyLedger::with_defaults();
        ledger.add_prediction("tx", prediction(11, Outcome::Over, dec!(60)));

        assert!(ledger.record_actual("tx", 11, Outcome::Over));
        assert_eq!(ledger.find_resolved("tx", 11).unwrap().correctness, Some(1));

        // Already resolved; a second report cannot flip it
        assert!(!ledger.record_actual("tx", 11, Outcome::Under));
        assert_eq!(ledger.find_resolved("tx", 11).unwrap().actual_outcome, Some(Outcome::Over));
    }

    #[test]
    fn test_unmatched_resolve_changes_nothing() {
        let mut ledger = AccuracyLedger::with_defaults();
        ledger.add_prediction("tx", prediction(11, Outcome::Over, dec!(60)));
        ledger.record_actual("tx", 11, Outcome::Under);
        let before = ledger.get_detailed_stats("tx");
        let overall = ledger.get_overall_accuracy("tx");

        assert!(!ledger.record_actual("tx", 99, Outcome::Over));
        assert!(!ledger.record_actual("md5", 11, Outcome::Over));
        assert_eq!(ledger.get_detailed_stats("tx"), before);
        assert_eq!(ledger.get_overall_accuracy("tx"), overall);
    }

    #[test]
    fn test_confusion_matrix_stats() {
        let mut ledger = AccuracyLedger::with_defaults();
        // TP, TP, FP, FN
        let cases = [
            (1, Outcome::Over, Outcome::Over),
            (2, Outcome::Over, Outcome::Over),
            (3, Outcome::Over, Outcome::Under),
            (4, Outcome::Under, Outcome::Over),
        ];
        for (id, predicted, actual) in cases {
            let p = if predicted == Outcome::Over { dec!(60) } else { dec!(40) };
            ledger.add_prediction("tx", prediction(id, predicted, p));
            assert!(ledger.record_actual("tx", id, actual));
        }

        let stats = ledger.get_detailed_stats("tx");
        assert_eq!(stats.total_predictions, 4);
        assert_eq!(stats.precision.round_dp(1), dec!(66.7));
        assert_eq!(stats.recall.round_dp(1), dec!(66.7));
        assert_eq!(stats.f1.round_dp(1), dec!(66.7));
        assert_eq!(ledger.get_overall_accuracy("tx"), dec!(50));
    }

    #[test]
    fn test_brier_single_prediction() {
        let mut ledger = AccuracyLedger::with_defaults();
        ledger.add_prediction("tx", prediction(5, Outcome::Over, dec!(80)));
        ledger.record_actual("tx", 5, Outcome::Over);
        assert_eq!(ledger.get_detailed_stats("tx").brier, dec!(0.04));
    }

    #[test]
    fn test_empty_stats_are_zero() {
        let mut ledger = AccuracyLedger::with_defaults();
        assert_eq!(ledger.get_detailed_stats("tx"), DetailedStats::default());
        ledger.add_prediction("tx", prediction(5, Outcome::Over, dec!(80)));
        assert_eq!(ledger.get_detailed_stats("tx").total_predictions, 0);
        assert_eq!(ledger.get_overall_accuracy("tx"), Decimal::ZERO);
        assert_eq!(ledger.get_recent_accuracy("tx", 50), Decimal::ZERO);
    }

    #[test]
    fn test_recent_accuracy_window() {
        let mut ledger = AccuracyLedger::with_defaults();
        for id in 1..=10 {
            ledger.add_prediction("tx", prediction(id, Outcome::Over, dec!(60)));
            let actual = if id <= 6 { Outcome::Under } else { Outcome::Over };
            ledger.record_actual("tx", id, actual);
        }
        assert_eq!(ledger.get_overall_accuracy("tx"), dec!(40));
        assert_eq!(ledger.get_recent_accuracy("tx", 4), dec!(100));
    }

    #[test]
    fn test_prediction_eviction() {
        let mut ledger = AccuracyLedger::with_defaults();
        for id in 0..510 {
            ledger.add_prediction("tx", prediction(id, Outcome::Over, dec!(55)));
        }
        assert_eq!(ledger.prediction_count("tx"), 500);
        assert_eq!(ledger.predictions("tx").next().unwrap().target_id, 10);
    }

    #[test]
    fn test_model_window() {
        let mut ledger = AccuracyLedger::with_defaults();
        ledger.register_model("markov");
        ledger.register_model("markov");
        assert_eq!(ledger.model_names(), vec!["markov"]);
        assert_eq!(ledger.get_model_recent_accuracy("markov", 20), dec!(0.5));
        assert_eq!(ledger.get_model_recent_accuracy("unknown", 20), dec!(0.5));

        for i in 0..120 {
            ledger.update_model_accuracy("markov", i % 4 == 0);
        }
        assert_eq!(ledger.model_window_len("markov"), 100);
        // Last 20 of the pattern: 5 hits
        assert_eq!(ledger.get_model_recent_accuracy("markov", 20), dec!(0.25));
    }
}
