//! Feature engineering over session history
//!
//! Turns a history prefix into a fixed ten-value vector:
//! - Over-rate at short, medium and long horizons
//! - Mean and sample standard deviation of the round total
//! - The five most recent outcomes, oldest first

use crate::types::{Outcome, Session};

/// Neutral fill for outcome slots with no history behind them
const NEUTRAL: f64 = 0.5;

/// Number of trailing outcomes encoded directly
pub const RECENT_OUTCOMES: usize = 5;

/// Length of every feature vector
pub const FEATURE_COUNT: usize = 5 + RECENT_OUTCOMES;

/// Window sizes for feature extraction
#[derive(Debug, Clone)]
pub struct FeatureConfig {
    pub short_window: usize,
    pub medium_window: usize,
    pub long_window: usize,
    /// Window for the total mean / std-dev features
    pub total_window: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            short_window: 5,
            medium_window: 10,
            long_window: 20,
            total_window: 10,
        }
    }
}

/// Extracted features for one point in the history
#[derive(Debug, Clone, PartialEq)]
pub struct RoundFeatures {
    pub over_rate_short: f64,
    pub over_rate_medium: f64,
    pub over_rate_long: f64,
    pub total_mean: f64,
    pub total_std_dev: f64,
    /// 1.0 = over, 0.0 = under, 0.5 = no data; most recent last
    pub recent_outcomes: [f64; RECENT_OUTCOMES],
}

impl RoundFeatures {
    /// Convert to feature vector for ML models
    pub fn to_vector(&self) -> Vec<f64> {
        let mut v = Vec::with_capacity(FEATURE_COUNT);
        v.push(self.over_rate_short);
        v.push(self.over_rate_medium);
        v.push(self.over_rate_long);
        v.push(self.total_mean);
        v.push(self.total_std_dev);
        v.extend_from_slice(&self.recent_outcomes);
        v
    }

    /// Feature names for interpretability
    pub fn feature_names() -> Vec<&'static str> {
        vec![
            "over_rate_short",
            "over_rate_medium",
            "over_rate_long",
            "total_mean",
            "total_std_dev",
            "outcome_t-5",
            "outcome_t-4",
            "outcome_t-3",
            "outcome_t-2",
            "outcome_t-1",
        ]
    }
}

/// Stateless feature extractor
#[derive(Debug, Clone, Default)]
pub struct FeatureExtractor {
    config: FeatureConfig,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(FeatureConfig::default())
    }

    /// Extract features from `history`.
    ///
    /// With `target_id`, only sessions with `id < target_id` are considered so
    /// replayed training rows never see the round they are labelled with.
    /// Returns `None` when nothing remains.
    pub fn extract(&self, history: &[Session], target_id: Option<u64>) -> Option<RoundFeatures> {
        let relevant: Vec<&Session> = match target_id {
            Some(target) => history.iter().filter(|s| s.id < target).collect(),
            None => history.iter().collect(),
        };
        if relevant.is_empty() {
            return None;
        }

        let totals: Vec<f64> = tail(&relevant, self.config.total_window)
            .iter()
            .map(|s| s.total as f64)
            .collect();

        let mut recent_outcomes = [NEUTRAL; RECENT_OUTCOMES];
        let last = tail(&relevant, RECENT_OUTCOMES);
        let offset = RECENT_OUTCOMES - last.len();
        for (slot, s) in recent_outcomes[offset..].iter_mut().zip(last) {
            *slot = encode(s.outcome);
        }

        Some(RoundFeatures {
            over_rate_short: over_rate(tail(&relevant, self.config.short_window)),
            over_rate_medium: over_rate(tail(&relevant, self.config.medium_window)),
            over_rate_long: over_rate(tail(&relevant, self.config.long_window)),
            total_mean: mean(&totals),
            total_std_dev: sample_std_dev(&totals),
            recent_outcomes,
        })
    }

    /// Convenience wrapper returning the raw vector
    pub fn extract_vector(&self, history: &[Session], target_id: Option<u64>) -> Option<Vec<f64>> {
        self.extract(history, target_id).map(|f| f.to_vector())
    }
}

fn tail<'a, 'b>(sessions: &'b [&'a Session], n: usize) -> &'b [&'a Session] {
    &sessions[sessions.len().saturating_sub(n)..]
}

fn encode(outcome: Outcome) -> f64 {
    outcome.as_binary()
}

fn over_rate(sessions: &[&Session]) -> f64 {
    if sessions.is_empty() {
        return NEUTRAL;
    }
    sessions.iter().filter(|s| s.is_over()).count() as f64 / sessions.len() as f64
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Standard deviation with the n-1 denominator; 0 below two samples
pub(crate) fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}
