//! Closed-form predictors: Markov chain, frequency, streak heuristic

use super::{f64_to_decimal, NEUTRAL_PROBABILITY};
use crate::types::Session;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Recent window used by the frequency-style models
const FREQUENCY_WINDOW: usize = 10;

/// Transitions at position `i` of an `n`-long sequence weigh `exp((i - n) / DECAY)`
const RECENCY_DECAY: f64 = 10.0;

/// Time-weighted order-1 / order-2 Markov chain over outcomes
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkovChainModel;

/// Conditional probabilities of `Over` from each chain order
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkovEstimate {
    pub order1: f64,
    pub order2: f64,
}

impl MarkovEstimate {
    /// Order 2 counts double
    pub fn combined(&self) -> f64 {
        (self.order1 + 2.0 * self.order2) / 3.0
    }
}

impl MarkovChainModel {
    pub const MIN_HISTORY: usize = 3;

    pub fn predict(&self, history: &[Session]) -> Decimal {
        match self.estimate(history) {
            Some(est) => f64_to_decimal(est.combined()).unwrap_or(NEUTRAL_PROBABILITY),
            None => NEUTRAL_PROBABILITY,
        }
    }

    /// Per-order estimates, `None` below the minimum history
    pub fn estimate(&self, history: &[Session]) -> Option<MarkovEstimate> {
        if history.len() < Self::MIN_HISTORY {
            return None;
        }
        let seq: Vec<usize> = history.iter().map(|s| usize::from(s.is_over())).collect();
        Some(transition_estimate(&seq))
    }
}

/// Build both transition tables and read off P(next = 1) for the current state
fn transition_estimate(seq: &[usize]) -> MarkovEstimate {
    let n = seq.len();
    let weight = |i: usize| ((i as f64 - n as f64) / RECENCY_DECAY).exp();

    // [from][to] and [from_prev][from][to]
    let mut order1 = [[0.0f64; 2]; 2];
    let mut order2 = [[[0.0f64; 2]; 2]; 2];

    for (i, w) in seq.windows(2).enumerate() {
        order1[w[0]][w[1]] += weight(i);
    }
    for (i, w) in seq.windows(3).enumerate() {
        order2[w[0]][w[1]][w[2]] += weight(i);
    }

    let last = seq[n - 1];
    let prev = seq[n - 2];

    MarkovEstimate {
        order1: conditional(order1[last]),
        order2: conditional(order2[prev][last]),
    }
}

fn conditional(row: [f64; 2]) -> f64 {
    let total = row[0] + row[1];
    if total == 0.0 {
        0.5
    } else {
        row[1] / total
    }
}

/// Over-rate of the last ten rounds
#[derive(Debug, Clone, Copy, Default)]
pub struct FrequencyModel;

impl FrequencyModel {
    pub const MIN_HISTORY: usize = FREQUENCY_WINDOW;

    pub fn predict(&self, history: &[Session]) -> Decimal {
        if history.len() < Self::MIN_HISTORY {
            return NEUTRAL_PROBABILITY;
        }
        recent_over_rate(history)
    }
}

/// Bets against three-round streaks, otherwise follows recent frequency
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicPatternModel;

impl HeuristicPatternModel {
    pub const MIN_HISTORY: usize = 5;
    const STREAK: usize = 3;

    pub fn predict(&self, history: &[Session]) -> Decimal {
        if history.len() < Self::MIN_HISTORY {
            return NEUTRAL_PROBABILITY;
        }
        let streak = &history[history.len() - Self::STREAK..];
        if streak.iter().all(Session::is_over) {
            return dec!(0.3);
        }
        if streak.iter().all(|s| !s.is_over()) {
            return dec!(0.7);
        }
        recent_over_rate(history)
    }
}

/// Over count in the trailing window divided by the window size
fn recent_over_rate(history: &[Session]) -> Decimal {
    let window = &history[history.len().saturating_sub(FREQUENCY_WINDOW)..];
    let over = window.iter().filter(|s| s.is_over()).count();
    Decimal::from(over as u64) / Decimal::from(FREQUENCY_WINDOW as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn over(id: u64) -> Session {
        Session::from_dice(id, 6, 5, 4)
    }

    fn under(id: u64) -> Session {
        Session::from_dice(id, 1, 2, 3)
    }

    fn from_pattern(pattern: &str) -> Vec<Session> {
        pattern
            .chars()
            .enumerate()
            .map(|(i, c)| if c == 'O' { over(i as u64 + 1) } else { under(i as u64 + 1) })
            .collect()
    }

    #[test]
    fn test_markov_short_history_neutral() {
        assert_eq!(MarkovChainModel.predict(&from_pattern("OO")), dec!(0.5));
        assert!(MarkovChainModel.estimate(&from_pattern("OU")).is_none());
    }

    #[test]
    fn test_markov_all_over() {
        let history = from_pattern("OOOOO");
        let est = MarkovChainModel.estimate(&history).unwrap();
        assert_eq!(est.order1, 1.0);
        assert_eq!(est.order2, 1.0);
        assert!(MarkovChainModel.predict(&history) > dec!(0.5));
    }

    #[test]
    fn test_markov_minimum_all_over() {
        let est = MarkovChainModel.estimate(&from_pattern("OOO")).unwrap();
        assert_eq!(est.order1, 1.0);
        assert!(est.combined() > 0.5);
    }

    #[test]
    fn test_markov_unseen_state_falls_back() {
        // State "UO" never precedes anything
        let est = MarkovChainModel.estimate(&from_pattern("UUUO")).unwrap();
        assert_eq!(est.order2, 0.5);
        // "O" never precedes anything either
        assert_eq!(est.order1, 0.5);
        assert_eq!(est.combined(), 0.5);
    }

    #[test]
    fn test_markov_alternating_predicts_switch() {
        // Last is O, and O has always been followed by U
        let est = MarkovChainModel.estimate(&from_pattern("OUOUOUO")).unwrap();
        assert_eq!(est.order1, 0.0);
        assert_eq!(est.order2, 0.0);
    }

    #[test]
    fn test_markov_recency_weighting() {
        // O->O happened early, O->U happened late; late transitions dominate
        let est = MarkovChainModel.estimate(&from_pattern("OOUUUUUUUUUUUUOUO")).unwrap();
        assert!(est.order1 < 0.5, "order1 = {}", est.order1);
    }

    #[test]
    fn test_frequency_model() {
        assert_eq!(FrequencyModel.predict(&from_pattern("OOOOOOOOO")), dec!(0.5));
        assert_eq!(FrequencyModel.predict(&from_pattern("UUUUUOOOUUUUOOO")), dec!(0.6));
    }

    #[test]
    fn test_heuristic_streak_reversal() {
        assert_eq!(HeuristicPatternModel.predict(&from_pattern("OOOO")), dec!(0.5));
        assert_eq!(HeuristicPatternModel.predict(&from_pattern("UUOOO")), dec!(0.3));
        assert_eq!(HeuristicPatternModel.predict(&from_pattern("OOUUU")), dec!(0.7));
    }

    #[test]
    fn test_heuristic_falls_back_to_frequency_over_ten() {
        // Short history without a streak divides by the full window
        assert_eq!(HeuristicPatternModel.predict(&from_pattern("OOUOU")), dec!(0.3));
        assert_eq!(
            HeuristicPatternModel.predict(&from_pattern("OOOOOOOOUOU")),
            dec!(0.8)
        );
    }
}
