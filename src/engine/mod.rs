//! Forecast engine facade
//!
//! Owns the session history and the ensemble (which owns the ledger) for any
//! number of tables. Ingesting a round that is newer than anything processed
//! for its table resolves the forecast that targeted it and, once enough
//! history exists, triggers a forecast for the following round.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::history::{HistorySummary, SessionHistoryStore};
use crate::ledger::{DetailedStats, Prediction};
use crate::ml::EnsembleCoordinator;
use crate::types::{Outcome, RoundEvent, Session};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};

/// What ingesting a single round did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestOutcome {
    /// The round was new and is now in history
    pub added: bool,
    /// A pending forecast for this round was resolved
    pub resolved: bool,
    /// The table should be forecast again
    pub forecast_due: bool,
    /// Forecast issued as part of this ingest, if it was run inline
    pub forecast: Option<Prediction>,
}

/// Accuracy report for one table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableStats {
    /// Percent correct over all resolved forecasts
    pub overall_accuracy: Decimal,
    /// Percent correct over the recent window
    pub recent_accuracy: Decimal,
    pub precision: Decimal,
    pub recall: Decimal,
    pub f1: Decimal,
    pub brier: Decimal,
    pub total_predictions: usize,
}

impl TableStats {
    fn from_parts(overall_accuracy: Decimal, recent_accuracy: Decimal, detail: DetailedStats) -> Self {
        Self {
            overall_accuracy,
            recent_accuracy,
            precision: detail.precision,
            recall: detail.recall,
            f1: detail.f1,
            brier: detail.brier,
            total_predictions: detail.total_predictions,
        }
    }
}

/// Liveness snapshot for one table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableStatus {
    pub table: String,
    pub history_size: usize,
    pub last_processed_id: Option<u64>,
    pub last_updated: Option<DateTime<Utc>>,
    pub pending_predictions: usize,
}

#[derive(Debug, Clone)]
pub struct ForecastEngine {
    config: EngineConfig,
    history: SessionHistoryStore,
    ensemble: EnsembleCoordinator,
    last_processed: HashMap<String, u64>,
    last_updated: HashMap<String, DateTime<Utc>>,
    latest_forecast: HashMap<String, Prediction>,
}

impl ForecastEngine {
    pub fn new(config: EngineConfig) -> Self {
        let history = SessionHistoryStore::new(&config.history);
        let ensemble = EnsembleCoordinator::new(&config);
        Self::with_parts(config, history, ensemble)
    }

    pub fn with_defaults() -> Self {
        Self::new(EngineConfig::default())
    }

    /// Assemble from pre-built components
    pub fn with_parts(
        config: EngineConfig,
        history: SessionHistoryStore,
        ensemble: EnsembleCoordinator,
    ) -> Self {
        Self {
            config,
            history,
            ensemble,
            last_processed: HashMap::new(),
            last_updated: HashMap::new(),
            latest_forecast: HashMap::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ensemble(&self) -> &EnsembleCoordinator {
        &self.ensemble
    }

    /// Store the round and resolve its forecast, leaving the next forecast
    /// to the caller (`forecast_due` says whether one should run).
    pub fn ingest_session(&mut self, table: &str, session: Session) -> IngestOutcome {
        let id = session.id;
        let actual = session.outcome;

        if !self.history.add_session(table, session) {
            return IngestOutcome::default();
        }
        self.last_updated.insert(table.to_string(), Utc::now());

        let newer = self.last_processed.get(table).map_or(true, |&last| id > last);
        if !newer {
            debug!(table, id, "late round stored without forecasting");
            return IngestOutcome { added: true, ..Default::default() };
        }
        self.last_processed.insert(table.to_string(), id);

        let resolved = self.ensemble.resolve(table, id, actual);
        let forecast_due = self.history.len(table) >= self.config.ensemble.min_history;
        debug!(table, id, resolved, forecast_due, "round ingested");

        IngestOutcome {
            added: true,
            resolved,
            forecast_due,
            forecast: None,
        }
    }

    /// Ingest and, when due, forecast the next round inline
    pub fn ingest(&mut self, table: &str, session: Session) -> IngestOutcome {
        let mut outcome = self.ingest_session(table, session);
        if outcome.forecast_due {
            outcome.forecast = self.forecast_due(table);
        }
        outcome
    }

    /// Validate a transport event, then `ingest` it
    pub fn ingest_event(&mut self, table: &str, event: RoundEvent) -> Result<IngestOutcome> {
        let session = event.into_session().map_err(|e| {
            warn!(table, error = %e, "rejected round event");
            e
        })?;
        Ok(self.ingest(table, session))
    }

    /// Ingest a batch of events (an upstream history snapshot) in order.
    ///
    /// Invalid events are skipped; returns how many rounds were new.
    pub fn ingest_batch(&mut self, table: &str, events: impl IntoIterator<Item = RoundEvent>) -> usize {
        events
            .into_iter()
            .filter_map(|event| self.ingest_event(table, event).ok())
            .filter(|outcome| outcome.added)
            .count()
    }

    /// Run the deferred forecast for a table, caching it as the latest.
    ///
    /// Failures are logged and yield `None`.
    pub fn forecast_due(&mut self, table: &str) -> Option<Prediction> {
        match self.forecast(table) {
            Ok(prediction) => Some(prediction),
            Err(e) => {
                debug!(table, error = %e, "forecast skipped");
                None
            }
        }
    }

    /// Fresh forecast from the current history; recorded as pending
    pub fn forecast(&mut self, table: &str) -> Result<Prediction> {
        let history = self.history.get_history(table, None);
        let prediction = self.ensemble.predict(history, table)?;
        self.latest_forecast.insert(table.to_string(), prediction.clone());
        Ok(prediction)
    }

    pub fn resolve(&mut self, table: &str, id: u64, actual: Outcome) -> bool {
        self.ensemble.resolve(table, id, actual)
    }

    pub fn latest_forecast(&self, table: &str) -> Option<&Prediction> {
        self.latest_forecast.get(table)
    }

    /// Most recent `limit` sessions (all when `None`), ascending by id
    pub fn history(&self, table: &str, limit: Option<usize>) -> &[Session] {
        self.history.get_history(table, limit)
    }

    pub fn stats(&self, table: &str) -> TableStats {
        let ledger = self.ensemble.ledger();
        TableStats::from_parts(
            ledger.get_overall_accuracy(table),
            ledger.get_recent_accuracy(table, ledger.config().recent_accuracy_limit),
            ledger.get_detailed_stats(table),
        )
    }

    pub fn summary(&self, table: &str) -> HistorySummary {
        self.history.summary(table)
    }

    pub fn status(&self, table: &str) -> TableStatus {
        TableStatus {
            table: table.to_string(),
            history_size: self.history.len(table),
            last_processed_id: self.last_processed.get(table).copied(),
            last_updated: self.last_updated.get(table).copied(),
            pending_predictions: self
                .ensemble
                .ledger()
                .predictions(table)
                .filter(|p| p.is_pending())
                .count(),
        }
    }

    /// Tables with any stored history, sorted
    pub fn tables(&self) -> Vec<String> {
        self.history.tables()
    }
}

impl Default for ForecastEngine {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn round(id: u64, over: bool) -> Session {
        if over {
            Session::from_dice(id, 5, 5, 3)
        } else {
            Session::from_dice(id, 1, 3, 3)
        }
    }

    #[test]
    fn test_no_forecast_before_minimum_history() {
        let mut engine = ForecastEngine::with_defaults();
        for id in 1..=9 {
            let outcome = engine.ingest("tx", round(id, id % 2 == 0));
            assert!(outcome.added);
            assert!(!outcome.forecast_due);
            assert!(outcome.forecast.is_none());
        }
        assert!(engine.latest_forecast("tx").is_none());
        assert!(engine.forecast("tx").is_err());
    }

    #[test]
    fn test_forecast_then_resolve_on_next_round() {
        let mut engine = ForecastEngine::with_defaults();
        for id in 1..=10 {
            engine.ingest("tx", round(id, id % 3 == 0));
        }
        let forecast = engine.latest_forecast("tx").unwrap().clone();
        assert_eq!(forecast.target_id, 11);

        let outcome = engine.ingest("tx", round(11, true));
        assert!(outcome.resolved);
        assert_eq!(outcome.forecast.unwrap().target_id, 12);
        assert_eq!(engine.stats("tx").total_predictions, 1);
    }

    #[test]
    fn test_repeated_forecast_keeps_one_pending() {
        let mut engine = ForecastEngine::with_defaults();
        for id in 1..=10 {
            engine.ingest("tx", round(id, id % 3 == 0));
        }
        assert_eq!(engine.forecast("tx").unwrap().target_id, 11);
        assert_eq!(engine.forecast("tx").unwrap().target_id, 11);
        assert_eq!(engine.status("tx").pending_predictions, 1);
        assert_eq!(engine.ensemble().ledger().prediction_count("tx"), 1);

        let outcome = engine.ingest("tx", round(11, false));
        assert!(outcome.resolved);
        assert_eq!(engine.stats("tx").total_predictions, 1);
    }

    #[test]
    fn test_duplicate_round_is_noop() {
        let mut engine = ForecastEngine::with_defaults();
        for id in 1..=12 {
            engine.ingest("tx", round(id, id % 2 == 0));
        }
        let before = engine.history("tx", None).to_vec();
        let outcome = engine.ingest("tx", round(12, false));
        assert_eq!(outcome, IngestOutcome::default());
        assert_eq!(engine.history("tx", None), before.as_slice());
    }

    #[test]
    fn test_late_round_is_stored_but_not_processed() {
        let mut engine = ForecastEngine::with_defaults();
        for id in [1, 2, 3, 5, 6, 7, 8, 9, 10, 11] {
            engine.ingest("tx", round(id, id % 2 == 0));
        }
        let pending = engine.status("tx").pending_predictions;

        let outcome = engine.ingest("tx", round(4, true));
        assert!(outcome.added);
        assert!(!outcome.resolved);
        assert!(!outcome.forecast_due);
        assert_eq!(engine.status("tx").pending_predictions, pending);
        assert_eq!(engine.status("tx").last_processed_id, Some(11));
        let ids: Vec<u64> = engine.history("tx", None).iter().map(|s| s.id).collect();
        assert_eq!(ids, (1..=11).collect::<Vec<_>>());
    }

    #[test]
    fn test_ingest_event_validation() {
        let mut engine = ForecastEngine::with_defaults();
        assert!(engine.ingest_event("tx", RoundEvent::new(1, 7, 1, 1)).is_err());
        assert!(engine.ingest_event("tx", RoundEvent::new(1, 6, 1, 1)).unwrap().added);
        assert_eq!(engine.history("tx", None).len(), 1);
    }

    #[test]
    fn test_ingest_batch_counts_new_rounds() {
        let mut engine = ForecastEngine::with_defaults();
        let events = vec![
            RoundEvent::new(3, 1, 1, 1),
            RoundEvent::new(1, 6, 6, 6),
            RoundEvent::new(2, 0, 1, 1),
            RoundEvent::new(3, 1, 1, 1),
        ];
        assert_eq!(engine.ingest_batch("md5", events), 2);
        assert_eq!(engine.tables(), vec!["md5".to_string()]);
    }

    #[test]
    fn test_tables_are_independent() {
        let mut engine = ForecastEngine::with_defaults();
        for id in 1..=15 {
            engine.ingest("tx", round(id, true));
        }
        engine.ingest("md5", round(1, false));
        assert!(engine.latest_forecast("tx").is_some());
        assert!(engine.latest_forecast("md5").is_none());
        assert_eq!(engine.stats("md5").total_predictions, 0);
        assert_eq!(engine.summary("md5").total_sessions, 1);
        assert_eq!(engine.summary("tx").over_pct, 100.0);
    }

    #[test]
    fn test_stats_track_resolutions() {
        let mut engine = ForecastEngine::with_defaults();
        for id in 1..=30 {
            engine.ingest("tx", round(id, id % 2 == 0));
        }
        let stats = engine.stats("tx");
        // Forecasts for rounds 11..=30 were all resolved
        assert_eq!(stats.total_predictions, 20);
        assert!(stats.overall_accuracy >= dec!(0) && stats.overall_accuracy <= dec!(100));
        assert!(stats.brier >= dec!(0) && stats.brier <= dec!(1));
        assert_eq!(engine.status("tx").pending_predictions, 1);
    }
}
