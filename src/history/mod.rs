//! Per-table session history
//!
//! Append-only, deduplicated by round id, kept sorted ascending by id and
//! bounded to the newest `max_history` rounds. Retransmitted rounds are
//! ignored, so the store can be rebuilt by replaying upstream events.

use crate::config::HistoryConfig;
use crate::types::{Outcome, Session};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Aggregate statistics over one table's retained history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistorySummary {
    pub total_sessions: usize,
    /// Percentage of rounds that resolved Over
    pub over_pct: f64,
    pub under_pct: f64,
    pub mean_total: f64,
    /// Population standard deviation of totals
    pub std_dev_total: f64,
    /// Count of rounds per total, every total 3..=18 present
    pub total_distribution: BTreeMap<u8, usize>,
}

/// Bounded, sorted session store keyed by table
#[derive(Debug, Clone)]
pub struct SessionHistoryStore {
    max_history: usize,
    tables: HashMap<String, Vec<Session>>,
}

impl SessionHistoryStore {
    pub fn new(config: &HistoryConfig) -> Self {
        Self::with_capacity(config.max_history)
    }

    pub fn with_capacity(max_history: usize) -> Self {
        Self {
            max_history,
            tables: HashMap::new(),
        }
    }

    /// Insert a session; returns false (and changes nothing) if its id is known
    pub fn add_session(&mut self, table: &str, session: Session) -> bool {
        let sessions = self.tables.entry(table.to_string()).or_default();

        let pos = match sessions.binary_search_by_key(&session.id, |s| s.id) {
            Ok(_) => {
                debug!(table, id = session.id, "duplicate session ignored");
                return false;
            }
            Err(pos) => pos,
        };
        sessions.insert(pos, session);

        if sessions.len() > self.max_history {
            let excess = sessions.len() - self.max_history;
            sessions.drain(..excess);
        }
        true
    }

    /// Oldest-first history; `limit` keeps only the newest `limit` entries
    pub fn get_history(&self, table: &str, limit: Option<usize>) -> &[Session] {
        let sessions = match self.tables.get(table) {
            Some(s) => s.as_slice(),
            None => return &[],
        };
        match limit {
            Some(n) if n > 0 && n < sessions.len() => &sessions[sessions.len() - n..],
            _ => sessions,
        }
    }

    pub fn len(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, Vec::len)
    }

    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }

    pub fn get_latest_session(&self, table: &str) -> Option<&Session> {
        self.tables.get(table).and_then(|s| s.last())
    }

    pub fn get_latest_id(&self, table: &str) -> Option<u64> {
        self.get_latest_session(table).map(|s| s.id)
    }

    /// Reset one table, or every table when `table` is `None`
    pub fn clear(&mut self, table: Option<&str>) {
        match table {
            Some(t) => {
                if let Some(sessions) = self.tables.get_mut(t) {
                    sessions.clear();
                }
            }
            None => self.tables.clear(),
        }
    }

    /// Known table names, sorted
    pub fn tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Outcome split, total mean/std-dev and total distribution for a table
    pub fn summary(&self, table: &str) -> HistorySummary {
        let sessions = self.get_history(table, None);
        let mut distribution: BTreeMap<u8, usize> = (3..=18).map(|t| (t, 0)).collect();

        if sessions.is_empty() {
            return HistorySummary {
                total_sessions: 0,
                over_pct: 0.0,
                under_pct: 0.0,
                mean_total: 0.0,
                std_dev_total: 0.0,
                total_distribution: distribution,
            };
        }

        let n = sessions.len() as f64;
        let over = sessions.iter().filter(|s| s.outcome == Outcome::Over).count() as f64;
        let mean = sessions.iter().map(|s| s.total as f64).sum::<f64>() / n;
        let variance = sessions
            .iter()
            .map(|s| (s.total as f64 - mean).powi(2))
            .sum::<f64>()
            / n;

        for s in sessions {
            *distribution.entry(s.total).or_insert(0) += 1;
        }

        let over_pct = over / n * 100.0;
        HistorySummary {
            total_sessions: sessions.len(),
            over_pct,
            under_pct: 100.0 - over_pct,
            mean_total: mean,
            std_dev_total: variance.sqrt(),
            total_distribution: distribution,
        }
    }
}

impl Default for SessionHistoryStore {
    fn default() -> Self {
        Self::new(&HistoryConfig::default())
    }
}
