//! Core domain types shared across the engine

use crate::error::{ForecastError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Totals at or above this value resolve to `Outcome::Over`
pub const OUTCOME_THRESHOLD: u8 = 11;

/// Binary round outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Total >= threshold (outcome A, the positive class)
    Over,
    /// Total < threshold (outcome B)
    Under,
}

impl Outcome {
    pub fn from_total(total: u8) -> Self {
        if total >= OUTCOME_THRESHOLD {
            Outcome::Over
        } else {
            Outcome::Under
        }
    }

    /// 1.0 for Over, 0.0 for Under
    pub fn as_binary(self) -> f64 {
        match self {
            Outcome::Over => 1.0,
            Outcome::Under => 0.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Over => "over",
            Outcome::Under => "under",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse confidence attached to a forecast
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// One resolved round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Strictly increasing per table
    pub id: u64,
    pub value_a: u8,
    pub value_b: u8,
    pub value_c: u8,
    pub total: u8,
    pub outcome: Outcome,
    pub observed_at: DateTime<Utc>,
}

impl Session {
    /// Build a session from three dice, deriving total and outcome
    pub fn from_dice(id: u64, a: u8, b: u8, c: u8) -> Self {
        Self::observed(id, a, b, c, Utc::now())
    }

    pub fn observed(id: u64, a: u8, b: u8, c: u8, observed_at: DateTime<Utc>) -> Self {
        let total = a.saturating_add(b).saturating_add(c);
        Self {
            id,
            value_a: a,
            value_b: b,
            value_c: c,
            total,
            outcome: Outcome::from_total(total),
            observed_at,
        }
    }

    pub fn is_over(&self) -> bool {
        self.outcome == Outcome::Over
    }
}

/// Round as delivered by the transport (`htr` entries upstream)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundEvent {
    pub sid: u64,
    pub d1: u8,
    pub d2: u8,
    pub d3: u8,
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
}

impl RoundEvent {
    pub fn new(sid: u64, d1: u8, d2: u8, d3: u8) -> Self {
        Self { sid, d1, d2, d3, observed_at: None }
    }

    /// Validate dice and convert into a `Session`
    pub fn into_session(self) -> Result<Session> {
        for (name, die) in [("d1", self.d1), ("d2", self.d2), ("d3", self.d3)] {
            if !(1..=6).contains(&die) {
                return Err(ForecastError::InvalidRound(format!(
                    "round {}: {} = {} outside 1..=6",
                    self.sid, name, die
                )));
            }
        }
        Ok(Session::observed(
            self.sid,
            self.d1,
            self.d2,
            self.d3,
            self.observed_at.unwrap_or_else(Utc::now),
        ))
    }
}

impl TryFrom<RoundEvent> for Session {
    type Error = ForecastError;

    fn try_from(event: RoundEvent) -> Result<Self> {
        event.into_session()
    }
}
