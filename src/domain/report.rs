use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::route::Coordinate;

/// Environmental readings carried by every report
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub temperature_c: f64,
    pub current_a: f64,
    pub voltage_v: f64,
}

/// Derived scores from the scoring service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    pub yield_score: f64,
    pub weed_score: f64,
    /// Health classification; only produced for low-altitude passes
    pub infection: Option<String>,
}

impl Default for Scores {
    fn default() -> Self {
        Self {
            yield_score: 0.0,
            weed_score: 0.0,
            infection: None,
        }
    }
}

/// One periodic telemetry snapshot. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    pub agent_id: String,
    /// Per-run tick counter, strictly increasing for one agent
    pub sequence: u64,
    pub position: Coordinate,
    pub altitude_m: f64,
    pub speed_mps: f64,
    pub battery_pct: f64,
    /// Fraction of route distance covered, in [0, 1]
    pub progress: f64,
    pub environment: Environment,
    #[serde(default)]
    pub scores: Option<Scores>,
}

impl StatusReport {
    /// Attach scores, producing the final report
    pub fn with_scores(mut self, scores: Scores) -> Self {
        self.scores = Some(scores);
        self
    }

    pub fn progress_pct(&self) -> f64 {
        self.progress * 100.0
    }
}
