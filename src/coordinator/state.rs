//! Coordinator State: per-session snapshots for observers and the API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::RunStatus;

/// Per-agent snapshot visible to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub agent_id: String,
    pub connected: bool,
    pub run_id: Option<String>,
    pub run_status: Option<RunStatus>,
    pub paused: bool,
    pub last_seen: DateTime<Utc>,
}

impl SessionSnapshot {
    /// Connected and not bound to a run
    pub fn is_available(&self) -> bool {
        self.connected && self.run_id.is_none()
    }
}

/// Counts reported by the health endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryStats {
    pub sessions: usize,
    pub connected: usize,
    pub active_runs: usize,
}

impl DirectoryStats {
    pub fn from_snapshots(agents: &[SessionSnapshot]) -> Self {
        Self {
            sessions: agents.len(),
            connected: agents.iter().filter(|a| a.connected).count(),
            active_runs: agents.iter().filter(|a| a.run_id.is_some()).count(),
        }
    }
}
