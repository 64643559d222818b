use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a run (one route execution bound to one agent)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Assigned but not started yet
    NotStarted,
    /// Agent is ascending or traversing
    Running,
    /// Progress frozen at the exact segment/step
    Paused,
    /// Route finished
    Completed,
    /// Stopped by an operator, progress discarded
    Aborted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::NotStarted => "not_started",
            RunStatus::Running => "running",
            RunStatus::Paused => "paused",
            RunStatus::Completed => "completed",
            RunStatus::Aborted => "aborted",
        }
    }

    /// Check if this status can transition to another status
    pub fn can_transition_to(&self, target: RunStatus) -> bool {
        use RunStatus::*;

        match (self, target) {
            (NotStarted, Running) => true,
            (NotStarted, Aborted) => true,

            (Running, Paused) => true,
            (Running, Completed) => true,
            (Running, Aborted) => true,

            (Paused, Running) => true,
            (Paused, Aborted) => true,

            _ => false,
        }
    }

    /// Terminal statuses release the agent
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Aborted)
    }

    /// Statuses that keep an agent bound to the run
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for RunStatus {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "not_started" => Ok(RunStatus::NotStarted),
            "running" => Ok(RunStatus::Running),
            "paused" => Ok(RunStatus::Paused),
            "completed" => Ok(RunStatus::Completed),
            "aborted" => Ok(RunStatus::Aborted),
            _ => Err(format!("Unknown run status: {}", s)),
        }
    }
}

/// Operator control actions relayed to the owning agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Start,
    Pause,
    Abort,
}

impl ControlAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlAction::Start => "start",
            ControlAction::Pause => "pause",
            ControlAction::Abort => "abort",
        }
    }

    /// Run status this action drives towards
    pub fn target_status(&self) -> RunStatus {
        match self {
            ControlAction::Start => RunStatus::Running,
            ControlAction::Pause => RunStatus::Paused,
            ControlAction::Abort => RunStatus::Aborted,
        }
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
