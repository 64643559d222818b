//! Coordinator Commands: wire protocol and internal directory requests
//!
//! Messages exchanged with agents and observers are JSON objects tagged by a
//! `type` field. Requests into the coordinator loop carry a `oneshot` sender
//! when the caller needs an answer.

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::state::SessionSnapshot;
use crate::domain::{ControlAction, Run, RunStatus, StatusReport};
use crate::error::Result;

/// Messages sent from the coordinator to an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorMessage {
    /// New run binding; `recent_reports` is non-empty when the run was started before
    Assign {
        run: Run,
        #[serde(default)]
        paused: bool,
        #[serde(default)]
        recent_reports: Vec<StatusReport>,
    },
    /// Existing binding pushed to a reconnecting agent
    Resync {
        run: Run,
        #[serde(default)]
        paused: bool,
        #[serde(default)]
        recent_reports: Vec<StatusReport>,
    },
    /// Binding removed; the agent returns to idle
    Clear,
    Control { run_id: String, action: ControlAction },
}

/// Messages sent from an agent to the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    StatusReport { report: StatusReport },
    Completion { run_id: String },
    Heartbeat,
}

/// Events fanned out to observers (fire-and-forget)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObserverEvent {
    Report {
        report: StatusReport,
    },
    DirectoryChanged {
        agents: Vec<SessionSnapshot>,
    },
    RunStatus {
        run_id: String,
        status: RunStatus,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    },
}

/// Outbound half of one agent connection
#[derive(Debug, Clone)]
pub struct AgentLink {
    /// Distinguishes a stale connection from its replacement
    pub conn_id: Uuid,
    pub tx: mpsc::Sender<CoordinatorMessage>,
}

impl AgentLink {
    pub fn new(tx: mpsc::Sender<CoordinatorMessage>) -> Self {
        Self {
            conn_id: Uuid::new_v4(),
            tx,
        }
    }
}

/// Connection lifecycle and agent traffic, processed in arrival order
#[derive(Debug)]
pub enum AgentEvent {
    Connected { agent_id: String, link: AgentLink },
    Disconnected { agent_id: String, conn_id: Uuid },
    Message { agent_id: String, message: AgentMessage },
}

/// Operator requests into the coordinator loop
#[derive(Debug)]
pub enum ControlRequest {
    Assign {
        agent_id: String,
        run: Run,
        paused: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    Clear {
        agent_id: String,
        reply: oneshot::Sender<Result<Option<String>>>,
    },
    /// Reply is `true` when the command reached a connected agent
    Control {
        run_id: String,
        action: ControlAction,
        reply: oneshot::Sender<Result<bool>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<SessionSnapshot>>,
    },
}
