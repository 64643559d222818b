//! Agent Directory
//!
//! Synchronous bookkeeping of every known agent session: its connection link,
//! its bound run and that run's lifecycle status. The directory never talks to
//! the network itself; it is owned by the coordinator loop, which serializes
//! every mutation and performs the resulting sends.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::command::AgentLink;
use super::state::SessionSnapshot;
use crate::domain::{ControlAction, Run, RunStatus};
use crate::error::{FieldError, Result};

#[derive(Debug)]
struct AgentSession {
    link: Option<AgentLink>,
    run: Option<Run>,
    last_seen: DateTime<Utc>,
    disconnected_at: Option<DateTime<Utc>>,
}

impl AgentSession {
    fn is_paused(&self) -> bool {
        self.run
            .as_ref()
            .map(|run| run.status != RunStatus::Running)
            .unwrap_or(false)
    }
}

/// Run binding pushed to an agent on (re)connect or assignment
#[derive(Debug, Clone)]
pub struct Binding {
    pub run: Run,
    pub paused: bool,
}

/// Result of a control command that found a connected owner
#[derive(Debug, Clone)]
pub struct ControlDispatch {
    pub agent_id: String,
    pub link: AgentLink,
    pub status: RunStatus,
    /// False when the run was already in the requested status
    pub changed: bool,
}

/// Sessions changed by a heartbeat sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepOutcome {
    pub disconnected: Vec<String>,
    pub reclaimed: Vec<String>,
}

impl SweepOutcome {
    pub fn is_empty(&self) -> bool {
        self.disconnected.is_empty() && self.reclaimed.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct AgentDirectory {
    sessions: HashMap<String, AgentSession>,
    /// run_id -> agent_id for every bound run
    run_owners: HashMap<String, String>,
}

impl AgentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or refresh a session.
    ///
    /// Returns the session's current binding so the caller can push a resync
    /// payload to the new link.
    pub fn connect(
        &mut self,
        agent_id: &str,
        link: AgentLink,
        now: DateTime<Utc>,
    ) -> Option<Binding> {
        let session = self
            .sessions
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentSession {
                link: None,
                run: None,
                last_seen: now,
                disconnected_at: None,
            });

        if let Some(old) = session.link.replace(link) {
            debug!(agent_id, old_conn = %old.conn_id, "replacing existing agent connection");
        }
        session.last_seen = now;
        session.disconnected_at = None;

        info!(agent_id, run_id = ?session.run.as_ref().map(|r| &r.id), "agent connected");

        let paused = session.is_paused();
        session.run.as_ref().map(|run| Binding {
            run: run.clone(),
            paused,
        })
    }

    /// Drop the link of `conn_id`, keeping the run binding.
    ///
    /// Ignored when the session has since been taken over by a newer connection.
    pub fn disconnect(&mut self, agent_id: &str, conn_id: Uuid, now: DateTime<Utc>) -> bool {
        let Some(session) = self.sessions.get_mut(agent_id) else {
            return false;
        };
        match &session.link {
            Some(link) if link.conn_id == conn_id => {
                session.link = None;
                session.disconnected_at = Some(now);
                info!(agent_id, "agent disconnected; run binding retained");
                true
            }
            _ => false,
        }
    }

    /// Bind a run to an agent.
    ///
    /// Fails with `AgentBusy` while the agent still owns a run; the previous
    /// assignment has to be cleared first.
    pub fn assign(&mut self, agent_id: &str, mut run: Run, paused: bool) -> Result<Binding> {
        if let Some(owner) = self.run_owners.get(&run.id) {
            if owner != agent_id {
                return Err(FieldError::Validation(format!(
                    "run {} is already assigned to agent {}",
                    run.id, owner
                )));
            }
        }

        let session = self
            .sessions
            .get_mut(agent_id)
            .ok_or_else(|| FieldError::AgentNotFound(agent_id.to_string()))?;

        if let Some(current) = &session.run {
            return Err(FieldError::AgentBusy {
                agent_id: agent_id.to_string(),
                run_id: current.id.clone(),
            });
        }

        run.status = if paused {
            RunStatus::NotStarted
        } else {
            RunStatus::Running
        };
        session.run = Some(run.clone());
        self.run_owners.insert(run.id.clone(), agent_id.to_string());

        info!(agent_id, run_id = %run.id, paused, "run assigned");
        Ok(Binding { run, paused })
    }

    /// Unbind the agent's run, returning the cleared run id
    pub fn clear(&mut self, agent_id: &str) -> Result<Option<String>> {
        let session = self
            .sessions
            .get_mut(agent_id)
            .ok_or_else(|| FieldError::AgentNotFound(agent_id.to_string()))?;

        let cleared = session.run.take().map(|run| run.id);
        if let Some(run_id) = &cleared {
            self.run_owners.remove(run_id);
            info!(agent_id, run_id = %run_id, "run assignment cleared");
        }
        Ok(cleared)
    }

    /// Apply a control action to a run and find where to forward it.
    ///
    /// Returns `Ok(None)` when no connected agent owns the run; that is a
    /// silent no-op, not an error. `abort` releases the binding.
    pub fn control(&mut self, run_id: &str, action: ControlAction) -> Result<Option<ControlDispatch>> {
        let Some(agent_id) = self.run_owners.get(run_id).cloned() else {
            debug!(run_id, %action, "control for unowned run ignored");
            return Ok(None);
        };
        let Some(session) = self.sessions.get_mut(&agent_id) else {
            self.run_owners.remove(run_id);
            return Ok(None);
        };
        let Some(link) = session.link.clone() else {
            debug!(run_id, agent_id = %agent_id, %action, "owner disconnected; control ignored");
            return Ok(None);
        };
        let Some(run) = session.run.as_mut() else {
            self.run_owners.remove(run_id);
            return Ok(None);
        };

        let target = action.target_status();
        // A run assigned paused is held until `start`, so `pause` changes nothing
        let held = run.status == RunStatus::NotStarted && target == RunStatus::Paused;
        let changed = if run.status == target || held {
            false
        } else if run.status.can_transition_to(target) {
            run.status = target;
            true
        } else {
            return Err(FieldError::InvalidStateTransition {
                from: run.status.to_string(),
                to: target.to_string(),
            });
        };

        if target.is_terminal() {
            session.run = None;
            self.run_owners.remove(run_id);
        }

        info!(run_id, agent_id = %agent_id, %action, status = %target, changed, "control relayed");
        Ok(Some(ControlDispatch {
            agent_id,
            link,
            status: target,
            changed,
        }))
    }

    /// Record activity; returns true when the agent is known
    pub fn touch(&mut self, agent_id: &str, now: DateTime<Utc>) -> bool {
        match self.sessions.get_mut(agent_id) {
            Some(session) => {
                session.last_seen = now;
                true
            }
            None => false,
        }
    }

    /// Whether a report for `run_id` from `agent_id` matches the current binding
    pub fn accepts_report(&self, agent_id: &str, run_id: &str) -> bool {
        self.run_owners.get(run_id).map(String::as_str) == Some(agent_id)
    }

    /// Mark the agent's run completed and release the binding
    pub fn complete(&mut self, agent_id: &str, run_id: &str) -> Option<Run> {
        if !self.accepts_report(agent_id, run_id) {
            return None;
        }
        let session = self.sessions.get_mut(agent_id)?;
        let mut run = session.run.take()?;
        run.status = RunStatus::Completed;
        self.run_owners.remove(run_id);
        info!(agent_id, run_id, "run completed");
        Some(run)
    }

    /// Mark silent sessions disconnected and reclaim long-idle ones.
    ///
    /// A run binding is never released here; only idle sessions are removed.
    pub fn sweep(
        &mut self,
        now: DateTime<Utc>,
        heartbeat_timeout: Duration,
        reclaim_after: Duration,
    ) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();

        for (agent_id, session) in self.sessions.iter_mut() {
            if session.link.is_some() && now - session.last_seen > heartbeat_timeout {
                warn!(
                    agent_id = %agent_id,
                    last_seen = %session.last_seen,
                    stale_ms = (now - session.last_seen).num_milliseconds(),
                    "agent heartbeat stale; marking disconnected"
                );
                session.link = None;
                session.disconnected_at = Some(now);
                outcome.disconnected.push(agent_id.clone());
            }
        }

        self.sessions.retain(|agent_id, session| {
            let reclaim = session.run.is_none()
                && session
                    .disconnected_at
                    .map(|at| now - at > reclaim_after)
                    .unwrap_or(false);
            if reclaim {
                debug!(agent_id = %agent_id, "reclaiming idle session");
                outcome.reclaimed.push(agent_id.clone());
            }
            !reclaim
        });

        outcome.disconnected.sort();
        outcome.reclaimed.sort();
        outcome
    }

    pub fn link(&self, agent_id: &str) -> Option<&AgentLink> {
        self.sessions.get(agent_id).and_then(|s| s.link.as_ref())
    }

    pub fn owner_of(&self, run_id: &str) -> Option<&str> {
        self.run_owners.get(run_id).map(String::as_str)
    }

    pub fn run_of(&self, agent_id: &str) -> Option<&Run> {
        self.sessions.get(agent_id).and_then(|s| s.run.as_ref())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Sessions sorted by agent id
    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        let mut agents: Vec<SessionSnapshot> = self
            .sessions
            .iter()
            .map(|(agent_id, session)| SessionSnapshot {
                agent_id: agent_id.clone(),
                connected: session.link.is_some(),
                run_id: session.run.as_ref().map(|r| r.id.clone()),
                run_status: session.run.as_ref().map(|r| r.status),
                paused: session.is_paused(),
                last_seen: session.last_seen,
            })
            .collect();
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        agents
    }
}
