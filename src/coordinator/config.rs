//! Coordinator Configuration

use serde::{Deserialize, Serialize};

/// Configuration for the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Maximum time without a report or heartbeat before a session is marked disconnected (ms)
    pub heartbeat_timeout_ms: u64,
    /// How often to sweep sessions for stale heartbeats (ms)
    pub sweep_interval_ms: u64,
    /// Idle sessions with no run are removed after being disconnected this long (ms)
    pub session_reclaim_ms: u64,
    /// Capacity of the control and agent event queues
    pub command_capacity: usize,
    /// Outbound queue capacity per connected agent
    pub agent_channel_capacity: usize,
    /// Observer broadcast capacity; slow observers skip events beyond this
    pub observer_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: 15_000,
            sweep_interval_ms: 5_000,
            session_reclaim_ms: 300_000,
            command_capacity: 256,
            agent_channel_capacity: 64,
            observer_capacity: 1024,
        }
    }
}
