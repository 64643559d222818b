//! Field agent runtime
//!
//! - `worker`: the per-agent tick loop (motion, reports, scoring)
//! - `client`: WebSocket connection to the coordinator with reconnect

pub mod client;
pub mod worker;

pub use client::{backoff_delay, AgentClient};
pub use worker::{AgentWorker, WorkerConfig};
