use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::coordinator::CoordinatorHandle;

/// Shared application state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub coordinator: CoordinatorHandle,
    pub start_time: DateTime<Utc>,
    /// Fired on process shutdown so open sockets close
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    pub fn new(coordinator: CoordinatorHandle) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self::with_shutdown(coordinator, shutdown_tx)
    }

    pub fn with_shutdown(coordinator: CoordinatorHandle, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self {
            coordinator,
            start_time: Utc::now(),
            shutdown_tx,
        }
    }

    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.start_time).num_seconds()
    }
}
