use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::domain::{ControlAction, Run, RunStatus, StatusReport};
use crate::error::FieldError;

// ============================================================================
// System Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: i64,
    pub sessions: usize,
    pub connected: usize,
    pub active_runs: usize,
    pub pending_reports: usize,
}

// ============================================================================
// Agent Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignRequest {
    pub run: Run,
    /// Hold the agent at the start point until a `start` command arrives
    #[serde(default)]
    pub paused: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignResponse {
    pub agent_id: String,
    pub run_id: String,
    pub status: RunStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearResponse {
    pub agent_id: String,
    pub cleared_run_id: Option<String>,
}

// ============================================================================
// Run Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlBody {
    pub action: ControlAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlResponse {
    pub run_id: String,
    pub action: ControlAction,
    /// False when the owning agent is offline or the run has no owner
    pub delivered: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportsResponse {
    pub run_id: String,
    pub reports: Vec<StatusReport>,
}

// ============================================================================
// Errors
// ============================================================================

/// Map a coordinator error onto an HTTP status and message
pub fn api_error(err: FieldError) -> (StatusCode, String) {
    let status = match &err {
        FieldError::AgentBusy { .. } | FieldError::InvalidStateTransition { .. } => {
            StatusCode::CONFLICT
        }
        FieldError::AgentNotFound(_) | FieldError::RunNotFound(_) => StatusCode::NOT_FOUND,
        FieldError::Validation(_) | FieldError::Geometry(_) => StatusCode::BAD_REQUEST,
        FieldError::ChannelClosed(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let busy = FieldError::AgentBusy {
            agent_id: "a".into(),
            run_id: "r".into(),
        };
        assert_eq!(api_error(busy).0, StatusCode::CONFLICT);
        assert_eq!(
            api_error(FieldError::AgentNotFound("a".into())).0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            api_error(FieldError::ChannelClosed("x".into())).0,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            api_error(FieldError::Persistence("x".into())).0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_assign_request_paused_defaults_false() {
        let body = serde_json::json!({
            "run": {
                "id": "run-1",
                "route_id": "route-1",
                "route": [{"lat": 0.0, "lon": 0.0}, {"lat": 0.0, "lon": 0.001}],
                "target_altitude_m": 30.0,
                "target_speed_mps": 5.0
            }
        });
        let req: AssignRequest = serde_json::from_value(body).unwrap();
        assert!(!req.paused);
        assert_eq!(req.run.status, RunStatus::NotStarted);
    }
}
