use axum::{extract::State, http::StatusCode, Json};

use crate::api::{state::AppState, types::*};
use crate::coordinator::DirectoryStats;

/// GET /health -- liveness plus directory and buffer counts
pub async fn health_handler(
    State(state): State<AppState>,
) -> std::result::Result<Json<HealthResponse>, (StatusCode, Json<HealthResponse>)> {
    let pending_reports = state.coordinator.buffer().total_pending().await;

    match state.coordinator.snapshot().await {
        Ok(agents) => {
            let stats = DirectoryStats::from_snapshots(&agents);
            Ok(Json(HealthResponse {
                status: "ok".to_string(),
                uptime_secs: state.uptime_seconds(),
                sessions: stats.sessions,
                connected: stats.connected,
                active_runs: stats.active_runs,
                pending_reports,
            }))
        }
        // Coordinator loop is gone; report degraded instead of failing the probe body
        Err(_) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "degraded".to_string(),
                uptime_secs: state.uptime_seconds(),
                sessions: 0,
                connected: 0,
                active_runs: 0,
                pending_reports,
            }),
        )),
    }
}
