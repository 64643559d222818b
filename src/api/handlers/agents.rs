use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::info;

use crate::api::{state::AppState, types::*};
use crate::coordinator::SessionSnapshot;
use crate::domain::RunStatus;

/// GET /agents
pub async fn list_agents(
    State(state): State<AppState>,
) -> Result<Json<Vec<SessionSnapshot>>, (StatusCode, String)> {
    let agents = state.coordinator.snapshot().await.map_err(api_error)?;
    Ok(Json(agents))
}

/// POST /agents/:agent_id/assign
pub async fn assign_run(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(req): Json<AssignRequest>,
) -> Result<(StatusCode, Json<AssignResponse>), (StatusCode, String)> {
    let run_id = req.run.id.clone();
    state
        .coordinator
        .assign(&agent_id, req.run, req.paused)
        .await
        .map_err(api_error)?;

    let status = if req.paused {
        RunStatus::NotStarted
    } else {
        RunStatus::Running
    };
    info!(agent_id = %agent_id, run_id = %run_id, %status, "run assigned via API");

    Ok((
        StatusCode::CREATED,
        Json(AssignResponse {
            agent_id,
            run_id,
            status,
        }),
    ))
}

/// DELETE /agents/:agent_id/assignment
pub async fn clear_assignment(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<ClearResponse>, (StatusCode, String)> {
    let cleared_run_id = state.coordinator.clear(&agent_id).await.map_err(api_error)?;
    Ok(Json(ClearResponse {
        agent_id,
        cleared_run_id,
    }))
}
