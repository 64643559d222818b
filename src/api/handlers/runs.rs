use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::api::{state::AppState, types::*};

/// POST /runs/:run_id/control
///
/// Always 202 once accepted; `delivered` tells whether an online agent got it.
pub async fn control_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(body): Json<ControlBody>,
) -> Result<(StatusCode, Json<ControlResponse>), (StatusCode, String)> {
    let delivered = state
        .coordinator
        .control(&run_id, body.action)
        .await
        .map_err(api_error)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ControlResponse {
            run_id,
            action: body.action,
            delivered,
        }),
    ))
}

/// GET /runs/:run_id/reports -- recent reports, cache first
pub async fn get_run_reports(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<ReportsResponse>, (StatusCode, String)> {
    let reports = state
        .coordinator
        .recent_reports(&run_id)
        .await
        .map_err(api_error)?;
    Ok(Json(ReportsResponse { run_id, reports }))
}
