use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::api::{
    handlers,
    state::AppState,
    websocket::{agent_ws_handler, observer_ws_handler},
};

pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_handler))
        // Agent directory
        .route("/agents", get(handlers::list_agents))
        .route("/agents/:agent_id/assign", post(handlers::assign_run))
        .route("/agents/:agent_id/assignment", delete(handlers::clear_assignment))
        // Runs
        .route("/runs/:run_id/control", post(handlers::control_run))
        .route("/runs/:run_id/reports", get(handlers::get_run_reports))
        // WebSocket endpoints
        .route("/ws/agent/:agent_id", get(agent_ws_handler))
        .route("/ws/observe", get(observer_ws_handler))
        .with_state(state)
        .layer(cors)
}
