//! HTTP and WebSocket surface of the coordinator
//!
//! Operators drive the directory over REST, agents hold a control channel on
//! `/ws/agent/{id}` and dashboards follow `/ws/observe`.

pub mod handlers;
pub mod routes;
pub mod state;
pub mod types;
pub mod websocket;

pub use routes::create_router;
pub use state::AppState;
