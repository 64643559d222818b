use thiserror::Error;

/// Main error type for the coordinator and agents
#[derive(Error, Debug)]
pub enum FieldError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Geometry / route errors
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    // Directory errors
    #[error("Agent {agent_id} is busy with run {run_id}")]
    AgentBusy { agent_id: String, run_id: String },

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    // State machine errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // Persistence errors
    #[error("Persistence error: {0}")]
    Persistence(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for FieldError
pub type Result<T> = std::result::Result<T, FieldError>;

/// Malformed geometric input.
///
/// Kept separate from `FieldError` so that pure geometry callers can tell a
/// rejected route apart from a legitimate zero distance.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryError {
    #[error("route has no points")]
    EmptyRoute,
}
