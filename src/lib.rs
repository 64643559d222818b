pub mod agent;
pub mod api;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod geometry;
pub mod motion;
pub mod persistence;
pub mod scoring;

pub use agent::{AgentClient, AgentWorker};
pub use config::AppConfig;
pub use coordinator::{Coordinator, CoordinatorHandle};
pub use domain::{ControlAction, Coordinate, Route, Run, RunStatus, StatusReport};
pub use error::{FieldError, GeometryError, Result};
pub use motion::{MotionPhase, MotionStateMachine, ReportGenerator};
pub use persistence::{MemoryReportStore, PostgresReportStore, ReportSink, StatusBuffer};
