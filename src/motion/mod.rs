//! Per-agent motion simulation
//!
//! - `machine`: resumable position-along-route state machine
//! - `report`: status report generation with injectable fluctuation

pub mod machine;
pub mod report;

pub use machine::{MotionPhase, MotionState, MotionStateMachine, ResumePhase, TickOutcome};
pub use report::{Fluctuation, NoFluctuation, RandomFluctuation, ReportGenerator, Telemetry};
