//! Agent Coordinator
//!
//! Tracks every connected agent, relays run assignments and control commands
//! to the owning agent, fans status reports out to observers and hands them to
//! the batching buffer. All directory mutations go through one serialized loop.

pub mod command;
pub mod config;
pub mod coordinator;
pub mod directory;
pub mod state;

pub use command::{AgentEvent, AgentLink, AgentMessage, ControlRequest, CoordinatorMessage, ObserverEvent};
pub use config::CoordinatorConfig;
pub use coordinator::{Coordinator, CoordinatorHandle};
pub use directory::{AgentDirectory, Binding, ControlDispatch, SweepOutcome};
pub use state::{DirectoryStats, SessionSnapshot};
