//! Persistence Layer
//!
//! - `store`: durable sink for status reports and run status (Postgres or in-memory)
//! - `buffer`: per-run batching in front of the sink, doubling as the resync cache

pub mod buffer;
pub mod store;

pub use buffer::StatusBuffer;
pub use store::{MemoryReportStore, PostgresReportStore, ReportSink};
