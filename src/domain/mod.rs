pub mod report;
pub mod route;
pub mod state;

pub use report::*;
pub use route::*;
pub use state::*;
