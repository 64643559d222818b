pub mod agents;
pub mod runs;
pub mod system;

pub use agents::*;
pub use runs::*;
pub use system::*;
