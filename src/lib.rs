//! Workspace root crate.
//!
//! Re-exports the controllers, the building simulation and the twin loop so
//! integration tests can depend on a single crate.

pub use controller::*;
pub use sim::*;
pub use twin::*;
