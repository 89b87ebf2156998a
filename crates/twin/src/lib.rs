//! The HVAC digital twin: a validated configuration, the closed control loop
//! over `controller` and `sim`, and what the loop reports.

pub mod config;
pub mod control_loop;
pub mod error;
pub mod events;
pub mod snapshot;
pub mod summary;

pub use config::{check_gains, AlertThresholds, SetpointLimits, Setpoints, TwinConfig};
pub use control_loop::ControlLoop;
pub use error::{ConfigError, ConfigResult};
pub use events::{
    Alert, AlertKind, AlertLevel, EventSink, MemorySink, NullSink, TracingSink, TwinEvent,
};
pub use snapshot::TwinSnapshot;
pub use summary::{compare, energy_savings_pct, RunSummary};
