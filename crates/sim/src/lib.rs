//! Building physics and virtual sensors for the HVAC twin.

pub mod history;
pub mod sensors;
pub mod thermal;
pub mod weather;

pub use history::History;
pub use sensors::{
    default_registry, Aggregate, Environment, Quantity, Reading, ReadingStatus, Readings,
    SensorFault, SensorManager, SensorSettings, SensorSpec, SensorStatus,
};
pub use thermal::{InitialConditions, StepRecord, ThermalModel, ThermalParams, ThermalState};
pub use weather::Weather;
