use controller::ControllerKind;
use serde::{Deserialize, Serialize};

use crate::config::Setpoints;

/// What the twin publishes after every cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TwinSnapshot {
    pub step: u64,
    /// Simulated time at the end of the step.
    pub time_s: f64,
    pub controller: ControllerKind,
    pub setpoints: Setpoints,
    pub measured_temperature: f64,
    pub measured_humidity: f64,
    pub true_temperature: f64,
    pub true_humidity: f64,
    pub wall_temperature: f64,
    pub outdoor_temperature: f64,
    pub temperature_output: f64,
    pub humidity_output: f64,
    pub energy_w: f64,
    /// Sensors currently flagged by fault detection.
    pub faulty_sensors: Vec<String>,
}

impl TwinSnapshot {
    pub fn temperature_error(&self) -> f64 {
        self.setpoints.temperature - self.true_temperature
    }

    pub fn humidity_error(&self) -> f64 {
        self.setpoints.humidity - self.true_humidity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_lowercase_controller_and_round_trips() {
        let snap = TwinSnapshot {
            step: 3,
            time_s: 180.0,
            controller: ControllerKind::OnOff,
            setpoints: Setpoints::default(),
            measured_temperature: 21.2,
            measured_humidity: 44.0,
            true_temperature: 21.0,
            true_humidity: 44.5,
            wall_temperature: 20.1,
            outdoor_temperature: 10.0,
            temperature_output: 100.0,
            humidity_output: 0.0,
            energy_w: 22_722.2,
            faulty_sensors: vec!["temp_zone2".into()],
        };
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains(r#""controller":"onoff""#));
        let back: TwinSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
        assert!((snap.temperature_error() - 1.0).abs() < 1e-12);
        assert!((snap.humidity_error() - 0.5).abs() < 1e-12);
    }
}
