//! Everything the loop reports goes through an [`EventSink`]. The core never
//! logs directly, so hosts choose where events end up.

use controller::ControllerKind;
use serde::{Deserialize, Serialize};
use sim::Quantity;
use tracing::{debug, info, warn};

use crate::config::Setpoints;
use crate::snapshot::TwinSnapshot;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    TemperatureDeviation,
    HumidityDeviation,
    HighEnergy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Warning,
    /// The condition that raised the warning has cleared.
    Cleared,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub level: AlertLevel,
    pub time_s: f64,
    pub value: f64,
    pub threshold: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TwinEvent {
    Cycle(TwinSnapshot),
    /// The set of sensors flagged by fault detection changed.
    SensorFaults {
        time_s: f64,
        sensors: Vec<String>,
    },
    /// No valid reading this cycle; the controller saw `held` instead.
    MeasurementHeld {
        time_s: f64,
        quantity: Quantity,
        held: f64,
    },
    ControllerSwitched {
        time_s: f64,
        from: ControllerKind,
        to: ControllerKind,
    },
    SetpointsChanged {
        time_s: f64,
        setpoints: Setpoints,
    },
    PidTuned {
        time_s: f64,
        kp: f64,
        ki: f64,
        kd: f64,
    },
    Alert(Alert),
}

/// Receiver for loop events. Implementations must return promptly.
pub trait EventSink: Send {
    fn emit(&mut self, event: &TwinEvent);
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn emit(&mut self, event: &TwinEvent) {
        (**self).emit(event)
    }
}

impl<S: EventSink + ?Sized> EventSink for Box<S> {
    fn emit(&mut self, event: &TwinEvent) {
        (**self).emit(event)
    }
}

/// Forwards events to `tracing`: cycles at info, faults and alerts at warn.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&mut self, event: &TwinEvent) {
        match event {
            TwinEvent::Cycle(s) => {
                info!(
                    step = s.step,
                    time_s = s.time_s,
                    controller = %s.controller,
                    temperature = s.true_temperature,
                    humidity = s.true_humidity,
                    u_t = s.temperature_output,
                    u_h = s.humidity_output,
                    energy_w = s.energy_w,
                    "cycle"
                );
                debug!(
                    measured_temperature = s.measured_temperature,
                    measured_humidity = s.measured_humidity,
                    wall = s.wall_temperature,
                    outdoor = s.outdoor_temperature,
                    "cycle detail"
                );
            }
            TwinEvent::SensorFaults { time_s, sensors } => {
                if sensors.is_empty() {
                    info!(time_s, "all sensor faults cleared");
                } else {
                    warn!(time_s, sensors = ?sensors, "sensor faults detected");
                }
            }
            TwinEvent::MeasurementHeld {
                time_s,
                quantity,
                held,
            } => {
                warn!(time_s, quantity = ?quantity, held, "no valid readings, holding last value");
            }
            TwinEvent::ControllerSwitched { time_s, from, to } => {
                info!(time_s, from = %from, to = %to, "controller switched");
            }
            TwinEvent::SetpointsChanged { time_s, setpoints } => {
                info!(
                    time_s,
                    temperature = setpoints.temperature,
                    humidity = setpoints.humidity,
                    "setpoints changed"
                );
            }
            TwinEvent::PidTuned { time_s, kp, ki, kd } => {
                info!(time_s, kp, ki, kd, "pid retuned");
            }
            TwinEvent::Alert(a) => match a.level {
                AlertLevel::Warning => warn!(
                    kind = ?a.kind,
                    time_s = a.time_s,
                    value = a.value,
                    threshold = a.threshold,
                    "alert raised"
                ),
                AlertLevel::Cleared => info!(kind = ?a.kind, time_s = a.time_s, "alert cleared"),
            },
        }
    }
}

/// Keeps every event, for tests and post-run inspection.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    pub events: Vec<TwinEvent>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> impl Iterator<Item = &TwinSnapshot> {
        self.events.iter().filter_map(|e| match e {
            TwinEvent::Cycle(s) => Some(s),
            _ => None,
        })
    }

    pub fn alerts(&self) -> impl Iterator<Item = &Alert> {
        self.events.iter().filter_map(|e| match e {
            TwinEvent::Alert(a) => Some(a),
            _ => None,
        })
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl EventSink for MemorySink {
    fn emit(&mut self, event: &TwinEvent) {
        self.events.push(event.clone());
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&mut self, _event: &TwinEvent) {}
}
