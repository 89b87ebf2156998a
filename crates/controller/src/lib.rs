//! HVAC control strategies.
//!
//! Every controller maps a (setpoint, measurement) pair per channel to an output in
//! `[-100, 100]`: positive heats or humidifies, negative cools or dehumidifies.

pub mod clock;
pub mod fuzzy;
pub mod on_off;
pub mod pid;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use clock::{Clock, SimClock, WallClock};
pub use fuzzy::{Fuzzy, FuzzyConfig, Inference, Level, Rule, RuleBase, Trend, Triangle};
pub use on_off::{Mode, OnOff, OnOffConfig};
pub use pid::{Pid, PidChannel, PidConfig};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerKind {
    #[default]
    Pid,
    OnOff,
    Fuzzy,
}

impl ControllerKind {
    pub const ALL: [ControllerKind; 3] =
        [ControllerKind::Pid, ControllerKind::OnOff, ControllerKind::Fuzzy];

    pub fn as_str(self) -> &'static str {
        match self {
            ControllerKind::Pid => "pid",
            ControllerKind::OnOff => "onoff",
            ControllerKind::Fuzzy => "fuzzy",
        }
    }
}

impl fmt::Display for ControllerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("unknown controller type: {0}")]
pub struct UnknownController(pub String);

impl FromStr for ControllerKind {
    type Err = UnknownController;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pid" => Ok(ControllerKind::Pid),
            "onoff" | "on-off" | "on_off" => Ok(ControllerKind::OnOff),
            "fuzzy" => Ok(ControllerKind::Fuzzy),
            _ => Err(UnknownController(s.to_string())),
        }
    }
}

/// Gains and bands for every strategy, plus which one is active.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    pub kind: ControllerKind,
    pub pid: PidConfig,
    pub on_off: OnOffConfig,
    pub fuzzy: FuzzyConfig,
}

impl ControllerSettings {
    pub fn build(&self, kind: ControllerKind, clock: Arc<dyn Clock>) -> Controller {
        match kind {
            ControllerKind::Pid => Controller::Pid(Pid::with_clock(self.pid, clock)),
            ControllerKind::OnOff => Controller::OnOff(OnOff::new(self.on_off)),
            ControllerKind::Fuzzy => Controller::Fuzzy(Fuzzy::new(self.fuzzy)),
        }
    }
}

/// The closed set of strategies.
#[derive(Clone, Debug)]
pub enum Controller {
    Pid(Pid),
    OnOff(OnOff),
    Fuzzy(Fuzzy),
}

impl Controller {
    pub fn kind(&self) -> ControllerKind {
        match self {
            Controller::Pid(_) => ControllerKind::Pid,
            Controller::OnOff(_) => ControllerKind::OnOff,
            Controller::Fuzzy(_) => ControllerKind::Fuzzy,
        }
    }

    pub fn compute_temperature(&mut self, setpoint: f64, measurement: f64) -> f64 {
        let out = match self {
            Controller::Pid(c) => c.compute_temperature(setpoint, measurement),
            Controller::OnOff(c) => c.compute_temperature(setpoint, measurement),
            Controller::Fuzzy(c) => c.compute_temperature(setpoint, measurement),
        };
        out.clamp(-100.0, 100.0)
    }

    pub fn compute_humidity(&mut self, setpoint: f64, measurement: f64) -> f64 {
        let out = match self {
            Controller::Pid(c) => c.compute_humidity(setpoint, measurement),
            Controller::OnOff(c) => c.compute_humidity(setpoint, measurement),
            Controller::Fuzzy(c) => c.compute_humidity(setpoint, measurement),
        };
        out.clamp(-100.0, 100.0)
    }

    pub fn reset(&mut self) {
        match self {
            Controller::Pid(c) => c.reset(),
            Controller::OnOff(c) => c.reset(),
            Controller::Fuzzy(c) => c.reset(),
        }
    }
}
