use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnOffConfig {
    /// Temperature deadband; humidity uses twice this value.
    pub deadband: f64,
}

impl Default for OnOffConfig {
    fn default() -> Self {
        Self { deadband: 1.0 }
    }
}

/// Switching state of one channel. `Raising` is heating or humidifying,
/// `Lowering` is cooling or dehumidifying.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Off,
    Raising,
    Lowering,
}

impl Mode {
    pub fn output(self) -> f64 {
        match self {
            Mode::Off => 0.0,
            Mode::Raising => 100.0,
            Mode::Lowering => -100.0,
        }
    }

    /// Activate at the full band, release at half the band past setpoint.
    fn next(self, error: f64, band: f64) -> Mode {
        let release = band / 2.0;
        match self {
            Mode::Off if error > band => Mode::Raising,
            Mode::Off if error < -band => Mode::Lowering,
            Mode::Off => Mode::Off,
            Mode::Raising if error < -band => Mode::Lowering,
            Mode::Raising if error < -release => Mode::Off,
            Mode::Raising => Mode::Raising,
            Mode::Lowering if error > band => Mode::Raising,
            Mode::Lowering if error > release => Mode::Off,
            Mode::Lowering => Mode::Lowering,
        }
    }
}

/// Bang-bang controller with asymmetric hysteresis on both channels.
#[derive(Clone, Debug)]
pub struct OnOff {
    cfg: OnOffConfig,
    temperature: Mode,
    humidity: Mode,
}

impl OnOff {
    pub fn new(cfg: OnOffConfig) -> Self {
        Self {
            cfg,
            temperature: Mode::Off,
            humidity: Mode::Off,
        }
    }

    pub fn config(&self) -> &OnOffConfig {
        &self.cfg
    }

    pub fn set_deadband(&mut self, deadband: f64) {
        self.cfg.deadband = deadband;
    }

    pub fn humidity_deadband(&self) -> f64 {
        self.cfg.deadband * 2.0
    }

    /// Current (temperature, humidity) modes.
    pub fn modes(&self) -> (Mode, Mode) {
        (self.temperature, self.humidity)
    }

    pub fn compute_temperature(&mut self, setpoint: f64, measurement: f64) -> f64 {
        self.temperature = self
            .temperature
            .next(setpoint - measurement, self.cfg.deadband);
        self.temperature.output()
    }

    pub fn compute_humidity(&mut self, setpoint: f64, measurement: f64) -> f64 {
        let band = self.humidity_deadband();
        self.humidity = self.humidity.next(setpoint - measurement, band);
        self.humidity.output()
    }

    pub fn reset(&mut self) {
        self.temperature = Mode::Off;
        self.humidity = Mode::Off;
    }
}

impl Default for OnOff {
    fn default() -> Self {
        Self::new(OnOffConfig::default())
    }
}
