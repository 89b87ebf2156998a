use std::collections::{BTreeMap, BTreeSet};
use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::history::History;
use crate::thermal::ThermalState;
use crate::weather::SECONDS_PER_DAY;

const CO2_FLOOR_PPM: f64 = 300.0;
const FAULT_WINDOW: usize = 5;
const FAULT_MIN_COUNT: usize = 3;
const STUCK_MIN_COUNT: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantity {
    Temperature,
    Humidity,
    Pressure,
    Co2,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorSpec {
    pub id: String,
    pub quantity: Quantity,
    pub location: String,
    pub calibration: f64,
    /// Outdoor sensors never enter the indoor aggregates.
    pub outdoor: bool,
}

impl SensorSpec {
    pub fn new(id: &str, quantity: Quantity, location: &str, calibration: f64) -> Self {
        Self {
            id: id.to_string(),
            quantity,
            location: location.to_string(),
            calibration,
            outdoor: location.eq_ignore_ascii_case("outdoor"),
        }
    }
}

/// The sensor set of a two-zone building.
pub fn default_registry() -> Vec<SensorSpec> {
    vec![
        SensorSpec::new("temp_zone1", Quantity::Temperature, "Zone 1", 0.0),
        SensorSpec::new("temp_zone2", Quantity::Temperature, "Zone 2", 0.1),
        SensorSpec::new("temp_outdoor", Quantity::Temperature, "Outdoor", -0.2),
        SensorSpec::new("humidity_zone1", Quantity::Humidity, "Zone 1", 0.0),
        SensorSpec::new("humidity_zone2", Quantity::Humidity, "Zone 2", 1.0),
        SensorSpec::new("pressure", Quantity::Pressure, "Main", 0.0),
        SensorSpec::new("co2_zone1", Quantity::Co2, "Zone 1", 0.0),
    ]
}

/// Forced misbehaviour, on top of the random fault rate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SensorFault {
    #[default]
    None,
    /// Reports `value` with no noise.
    Stuck { value: f64 },
    Bias { value: f64 },
    /// Offset growing by `per_s` from the first read after injection.
    Drift { per_s: f64 },
    /// Every `n`-th read is a fault; `n == 1` faults every read.
    DropoutEvery { n: u64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingStatus {
    Ok,
    Fault,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp_s: f64,
    /// NaN when `status` is `Fault`.
    pub value: f64,
    pub status: ReadingStatus,
}

impl Reading {
    pub fn is_valid(&self) -> bool {
        self.status == ReadingStatus::Ok && self.value.is_finite()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorStatus {
    Ok,
    Fault,
    NoData,
}

/// What the sensors are measuring this cycle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Environment {
    pub time_s: f64,
    pub indoor_temp: f64,
    pub indoor_humidity: f64,
    pub outdoor_temp: f64,
}

impl Environment {
    pub fn from_state(s: &ThermalState) -> Self {
        Self {
            time_s: s.time_s,
            indoor_temp: s.indoor_temp,
            indoor_humidity: s.indoor_humidity,
            outdoor_temp: s.outdoor_temp,
        }
    }

    /// Stand-in conditions for running the sensors without a building model.
    pub fn diurnal(time_s: f64) -> Self {
        let swing = 3.0 * (2.0 * PI * (time_s % SECONDS_PER_DAY) / SECONDS_PER_DAY).sin();
        let indoor_temp = 22.0 + 0.3 * swing;
        Self {
            time_s,
            indoor_temp,
            indoor_humidity: 45.0 - 0.5 * (indoor_temp - 22.0),
            outdoor_temp: 22.0 + swing,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSettings {
    pub seed: u64,
    pub fault_probability: f64,
    pub history_len: usize,
    pub temperature_noise: f64,
    pub humidity_noise: f64,
    pub pressure_noise: f64,
    pub co2_noise: f64,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            seed: 12345,
            fault_probability: 0.001,
            history_len: 100,
            temperature_noise: 0.1,
            humidity_noise: 1.0,
            pressure_noise: 0.5,
            co2_noise: 10.0,
        }
    }
}

impl SensorSettings {
    fn noise_std(&self, q: Quantity) -> f64 {
        match q {
            Quantity::Temperature => self.temperature_noise,
            Quantity::Humidity => self.humidity_noise,
            Quantity::Pressure => self.pressure_noise,
            Quantity::Co2 => self.co2_noise,
        }
    }
}

/// Mean of the latest valid readings for one quantity. `value` is 0 when
/// `valid == 0`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub value: f64,
    pub valid: usize,
}

impl Aggregate {
    pub fn is_valid(&self) -> bool {
        self.valid > 0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Readings {
    pub temperature: Aggregate,
    pub humidity: Aggregate,
    pub pressure: Aggregate,
    pub co2: Aggregate,
    /// Latest valid outdoor temperature, if any outdoor sensor has one.
    pub outdoor_temperature: Option<f64>,
}

#[derive(Clone, Debug)]
struct VirtualSensor {
    spec: SensorSpec,
    fault: SensorFault,
    fault_since_s: Option<f64>,
    reads: u64,
    history: History<Reading>,
}

impl VirtualSensor {
    fn is_faulty(&self) -> bool {
        if self.history.len() < FAULT_WINDOW {
            return false;
        }
        let window: Vec<&Reading> = self.history.recent(FAULT_WINDOW).collect();

        let faults = window
            .iter()
            .filter(|r| r.status == ReadingStatus::Fault)
            .count();
        if faults >= FAULT_MIN_COUNT {
            return true;
        }

        let ok: Vec<f64> = window
            .iter()
            .filter(|r| r.status == ReadingStatus::Ok)
            .map(|r| r.value)
            .collect();
        ok.len() >= STUCK_MIN_COUNT && ok.iter().all(|v| *v == ok[0])
    }
}

#[derive(Clone, Debug)]
pub struct SensorManager {
    settings: SensorSettings,
    sensors: Vec<VirtualSensor>,
    rng: StdRng,
}

impl SensorManager {
    pub fn new(settings: SensorSettings) -> Self {
        Self::with_sensors(settings, default_registry())
    }

    pub fn with_sensors(settings: SensorSettings, specs: Vec<SensorSpec>) -> Self {
        let sensors = specs
            .into_iter()
            .map(|spec| VirtualSensor {
                spec,
                fault: SensorFault::None,
                fault_since_s: None,
                reads: 0,
                history: History::with_capacity(settings.history_len),
            })
            .collect();
        Self {
            settings,
            sensors,
            rng: StdRng::seed_from_u64(settings.seed),
        }
    }

    pub fn settings(&self) -> &SensorSettings {
        &self.settings
    }

    pub fn sensors(&self) -> impl Iterator<Item = &SensorSpec> {
        self.sensors.iter().map(|s| &s.spec)
    }

    pub fn history(&self, sensor_id: &str) -> Option<&History<Reading>> {
        self.find(sensor_id).map(|s| &s.history)
    }

    /// Returns false for an unknown id.
    pub fn calibrate(&mut self, sensor_id: &str, offset: f64) -> bool {
        match self.find_mut(sensor_id) {
            Some(s) => {
                s.spec.calibration = offset;
                true
            }
            None => false,
        }
    }

    /// Returns false for an unknown id.
    pub fn inject_fault(&mut self, sensor_id: &str, fault: SensorFault) -> bool {
        match self.find_mut(sensor_id) {
            Some(s) => {
                s.fault = fault;
                s.fault_since_s = None;
                s.reads = 0;
                true
            }
            None => false,
        }
    }

    /// Sample every sensor once and aggregate per quantity.
    pub fn read_all(&mut self, env: &Environment) -> Readings {
        for i in 0..self.sensors.len() {
            let reading = self.sample(i, env);
            self.sensors[i].history.push(reading);
        }

        let outdoor_temperature = self
            .sensors
            .iter()
            .filter(|s| s.spec.outdoor && s.spec.quantity == Quantity::Temperature)
            .filter_map(|s| s.history.latest())
            .find(|r| r.is_valid())
            .map(|r| r.value);

        Readings {
            temperature: self.aggregate(Quantity::Temperature),
            humidity: self.aggregate(Quantity::Humidity),
            pressure: self.aggregate(Quantity::Pressure),
            co2: self.aggregate(Quantity::Co2),
            outdoor_temperature,
        }
    }

    /// Average of the latest valid indoor readings of `quantity`.
    pub fn aggregate(&self, quantity: Quantity) -> Aggregate {
        let (sum, valid) = self
            .sensors
            .iter()
            .filter(|s| s.spec.quantity == quantity && !s.spec.outdoor)
            .filter_map(|s| s.history.latest())
            .filter(|r| r.is_valid())
            .fold((0.0, 0usize), |(sum, n), r| (sum + r.value, n + 1));

        if valid == 0 {
            Aggregate::default()
        } else {
            Aggregate {
                value: sum / valid as f64,
                valid,
            }
        }
    }

    /// Ids whose recent history shows repeated faults or a stuck value.
    pub fn detect_faults(&self) -> BTreeSet<String> {
        self.sensors
            .iter()
            .filter(|s| s.is_faulty())
            .map(|s| s.spec.id.clone())
            .collect()
    }

    pub fn sensor_status(&self) -> BTreeMap<String, SensorStatus> {
        self.sensors
            .iter()
            .map(|s| {
                let status = match s.history.latest() {
                    None => SensorStatus::NoData,
                    Some(r) if r.status == ReadingStatus::Ok => SensorStatus::Ok,
                    Some(_) => SensorStatus::Fault,
                };
                (s.spec.id.clone(), status)
            })
            .collect()
    }

    /// Drop all history and restart the random stream. Calibrations and
    /// injected faults stay.
    pub fn reset(&mut self) {
        for s in &mut self.sensors {
            s.history.clear();
            s.fault_since_s = None;
            s.reads = 0;
        }
        self.rng = StdRng::seed_from_u64(self.settings.seed);
    }

    fn find(&self, id: &str) -> Option<&VirtualSensor> {
        self.sensors.iter().find(|s| s.spec.id == id)
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut VirtualSensor> {
        self.sensors.iter_mut().find(|s| s.spec.id == id)
    }

    fn sample(&mut self, index: usize, env: &Environment) -> Reading {
        let settings = self.settings;
        let sensor = &mut self.sensors[index];
        sensor.reads += 1;
        let t = env.time_s;
        let fault = |t| Reading {
            timestamp_s: t,
            value: f64::NAN,
            status: ReadingStatus::Fault,
        };

        let quantity = sensor.spec.quantity;
        let truth = match quantity {
            Quantity::Temperature if sensor.spec.outdoor => env.outdoor_temp,
            Quantity::Temperature => env.indoor_temp,
            Quantity::Humidity => env.indoor_humidity,
            Quantity::Pressure => 1013.25,
            Quantity::Co2 => {
                let phase = 2.0 * PI * (t % SECONDS_PER_DAY) / SECONDS_PER_DAY;
                // Floor the truth, not the reading, so noise keeps samples distinct.
                (400.0 * (1.0 + 0.5 * phase.sin())).max(CO2_FLOOR_PPM)
            }
        };

        let mut add_noise = true;
        let mut value = match sensor.fault {
            SensorFault::None => truth,
            SensorFault::Stuck { value } => {
                add_noise = false;
                value
            }
            SensorFault::Bias { value } => truth + value,
            SensorFault::Drift { per_s } => {
                let since = *sensor.fault_since_s.get_or_insert(t);
                truth + per_s * (t - since)
            }
            SensorFault::DropoutEvery { n } => {
                if n > 0 && sensor.reads % n == 0 {
                    return fault(t);
                }
                truth
            }
        };

        if add_noise {
            value += sensor.spec.calibration;
            let sd = settings.noise_std(quantity);
            if sd > 0.0 {
                if let Ok(normal) = Normal::new(0.0, sd) {
                    value += normal.sample(&mut self.rng);
                }
            }
            if quantity == Quantity::Humidity {
                value = value.clamp(0.0, 100.0);
            }
        }

        if settings.fault_probability > 0.0 && self.rng.gen::<f64>() < settings.fault_probability {
            return fault(t);
        }
        if !value.is_finite() {
            return fault(t);
        }

        Reading {
            timestamp_s: t,
            value,
            status: ReadingStatus::Ok,
        }
    }
}
