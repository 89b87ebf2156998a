//! Two-node building model: an indoor air node and a wall node that stores heat.
//!
//! ```text
//!   outdoor ──(UA envelope + UA infiltration)── indoor air ──(wall exchange)── wall
//!                                                  ▲
//!                       internal + solar gains, HVAC (heating - cooling) × efficiency
//! ```
//!
//! Each call to [`ThermalModel::advance`] covers exactly one fixed time step,
//! integrated with classical RK4 over a few sub-steps.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::history::History;
use crate::weather::{hour_of_day, Weather};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermalParams {
    /// Total building thermal mass (J/K), split between the air and wall nodes.
    pub thermal_mass: f64,
    /// Share of `thermal_mass` on the indoor air node. The wall gets the rest.
    pub air_mass_fraction: f64,
    /// Time constant (s) of air/wall exchange relative to the wall capacity.
    pub wall_exchange_time_s: f64,
    pub ua_envelope: f64,
    pub ua_infiltration: f64,
    pub internal_gains_w: f64,
    /// Peak solar gain at solar noon.
    pub solar_gains_w: f64,
    pub volume_m3: f64,
    pub heating_capacity_w: f64,
    pub cooling_capacity_w: f64,
    pub efficiency: f64,
    pub cooling_cop: f64,
    pub fan_active_w: f64,
    pub fan_idle_w: f64,
    pub moisture_generation_kg_h: f64,
    pub humidify_kg_h: f64,
    pub dehumidify_kg_h: f64,
    pub time_step_s: f64,
    pub substeps: u32,
    pub history_len: usize,
}

impl Default for ThermalParams {
    fn default() -> Self {
        Self {
            thermal_mass: 5.0e6,
            air_mass_fraction: 0.3,
            wall_exchange_time_s: 3600.0,
            ua_envelope: 500.0,
            ua_infiltration: 200.0,
            internal_gains_w: 2000.0,
            solar_gains_w: 1000.0,
            volume_m3: 3000.0,
            heating_capacity_w: 20_000.0,
            cooling_capacity_w: 15_000.0,
            efficiency: 0.9,
            cooling_cop: 2.5,
            fan_active_w: 500.0,
            fan_idle_w: 100.0,
            moisture_generation_kg_h: 2.0,
            humidify_kg_h: 5.0,
            dehumidify_kg_h: 3.0,
            time_step_s: 60.0,
            substeps: 6,
            history_len: 1440,
        }
    }
}

impl ThermalParams {
    pub fn wall_mass_fraction(&self) -> f64 {
        1.0 - self.air_mass_fraction
    }

    pub fn air_capacity(&self) -> f64 {
        self.air_mass_fraction * self.thermal_mass
    }

    pub fn wall_capacity(&self) -> f64 {
        self.wall_mass_fraction() * self.thermal_mass
    }

    /// Conductance (W/K) between the air and wall nodes.
    pub fn wall_conductance(&self) -> f64 {
        self.wall_capacity() / self.wall_exchange_time_s
    }

    /// Fastest indoor warming (K/s) reachable at full heating with all gains on
    /// and no losses.
    pub fn max_heating_rate(&self) -> f64 {
        (self.heating_capacity_w * self.efficiency + self.internal_gains_w + self.solar_gains_w)
            / self.air_capacity()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitialConditions {
    pub indoor_temp: f64,
    pub wall_temp: f64,
    pub indoor_humidity: f64,
    pub time_s: f64,
}

impl Default for InitialConditions {
    fn default() -> Self {
        Self {
            indoor_temp: 22.0,
            wall_temp: 20.0,
            indoor_humidity: 45.0,
            time_s: 0.0,
        }
    }
}

/// Point-in-time view of the building.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThermalState {
    pub indoor_temp: f64,
    pub wall_temp: f64,
    pub indoor_humidity: f64,
    pub outdoor_temp: f64,
    pub outdoor_humidity: f64,
    pub time_s: f64,
}

/// One entry of the model history, stamped with the time the step started.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub time_s: f64,
    pub indoor_temp: f64,
    pub wall_temp: f64,
    pub indoor_humidity: f64,
    pub outdoor_temp: f64,
    pub heating_w: f64,
    pub cooling_w: f64,
    pub energy_w: f64,
}

#[derive(Clone, Debug)]
pub struct ThermalModel {
    params: ThermalParams,
    weather: Weather,
    initial: InitialConditions,
    state: ThermalState,
    history: History<StepRecord>,
}

impl ThermalModel {
    pub fn new(params: ThermalParams, weather: Weather, initial: InitialConditions) -> Self {
        let history = History::with_capacity(params.history_len);
        let mut model = Self {
            params,
            weather,
            initial,
            state: initial_state(&weather, &initial),
            history,
        };
        model.reset();
        model
    }

    pub fn params(&self) -> &ThermalParams {
        &self.params
    }

    pub fn weather(&self) -> Weather {
        self.weather
    }

    pub fn current_state(&self) -> ThermalState {
        self.state
    }

    pub fn history(&self) -> &History<StepRecord> {
        &self.history
    }

    pub fn last_record(&self) -> Option<&StepRecord> {
        self.history.latest()
    }

    /// Replace the conditions `reset` returns to, and reset.
    pub fn set_initial_conditions(&mut self, initial: InitialConditions) {
        self.initial = initial;
        self.reset();
    }

    /// Advance one fixed time step under the given controller outputs.
    pub fn advance(&mut self, temperature_output: f64, humidity_output: f64) {
        let p = self.params;
        let dt = p.time_step_s;
        let t = self.state.time_s;

        let (outdoor_temp, outdoor_humidity) = self.weather.outdoor(t);
        self.state.outdoor_temp = outdoor_temp;
        self.state.outdoor_humidity = outdoor_humidity;

        let u_t = saturate(temperature_output);
        let u_h = saturate(humidity_output);
        let heating = u_t.max(0.0) / 100.0 * p.heating_capacity_w;
        let cooling = (-u_t).max(0.0) / 100.0 * p.cooling_capacity_w;

        let solar = solar_gain(&p, t);
        let hvac = (heating - cooling) * p.efficiency;
        let g_wall = p.wall_conductance();
        let ua_out = p.ua_envelope + p.ua_infiltration;
        let c_air = p.air_capacity();
        let c_wall = p.wall_capacity();

        let rhs = |[t_in, t_wall]: [f64; 2]| -> [f64; 2] {
            let exchange = g_wall * (t_in - t_wall);
            let q_in = ua_out * (outdoor_temp - t_in) + p.internal_gains_w + solar + hvac;
            [(q_in - exchange) / c_air, exchange / c_wall]
        };

        let substeps = p.substeps.max(1);
        let h = dt / f64::from(substeps);
        let mut x = [self.state.indoor_temp, self.state.wall_temp];
        for _ in 0..substeps {
            x = rk4(&rhs, x, h);
        }
        // Keep the last finite state rather than poisoning the run.
        if x.iter().all(|v| v.is_finite()) {
            self.state.indoor_temp = x[0];
            self.state.wall_temp = x[1];
        }

        self.state.indoor_humidity = next_humidity(&p, &self.state, u_h, dt);

        let energy_w = energy_use(&p, heating, cooling);
        self.history.push(StepRecord {
            time_s: t,
            indoor_temp: self.state.indoor_temp,
            wall_temp: self.state.wall_temp,
            indoor_humidity: self.state.indoor_humidity,
            outdoor_temp,
            heating_w: heating,
            cooling_w: cooling,
            energy_w,
        });

        self.state.time_s = t + dt;
    }

    pub fn reset(&mut self) {
        self.state = initial_state(&self.weather, &self.initial);
        self.history.clear();
    }
}

fn initial_state(weather: &Weather, ic: &InitialConditions) -> ThermalState {
    let (outdoor_temp, outdoor_humidity) = weather.outdoor(ic.time_s);
    ThermalState {
        indoor_temp: ic.indoor_temp,
        wall_temp: ic.wall_temp,
        indoor_humidity: ic.indoor_humidity.clamp(20.0, 80.0),
        outdoor_temp,
        outdoor_humidity,
        time_s: ic.time_s,
    }
}

fn saturate(u: f64) -> f64 {
    if u.is_finite() {
        u.clamp(-100.0, 100.0)
    } else {
        0.0
    }
}

/// Half-sine between 06:00 and 18:00, zero at night.
fn solar_gain(p: &ThermalParams, t_s: f64) -> f64 {
    let hour = hour_of_day(t_s);
    if (6.0..=18.0).contains(&hour) {
        p.solar_gains_w * (PI * (hour - 6.0) / 12.0).sin()
    } else {
        0.0
    }
}

fn rk4<F: Fn([f64; 2]) -> [f64; 2]>(f: &F, x: [f64; 2], h: f64) -> [f64; 2] {
    let axpy = |a: [f64; 2], k: [f64; 2], s: f64| [a[0] + s * k[0], a[1] + s * k[1]];
    let k1 = f(x);
    let k2 = f(axpy(x, k1, 0.5 * h));
    let k3 = f(axpy(x, k2, 0.5 * h));
    let k4 = f(axpy(x, k3, h));
    [
        x[0] + h / 6.0 * (k1[0] + 2.0 * k2[0] + 2.0 * k3[0] + k4[0]),
        x[1] + h / 6.0 * (k1[1] + 2.0 * k2[1] + 2.0 * k3[1] + k4[1]),
    ]
}

fn next_humidity(p: &ThermalParams, s: &ThermalState, u_h: f64, dt: f64) -> f64 {
    let infiltration = p.ua_infiltration / 1000.0 * (s.outdoor_humidity - s.indoor_humidity) * 0.01;
    let hvac = if u_h > 0.0 {
        u_h / 100.0 * p.humidify_kg_h
    } else {
        u_h / 100.0 * p.dehumidify_kg_h
    };
    let moisture_kg = (p.moisture_generation_kg_h + infiltration + hvac) * dt / 3600.0;
    let delta = moisture_kg * 1000.0 / p.volume_m3;
    (s.indoor_humidity + delta).clamp(20.0, 80.0)
}

/// Electrical draw (W) for the step.
fn energy_use(p: &ThermalParams, heating: f64, cooling: f64) -> f64 {
    let fan = if heating > 0.0 || cooling > 0.0 {
        p.fan_active_w
    } else {
        p.fan_idle_w
    };
    (heating / p.efficiency + cooling / p.cooling_cop + fan).max(0.0)
}
