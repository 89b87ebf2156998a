use controller::ControllerSettings;
use serde::{Deserialize, Serialize};
use sim::{InitialConditions, SensorSettings, ThermalParams, Weather};

use crate::error::{ConfigError, ConfigResult};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Setpoints {
    pub temperature: f64,
    pub humidity: f64,
}

impl Default for Setpoints {
    fn default() -> Self {
        Self {
            temperature: 22.0,
            humidity: 45.0,
        }
    }
}

/// Range a setpoint command must fall in.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetpointLimits {
    pub min_temperature: f64,
    pub max_temperature: f64,
    pub min_humidity: f64,
    pub max_humidity: f64,
}

impl Default for SetpointLimits {
    fn default() -> Self {
        Self {
            min_temperature: 18.0,
            max_temperature: 28.0,
            min_humidity: 30.0,
            max_humidity: 70.0,
        }
    }
}

impl SetpointLimits {
    pub fn check(&self, sp: &Setpoints) -> ConfigResult<()> {
        in_range("temperature", sp.temperature, self.min_temperature, self.max_temperature)?;
        in_range("humidity", sp.humidity, self.min_humidity, self.max_humidity)
    }
}

fn in_range(what: &'static str, value: f64, min: f64, max: f64) -> ConfigResult<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::SetpointOutOfRange {
            what,
            value,
            min,
            max,
        })
    }
}

/// Deviations at which the loop raises alerts for dashboards.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    pub temperature_deviation: f64,
    pub humidity_deviation: f64,
    pub energy_w: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            temperature_deviation: 3.0,
            humidity_deviation: 10.0,
            energy_w: 5000.0,
        }
    }
}

/// Everything a run needs, as plain data. Missing keys take their defaults.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TwinConfig {
    pub setpoints: Setpoints,
    pub limits: SetpointLimits,
    pub controller: ControllerSettings,
    pub building: ThermalParams,
    pub weather: Weather,
    pub initial: InitialConditions,
    pub sensors: SensorSettings,
    pub alerts: AlertThresholds,
}

impl TwinConfig {
    /// Parse and validate.
    pub fn from_json(text: &str) -> ConfigResult<Self> {
        let cfg: Self = serde_json::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn to_json_pretty(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let l = &self.limits;
        require(l.min_temperature < l.max_temperature, "temperature limits are inverted")?;
        require(l.min_humidity < l.max_humidity, "humidity limits are inverted")?;
        l.check(&self.setpoints)?;

        let pid = &self.controller.pid;
        check_gains(pid.kp, pid.ki, pid.kd)?;
        require(pid.out_min < pid.out_max, "pid out_min must be less than out_max")?;
        require(
            pid.out_min >= -100.0 && pid.out_max <= 100.0,
            "pid output limits must lie within [-100, 100]",
        )?;
        require(
            positive(self.controller.on_off.deadband),
            "on-off deadband must be positive",
        )?;
        let fuzzy = &self.controller.fuzzy;
        require(
            non_negative(fuzzy.temperature_fallback_gain)
                && non_negative(fuzzy.humidity_fallback_gain),
            "fuzzy fallback gains must be non-negative",
        )?;

        let b = &self.building;
        require(positive(b.time_step_s), "time step must be positive")?;
        require(b.substeps > 0, "substeps must be positive")?;
        require(b.history_len > 0, "model history length must be positive")?;
        require(positive(b.thermal_mass), "thermal mass must be positive")?;
        require(
            b.air_mass_fraction > 0.0 && b.air_mass_fraction < 0.5,
            "air mass fraction must lie in (0, 0.5)",
        )?;
        require(positive(b.wall_exchange_time_s), "wall exchange time must be positive")?;
        require(positive(b.volume_m3), "volume must be positive")?;
        require(positive(b.efficiency), "efficiency must be positive")?;
        require(positive(b.cooling_cop), "cooling COP must be positive")?;
        require(
            [
                b.ua_envelope,
                b.ua_infiltration,
                b.heating_capacity_w,
                b.cooling_capacity_w,
                b.fan_active_w,
                b.fan_idle_w,
                b.humidify_kg_h,
                b.dehumidify_kg_h,
            ]
            .into_iter()
            .all(non_negative),
            "building conductances, capacities and fan powers must be non-negative",
        )?;
        require(b.fan_active_w > b.fan_idle_w, "active fan power must exceed idle")?;

        let s = &self.sensors;
        require(
            (0.0..=1.0).contains(&s.fault_probability),
            "fault probability must lie in [0, 1]",
        )?;
        require(s.history_len > 0, "sensor history length must be positive")?;
        require(
            [
                s.temperature_noise,
                s.humidity_noise,
                s.pressure_noise,
                s.co2_noise,
            ]
            .into_iter()
            .all(non_negative),
            "sensor noise must be non-negative",
        )?;

        let a = &self.alerts;
        require(
            [a.temperature_deviation, a.humidity_deviation, a.energy_w]
                .into_iter()
                .all(non_negative),
            "alert thresholds must be non-negative",
        )
    }
}

pub fn check_gains(kp: f64, ki: f64, kd: f64) -> ConfigResult<()> {
    for (name, value) in [("kp", kp), ("ki", ki), ("kd", kd)] {
        if !non_negative(value) {
            return Err(ConfigError::InvalidGain { name, value });
        }
    }
    Ok(())
}

fn require(ok: bool, what: &'static str) -> ConfigResult<()> {
    if ok {
        Ok(())
    } else {
        Err(ConfigError::InvalidArg { what })
    }
}

fn positive(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

fn non_negative(v: f64) -> bool {
    v.is_finite() && v >= 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use controller::ControllerKind;

    #[test]
    fn defaults_are_valid() {
        TwinConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg = TwinConfig::from_json(
            r#"{
                "setpoints": { "temperature": 21.5 },
                "controller": { "kind": "fuzzy", "pid": { "kp": 3.0 } },
                "weather": { "profile": "fixed", "temperature": 0.0, "humidity": 60.0 }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.setpoints.temperature, 21.5);
        assert_eq!(cfg.setpoints.humidity, 45.0);
        assert_eq!(cfg.controller.kind, ControllerKind::Fuzzy);
        assert_eq!(cfg.controller.pid.kp, 3.0);
        assert_eq!(cfg.controller.pid.ki, 0.1);
        assert_eq!(cfg.building.time_step_s, 60.0);
    }

    #[test]
    fn round_trips_through_json() {
        let cfg = TwinConfig::default();
        let text = cfg.to_json_pretty().unwrap();
        assert_eq!(TwinConfig::from_json(&text).unwrap(), cfg);
    }

    #[test]
    fn rejects_out_of_range_setpoints() {
        let mut cfg = TwinConfig::default();
        cfg.setpoints.temperature = 35.0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::SetpointOutOfRange {
                what: "temperature",
                ..
            })
        ));

        let mut cfg = TwinConfig::default();
        cfg.setpoints.humidity = 10.0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::SetpointOutOfRange { what: "humidity", .. })
        ));
    }

    #[test]
    fn rejects_negative_gains() {
        let mut cfg = TwinConfig::default();
        cfg.controller.pid.ki = -0.1;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidGain { name: "ki", .. })
        ));
        assert!(check_gains(1.0, 0.0, f64::NAN).is_err());
    }

    #[test]
    fn rejects_bad_building_and_controller_values() {
        let mut cfg = TwinConfig::default();
        cfg.building.time_step_s = 0.0;
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidArg { .. })));

        let mut cfg = TwinConfig::default();
        cfg.building.air_mass_fraction = 0.7;
        assert!(cfg.validate().is_err());

        let mut cfg = TwinConfig::default();
        cfg.controller.on_off.deadband = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = TwinConfig::default();
        cfg.sensors.fault_probability = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            TwinConfig::from_json("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
