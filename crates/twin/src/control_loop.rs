//! The closed loop: sensors feed the active controller, the controller drives
//! the building model, the model is what the sensors measure next cycle.

use std::collections::BTreeSet;
use std::sync::Arc;

use controller::{Clock, Controller, ControllerKind, SimClock};
use sim::{Environment, Quantity, SensorManager, ThermalModel};

use crate::config::{check_gains, Setpoints, TwinConfig};
use crate::error::{ConfigError, ConfigResult};
use crate::events::{Alert, AlertKind, AlertLevel, EventSink, TwinEvent};
use crate::snapshot::TwinSnapshot;
use crate::summary::RunSummary;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct ActiveAlerts {
    temperature: bool,
    humidity: bool,
    energy: bool,
}

impl ActiveAlerts {
    fn flag(&mut self, kind: AlertKind) -> &mut bool {
        match kind {
            AlertKind::TemperatureDeviation => &mut self.temperature,
            AlertKind::HumidityDeviation => &mut self.humidity,
            AlertKind::HighEnergy => &mut self.energy,
        }
    }
}

pub struct ControlLoop<S: EventSink> {
    config: TwinConfig,
    clock: SimClock,
    controller: Controller,
    model: ThermalModel,
    sensors: SensorManager,
    sink: S,
    steps: u64,
    held_temperature: f64,
    held_humidity: f64,
    faulty: BTreeSet<String>,
    alerts: ActiveAlerts,
    last: Option<TwinSnapshot>,
}

impl<S: EventSink> ControlLoop<S> {
    /// Validate `config` and build every component from it.
    pub fn new(config: TwinConfig, sink: S) -> ConfigResult<Self> {
        config.validate()?;
        let clock = SimClock::new(config.initial.time_s);
        let controller = config
            .controller
            .build(config.controller.kind, Arc::new(clock.clone()));
        let model = ThermalModel::new(config.building, config.weather, config.initial);
        let sensors = SensorManager::new(config.sensors);
        Ok(Self {
            config,
            clock,
            controller,
            model,
            sensors,
            sink,
            steps: 0,
            held_temperature: config.initial.indoor_temp,
            held_humidity: config.initial.indoor_humidity,
            faulty: BTreeSet::new(),
            alerts: ActiveAlerts::default(),
            last: None,
        })
    }

    pub fn config(&self) -> &TwinConfig {
        &self.config
    }

    pub fn setpoints(&self) -> Setpoints {
        self.config.setpoints
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn controller_kind(&self) -> ControllerKind {
        self.controller.kind()
    }

    pub fn model(&self) -> &ThermalModel {
        &self.model
    }

    pub fn sensors(&self) -> &SensorManager {
        &self.sensors
    }

    /// Direct access for fault injection.
    pub fn sensors_mut(&mut self) -> &mut SensorManager {
        &mut self.sensors
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn last_snapshot(&self) -> Option<&TwinSnapshot> {
        self.last.as_ref()
    }

    pub fn faulty_sensors(&self) -> &BTreeSet<String> {
        &self.faulty
    }

    /// One cycle: measure, decide, actuate.
    pub fn step(&mut self) -> TwinSnapshot {
        let before = self.model.current_state();
        let readings = self.sensors.read_all(&Environment::from_state(&before));

        let measured_temperature = self.measurement(
            Quantity::Temperature,
            readings.temperature.is_valid().then_some(readings.temperature.value),
            before.time_s,
        );
        let measured_humidity = self.measurement(
            Quantity::Humidity,
            readings.humidity.is_valid().then_some(readings.humidity.value),
            before.time_s,
        );

        let sp = self.config.setpoints;
        let u_t = self
            .controller
            .compute_temperature(sp.temperature, measured_temperature);
        let u_h = self.controller.compute_humidity(sp.humidity, measured_humidity);

        self.model.advance(u_t, u_h);
        let after = self.model.current_state();
        self.clock.set(after.time_s);

        let faulty = self.sensors.detect_faults();
        if faulty != self.faulty {
            self.faulty = faulty;
            self.sink.emit(&TwinEvent::SensorFaults {
                time_s: after.time_s,
                sensors: self.faulty.iter().cloned().collect(),
            });
        }

        let energy_w = self.model.last_record().map_or(0.0, |r| r.energy_w);
        let snapshot = TwinSnapshot {
            step: self.steps,
            time_s: after.time_s,
            controller: self.controller.kind(),
            setpoints: sp,
            measured_temperature,
            measured_humidity,
            true_temperature: after.indoor_temp,
            true_humidity: after.indoor_humidity,
            wall_temperature: after.wall_temp,
            outdoor_temperature: after.outdoor_temp,
            temperature_output: u_t,
            humidity_output: u_h,
            energy_w,
            faulty_sensors: self.faulty.iter().cloned().collect(),
        };
        self.sink.emit(&TwinEvent::Cycle(snapshot.clone()));
        self.check_alerts(&snapshot);

        self.steps += 1;
        self.last = Some(snapshot.clone());
        snapshot
    }

    pub fn run(&mut self, steps: u64) -> RunSummary {
        let kind = self.controller.kind();
        let time_step_s = self.config.building.time_step_s;
        RunSummary::from_snapshots(kind, time_step_s, (0..steps).map(|_| self.step()))
    }

    pub fn set_setpoints(&mut self, setpoints: Setpoints) -> ConfigResult<()> {
        self.config.limits.check(&setpoints)?;
        self.config.setpoints = setpoints;
        self.sink.emit(&TwinEvent::SetpointsChanged {
            time_s: self.clock.now_s(),
            setpoints,
        });
        Ok(())
    }

    /// Replace the active strategy with a freshly built one. Switching to the
    /// active kind is a no-op.
    pub fn switch_controller(&mut self, kind: ControllerKind) {
        let from = self.controller.kind();
        if from == kind {
            return;
        }
        self.config.controller.kind = kind;
        self.controller = self
            .config
            .controller
            .build(kind, Arc::new(self.clock.clone()));
        self.sink.emit(&TwinEvent::ControllerSwitched {
            time_s: self.clock.now_s(),
            from,
            to: kind,
        });
    }

    /// New PID gains, applied now if the PID is active and kept for later
    /// switches otherwise.
    pub fn tune_pid(&mut self, kp: f64, ki: f64, kd: f64) -> ConfigResult<()> {
        check_gains(kp, ki, kd)?;
        let pid = &mut self.config.controller.pid;
        pid.kp = kp;
        pid.ki = ki;
        pid.kd = kd;
        if let Controller::Pid(p) = &mut self.controller {
            p.tune(kp, ki, kd);
        }
        self.sink.emit(&TwinEvent::PidTuned {
            time_s: self.clock.now_s(),
            kp,
            ki,
            kd,
        });
        Ok(())
    }

    pub fn set_deadband(&mut self, deadband: f64) -> ConfigResult<()> {
        if !(deadband.is_finite() && deadband > 0.0) {
            return Err(ConfigError::InvalidArg {
                what: "on-off deadband must be positive",
            });
        }
        self.config.controller.on_off.deadband = deadband;
        if let Controller::OnOff(c) = &mut self.controller {
            c.set_deadband(deadband);
        }
        Ok(())
    }

    /// Returns false for an unknown sensor id.
    pub fn calibrate_sensor(&mut self, sensor_id: &str, offset: f64) -> bool {
        self.sensors.calibrate(sensor_id, offset)
    }

    /// Back to the configured initial conditions. Setpoints, gains and sensor
    /// calibrations stay as they are now.
    pub fn reset(&mut self) {
        self.model.reset();
        self.sensors.reset();
        self.controller.reset();
        self.clock.set(self.config.initial.time_s);
        self.steps = 0;
        self.held_temperature = self.config.initial.indoor_temp;
        self.held_humidity = self.config.initial.indoor_humidity;
        self.faulty.clear();
        self.alerts = ActiveAlerts::default();
        self.last = None;
    }

    fn measurement(&mut self, quantity: Quantity, fresh: Option<f64>, time_s: f64) -> f64 {
        let held = match quantity {
            Quantity::Humidity => &mut self.held_humidity,
            _ => &mut self.held_temperature,
        };
        match fresh {
            Some(v) => {
                *held = v;
                v
            }
            None => {
                let value = *held;
                self.sink.emit(&TwinEvent::MeasurementHeld {
                    time_s,
                    quantity,
                    held: value,
                });
                value
            }
        }
    }

    fn check_alerts(&mut self, s: &TwinSnapshot) {
        let limits = self.config.alerts;
        let checks = [
            (
                AlertKind::TemperatureDeviation,
                s.temperature_error().abs(),
                limits.temperature_deviation,
            ),
            (
                AlertKind::HumidityDeviation,
                s.humidity_error().abs(),
                limits.humidity_deviation,
            ),
            (AlertKind::HighEnergy, s.energy_w, limits.energy_w),
        ];
        for (kind, value, threshold) in checks {
            let raised = value > threshold;
            let flag = self.alerts.flag(kind);
            if raised == *flag {
                continue;
            }
            *flag = raised;
            let level = if raised {
                AlertLevel::Warning
            } else {
                AlertLevel::Cleared
            };
            self.sink.emit(&TwinEvent::Alert(Alert {
                kind,
                level,
                time_s: s.time_s,
                value,
                threshold,
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;
    use sim::{InitialConditions, SensorFault, SensorSettings, Weather};

    fn quiet_config() -> TwinConfig {
        TwinConfig {
            weather: Weather::Fixed {
                temperature: 10.0,
                humidity: 50.0,
            },
            sensors: SensorSettings {
                fault_probability: 0.0,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn twin(config: TwinConfig) -> ControlLoop<MemorySink> {
        ControlLoop::new(config, MemorySink::new()).unwrap()
    }

    #[test]
    fn rejects_invalid_config() {
        let mut cfg = quiet_config();
        cfg.setpoints.temperature = 40.0;
        assert!(ControlLoop::new(cfg, MemorySink::new()).is_err());
    }

    #[test]
    fn step_advances_time_and_emits_a_cycle() {
        let mut t = twin(quiet_config());
        let s = t.step();
        assert_eq!(s.step, 0);
        assert_eq!(s.time_s, 60.0);
        assert_eq!(t.clock().now_s(), 60.0);
        assert_eq!(t.steps(), 1);
        assert_eq!(t.sink().snapshots().count(), 1);
        assert_eq!(t.last_snapshot(), Some(&s));
        assert!((-100.0..=100.0).contains(&s.temperature_output));
    }

    #[test]
    fn heats_a_cold_building() {
        let mut cfg = quiet_config();
        cfg.initial = InitialConditions {
            indoor_temp: 18.0,
            ..Default::default()
        };
        let mut t = twin(cfg);
        let first = t.step();
        assert!(first.temperature_output > 0.0);
        t.run(119);
        assert!(t.model().current_state().indoor_temp > 20.0);
    }

    #[test]
    fn holds_last_measurement_when_every_sensor_faults() {
        let mut t = twin(quiet_config());
        let first = t.step();
        for id in ["temp_zone1", "temp_zone2"] {
            t.sensors_mut()
                .inject_fault(id, SensorFault::DropoutEvery { n: 1 });
        }
        let s = t.step();
        assert_eq!(s.measured_temperature, first.measured_temperature);
        let held = t
            .sink()
            .events
            .iter()
            .filter(|e| matches!(e, TwinEvent::MeasurementHeld {
                        quantity: Quantity::Temperature,
                        ..
                    }))
            .count();
        assert_eq!(held, 1);
    }

    #[test]
    fn fault_set_changes_are_reported_once() {
        let mut t = twin(quiet_config());
        t.sensors_mut()
            .inject_fault("humidity_zone1", SensorFault::DropoutEvery { n: 1 });
        for _ in 0..10 {
            t.step();
        }
        let reports: Vec<_> = t
            .sink()
            .events
            .iter()
            .filter_map(|e| match e {
                TwinEvent::SensorFaults { sensors, .. } => Some(sensors.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(reports, vec![vec!["humidity_zone1".to_string()]]);
        assert!(t.faulty_sensors().contains("humidity_zone1"));
        assert_eq!(
            t.last_snapshot().unwrap().faulty_sensors,
            vec!["humidity_zone1".to_string()]
        );
    }

    #[test]
    fn alerts_fire_on_edges_only() {
        let mut cfg = quiet_config();
        cfg.initial.indoor_temp = 18.0;
        let mut t = twin(cfg);
        t.run(5);
        let temp_warnings = t
            .sink()
            .alerts()
            .filter(|a| a.kind == AlertKind::TemperatureDeviation && a.level == AlertLevel::Warning)
            .count();
        assert_eq!(temp_warnings, 1);

        t.run(300);
        let cleared = t
            .sink()
            .alerts()
            .any(|a| a.kind == AlertKind::TemperatureDeviation && a.level == AlertLevel::Cleared);
        assert!(cleared);
    }

    #[test]
    fn setpoint_commands_are_validated() {
        let mut t = twin(quiet_config());
        let bad = Setpoints {
            temperature: 30.0,
            humidity: 45.0,
        };
        assert!(t.set_setpoints(bad).is_err());
        assert_eq!(t.setpoints(), Setpoints::default());

        let good = Setpoints {
            temperature: 24.0,
            humidity: 50.0,
        };
        t.set_setpoints(good).unwrap();
        assert_eq!(t.step().setpoints, good);
    }

    #[test]
    fn switching_and_tuning() {
        let mut t = twin(quiet_config());
        t.switch_controller(ControllerKind::Pid);
        assert!(t.sink().events.is_empty());

        t.switch_controller(ControllerKind::Fuzzy);
        assert_eq!(t.controller_kind(), ControllerKind::Fuzzy);
        assert_eq!(t.step().controller, ControllerKind::Fuzzy);

        assert!(t.tune_pid(-1.0, 0.0, 0.0).is_err());
        t.tune_pid(4.0, 0.2, 0.0).unwrap();
        t.switch_controller(ControllerKind::Pid);
        match t.controller() {
            Controller::Pid(p) => assert_eq!(p.config().kp, 4.0),
            other => panic!("expected pid, got {:?}", other.kind()),
        }

        assert!(t.set_deadband(0.0).is_err());
        t.set_deadband(0.5).unwrap();
        assert_eq!(t.config().controller.on_off.deadband, 0.5);
    }

    #[test]
    fn reset_replays_the_same_run() {
        let mut t = twin(TwinConfig::default());
        let first: Vec<_> = (0..20).map(|_| t.step()).collect();
        t.reset();
        assert_eq!(t.steps(), 0);
        assert_eq!(t.clock().now_s(), 0.0);
        let second: Vec<_> = (0..20).map(|_| t.step()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn run_summarises_the_cycles_it_publishes() {
        let mut t = twin(quiet_config());
        let summary = t.run(45);
        let expected = RunSummary::from_snapshots(
            ControllerKind::Pid,
            t.config().building.time_step_s,
            t.sink().snapshots(),
        );
        assert_eq!(summary, expected);
        assert_eq!(summary.steps, 45);
        assert_eq!(
            summary.final_temperature_error,
            t.last_snapshot().unwrap().temperature_error()
        );
    }

    #[test]
    fn fault_free_day_reports_no_sensor_faults() {
        let cfg = TwinConfig {
            sensors: SensorSettings {
                fault_probability: 0.0,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut t = twin(cfg);
        t.run(1440);
        let reports: Vec<_> = t
            .sink()
            .events
            .iter()
            .filter(|e| matches!(e, TwinEvent::SensorFaults { .. }))
            .collect();
        assert!(reports.is_empty(), "{reports:?}");
        assert!(t.faulty_sensors().is_empty());
    }

    #[test]
    fn calibration_goes_to_the_sensor_manager() {
        let mut t = twin(quiet_config());
        assert!(t.calibrate_sensor("temp_zone1", 0.5));
        assert!(!t.calibrate_sensor("missing", 0.5));
        let spec = t.sensors().sensors().find(|s| s.id == "temp_zone1").unwrap();
        assert_eq!(spec.calibration, 0.5);
    }
}
