use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, WallClock};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PidConfig {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub out_min: f64,
    pub out_max: f64,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            kp: 2.0,
            ki: 0.1,
            kd: 0.05,
            out_min: -100.0,
            out_max: 100.0,
        }
    }
}

/// Per-channel PID memory.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PidChannel {
    pub last_error: f64,
    pub integral: f64,
    /// `None` until the first call seeds the channel.
    pub last_time: Option<f64>,
}

impl PidChannel {
    fn update(&mut self, cfg: &PidConfig, setpoint: f64, measurement: f64, now: f64) -> f64 {
        let error = setpoint - measurement;

        let Some(last_time) = self.last_time else {
            // A non-finite first error would poison every later derivative.
            if error.is_finite() {
                self.last_time = Some(now);
                self.last_error = error;
            }
            return 0.0;
        };

        let dt = now - last_time;
        // Also rejects NaN deltas.
        if !(dt > 0.0) {
            return 0.0;
        }

        let p_term = cfg.kp * error;

        // Anti-windup acts on the contribution, then the accumulator is
        // back-computed so it always matches the current ki.
        let mut integral = self.integral + error * dt;
        let i_term = if cfg.ki != 0.0 {
            let contribution = (cfg.ki * integral).clamp(cfg.out_min, cfg.out_max);
            integral = contribution / cfg.ki;
            contribution
        } else {
            integral = 0.0;
            0.0
        };

        let d_term = cfg.kd * (error - self.last_error) / dt;

        let out = (p_term + i_term + d_term).clamp(cfg.out_min, cfg.out_max);
        if !out.is_finite() {
            return 0.0;
        }

        self.integral = integral;
        self.last_error = error;
        self.last_time = Some(now);
        out
    }
}

/// Two-channel PID controller (temperature and humidity share gains).
#[derive(Clone, Debug)]
pub struct Pid {
    cfg: PidConfig,
    clock: Arc<dyn Clock>,
    temperature: PidChannel,
    humidity: PidChannel,
}

impl Pid {
    pub fn new(cfg: PidConfig) -> Self {
        Self::with_clock(cfg, Arc::new(WallClock::new()))
    }

    pub fn with_clock(cfg: PidConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            cfg,
            clock,
            temperature: PidChannel::default(),
            humidity: PidChannel::default(),
        }
    }

    pub fn config(&self) -> &PidConfig {
        &self.cfg
    }

    /// Replace the gains. Channel memory is kept; the integral is re-clamped
    /// against the new `ki` on the next update.
    pub fn tune(&mut self, kp: f64, ki: f64, kd: f64) {
        self.cfg.kp = kp;
        self.cfg.ki = ki;
        self.cfg.kd = kd;
    }

    pub fn temperature_channel(&self) -> PidChannel {
        self.temperature
    }

    pub fn humidity_channel(&self) -> PidChannel {
        self.humidity
    }

    pub fn compute_temperature(&mut self, setpoint: f64, measurement: f64) -> f64 {
        let now = self.clock.now_s();
        self.temperature.update(&self.cfg, setpoint, measurement, now)
    }

    pub fn compute_humidity(&mut self, setpoint: f64, measurement: f64) -> f64 {
        let now = self.clock.now_s();
        self.humidity.update(&self.cfg, setpoint, measurement, now)
    }

    pub fn reset(&mut self) {
        self.temperature = PidChannel::default();
        self.humidity = PidChannel::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimClock;

    fn pid_with(cfg: PidConfig) -> (Pid, SimClock) {
        let clock = SimClock::new(0.0);
        (Pid::with_clock(cfg, Arc::new(clock.clone())), clock)
    }

    #[test]
    fn first_call_returns_zero_and_seeds() {
        let (mut pid, _clock) = pid_with(PidConfig::default());
        assert_eq!(pid.compute_temperature(25.0, 10.0), 0.0);
        let ch = pid.temperature_channel();
        assert_eq!(ch.last_time, Some(0.0));
        assert_eq!(ch.last_error, 15.0);
        assert_eq!(ch.integral, 0.0);
        // Humidity channel is independent.
        assert_eq!(pid.humidity_channel().last_time, None);
    }

    #[test]
    fn zero_or_negative_dt_returns_zero_without_mutation() {
        let (mut pid, clock) = pid_with(PidConfig::default());
        pid.compute_temperature(22.0, 20.0);
        clock.advance(60.0);
        pid.compute_temperature(22.0, 20.0);
        let before = pid.temperature_channel();

        // Same timestamp.
        assert_eq!(pid.compute_temperature(22.0, 10.0), 0.0);
        assert_eq!(pid.temperature_channel(), before);

        // Clock steps backwards.
        clock.set(30.0);
        assert_eq!(pid.compute_temperature(22.0, 10.0), 0.0);
        assert_eq!(pid.temperature_channel(), before);
    }

    #[test]
    fn proportional_integral_derivative_terms() {
        let cfg = PidConfig {
            kp: 2.0,
            ki: 0.1,
            kd: 0.5,
            ..Default::default()
        };
        let (mut pid, clock) = pid_with(cfg);
        pid.compute_temperature(22.0, 21.0); // error 1, seeds
        clock.advance(10.0);
        let out = pid.compute_temperature(22.0, 20.0); // error 2
        // P = 4, I = 0.1 * 20 = 2, D = 0.5 * (2 - 1) / 10 = 0.05
        assert!((out - 6.05).abs() < 1e-12, "out = {out}");
        assert!((pid.temperature_channel().integral - 20.0).abs() < 1e-12);
    }

    #[test]
    fn integral_is_clamped_by_output_limits_over_ki() {
        let cfg = PidConfig {
            kp: 0.0,
            ki: 0.5,
            kd: 0.0,
            ..Default::default()
        };
        let (mut pid, clock) = pid_with(cfg);
        pid.compute_temperature(30.0, 0.0);
        for _ in 0..50 {
            clock.advance(60.0);
            let out = pid.compute_temperature(30.0, 0.0);
            assert!(out <= 100.0);
        }
        let integral = pid.temperature_channel().integral;
        assert!(integral <= 100.0 / 0.5 + 1e-9, "integral = {integral}");
        assert!((integral - 200.0).abs() < 1e-9);

        // Sustained negative error winds the other way but stops at min/ki.
        for _ in 0..50 {
            clock.advance(60.0);
            pid.compute_temperature(0.0, 30.0);
        }
        assert!((pid.temperature_channel().integral + 200.0).abs() < 1e-9);
    }

    #[test]
    fn zero_ki_forces_accumulator_to_zero() {
        let cfg = PidConfig {
            kp: 1.0,
            ki: 0.0,
            kd: 0.0,
            ..Default::default()
        };
        let (mut pid, clock) = pid_with(cfg);
        pid.compute_humidity(50.0, 40.0);
        for _ in 0..10 {
            clock.advance(60.0);
            let out = pid.compute_humidity(50.0, 40.0);
            assert_eq!(out, 10.0);
        }
        assert_eq!(pid.humidity_channel().integral, 0.0);
    }

    #[test]
    fn retuning_ki_reclamps_integral() {
        let cfg = PidConfig {
            kp: 0.0,
            ki: 0.1,
            kd: 0.0,
            ..Default::default()
        };
        let (mut pid, clock) = pid_with(cfg);
        pid.compute_temperature(10.0, 0.0);
        for _ in 0..20 {
            clock.advance(60.0);
            pid.compute_temperature(10.0, 0.0);
        }
        assert!((pid.temperature_channel().integral - 1000.0).abs() < 1e-9);

        pid.tune(0.0, 1.0, 0.0);
        clock.advance(60.0);
        let out = pid.compute_temperature(10.0, 0.0);
        assert_eq!(out, 100.0);
        assert!((pid.temperature_channel().integral - 100.0).abs() < 1e-9);
    }

    #[test]
    fn at_setpoint_output_stays_zero() {
        let (mut pid, clock) = pid_with(PidConfig::default());
        for _ in 0..20 {
            let out = pid.compute_temperature(22.0, 22.0);
            assert_eq!(out, 0.0);
            clock.advance(60.0);
        }
    }

    #[test]
    fn derivative_kick_decays_once_error_settles() {
        let cfg = PidConfig {
            kp: 0.0,
            ki: 0.0,
            kd: 10.0,
            ..Default::default()
        };
        let (mut pid, clock) = pid_with(cfg);
        pid.compute_temperature(22.0, 20.0);
        clock.advance(1.0);
        let kick = pid.compute_temperature(22.0, 22.0);
        assert!(kick < 0.0);
        clock.advance(1.0);
        assert_eq!(pid.compute_temperature(22.0, 22.0), 0.0);
    }

    #[test]
    fn output_saturates_at_limits() {
        let (mut pid, clock) = pid_with(PidConfig::default());
        pid.compute_temperature(100.0, 0.0);
        clock.advance(60.0);
        assert_eq!(pid.compute_temperature(100.0, 0.0), 100.0);
        clock.advance(60.0);
        assert_eq!(pid.compute_temperature(-100.0, 100.0), -100.0);
    }

    #[test]
    fn non_finite_measurement_does_not_commit() {
        let (mut pid, clock) = pid_with(PidConfig::default());
        pid.compute_temperature(22.0, 20.0);
        let before = pid.temperature_channel();
        clock.advance(60.0);
        assert_eq!(pid.compute_temperature(22.0, f64::NAN), 0.0);
        assert_eq!(pid.temperature_channel(), before);
    }

    #[test]
    fn non_finite_first_measurement_leaves_channel_unseeded() {
        let (mut pid, clock) = pid_with(PidConfig::default());
        assert_eq!(pid.compute_temperature(22.0, f64::NAN), 0.0);
        assert_eq!(pid.temperature_channel(), PidChannel::default());

        clock.advance(60.0);
        assert_eq!(pid.compute_temperature(22.0, 20.0), 0.0);
        assert_eq!(pid.temperature_channel().last_time, Some(60.0));
        clock.advance(60.0);
        let out = pid.compute_temperature(22.0, 20.0);
        assert!(out.is_finite() && out > 0.0, "out = {out}");
    }

    #[test]
    fn reset_clears_both_channels() {
        let (mut pid, clock) = pid_with(PidConfig::default());
        pid.compute_temperature(22.0, 20.0);
        pid.compute_humidity(45.0, 40.0);
        clock.advance(60.0);
        pid.compute_temperature(22.0, 20.0);
        pid.reset();
        assert_eq!(pid.temperature_channel(), PidChannel::default());
        assert_eq!(pid.humidity_channel(), PidChannel::default());
        assert_eq!(pid.compute_temperature(22.0, 0.0), 0.0);
    }
}
