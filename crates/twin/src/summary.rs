use std::borrow::Borrow;

use controller::ControllerKind;
use serde::{Deserialize, Serialize};

use crate::config::TwinConfig;
use crate::control_loop::ControlLoop;
use crate::error::ConfigResult;
use crate::events::NullSink;
use crate::snapshot::TwinSnapshot;

const JOULES_PER_KWH: f64 = 3.6e6;

/// Performance figures for one run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub controller: ControllerKind,
    pub steps: u64,
    pub average_energy_w: f64,
    pub total_energy_kwh: f64,
    pub final_temperature_error: f64,
    pub final_humidity_error: f64,
    pub rms_temperature_error: f64,
}

impl RunSummary {
    /// Summarise consecutive snapshots, each covering `time_step_s`. Owned
    /// snapshots are folded in as they arrive and never retained.
    pub fn from_snapshots<I>(controller: ControllerKind, time_step_s: f64, snapshots: I) -> Self
    where
        I: IntoIterator,
        I::Item: Borrow<TwinSnapshot>,
    {
        let mut steps = 0u64;
        let mut energy_w = 0.0;
        let mut squared_error = 0.0;
        let mut last = None;
        for s in snapshots {
            let s = s.borrow();
            steps += 1;
            energy_w += s.energy_w;
            squared_error += s.temperature_error().powi(2);
            last = Some((s.temperature_error(), s.humidity_error()));
        }

        let n = steps.max(1) as f64;
        Self {
            controller,
            steps,
            average_energy_w: energy_w / n,
            total_energy_kwh: energy_w * time_step_s / JOULES_PER_KWH,
            final_temperature_error: last.map_or(0.0, |(t, _)| t),
            final_humidity_error: last.map_or(0.0, |(_, h)| h),
            rms_temperature_error: (squared_error / n).sqrt(),
        }
    }
}

/// Run every controller for `steps` from the same starting point.
pub fn compare(config: &TwinConfig, steps: u64) -> ConfigResult<Vec<RunSummary>> {
    ControllerKind::ALL
        .into_iter()
        .map(|kind| {
            let mut cfg = *config;
            cfg.controller.kind = kind;
            Ok(ControlLoop::new(cfg, NullSink)?.run(steps))
        })
        .collect()
}

/// Percentage of `baseline` energy saved by `candidate`. Negative when the
/// candidate uses more; 0 when the baseline used none.
pub fn energy_savings_pct(baseline: &RunSummary, candidate: &RunSummary) -> f64 {
    if baseline.total_energy_kwh <= 0.0 {
        return 0.0;
    }
    (baseline.total_energy_kwh - candidate.total_energy_kwh) / baseline.total_energy_kwh * 100.0
}
