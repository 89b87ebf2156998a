use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use controller::ControllerKind;
use sim::{SensorFault, ThermalModel, Weather};
use tracing::info;
use tracing_subscriber::EnvFilter;
use twin::{
    compare, energy_savings_pct, ControlLoop, RunSummary, Setpoints, TracingSink, TwinConfig,
};

#[derive(Clone, Debug, ValueEnum)]
enum Mode {
    /// Closed loop, one JSON snapshot per line
    Trace,
    /// Run every controller and print one summary per line
    Compare,
    /// Building with the HVAC off, one model record per line
    FreeFloat,
}

#[derive(Parser, Debug)]
#[command(
    name = "hvac-twin",
    version,
    about = "HVAC digital twin: controllers against a simulated building"
)]
struct Args {
    #[arg(value_enum, long, default_value = "trace")]
    mode: Mode,

    /// JSON configuration file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// pid, onoff or fuzzy
    #[arg(long)]
    controller: Option<ControllerKind>,

    /// Simulated duration in minutes
    #[arg(long, default_value_t = 240)]
    minutes: u64,

    /// Temperature setpoint (°C)
    #[arg(long)]
    setpoint_temp: Option<f64>,

    /// Relative humidity setpoint (%)
    #[arg(long)]
    setpoint_humidity: Option<f64>,

    /// Starting indoor temperature (°C)
    #[arg(long)]
    initial_temp: Option<f64>,

    /// Hold the outdoor temperature fixed (°C) instead of the daily profile
    #[arg(long)]
    outdoor_temp: Option<f64>,

    /// Sensor id whose every reading faults; repeatable
    #[arg(long = "dropout")]
    dropouts: Vec<String>,

    /// RNG seed for deterministic runs
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(serde::Serialize)]
struct CompareRow<'a> {
    #[serde(flatten)]
    summary: &'a RunSummary,
    savings_vs_onoff_pct: Option<f64>,
}

fn main() -> Result<()> {
    // stdout carries the JSONL stream, logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let steps = steps_for(args.minutes, config.building.time_step_s);
    info!(mode = ?args.mode, steps, controller = %config.controller.kind, "starting");

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match args.mode {
        Mode::Trace => trace(config, &args.dropouts, steps, &mut out)?,
        Mode::Compare => {
            let results = compare(&config, steps)?;
            let baseline = results
                .iter()
                .find(|r| r.controller == ControllerKind::OnOff)
                .cloned();
            for summary in &results {
                let row = CompareRow {
                    summary,
                    savings_vs_onoff_pct: baseline
                        .as_ref()
                        .map(|b| energy_savings_pct(b, summary)),
                };
                writeln!(out, "{}", serde_json::to_string(&row)?)?;
            }
        }
        Mode::FreeFloat => {
            let mut model = ThermalModel::new(config.building, config.weather, config.initial);
            for _ in 0..steps {
                model.advance(0.0, 0.0);
                if let Some(record) = model.last_record() {
                    writeln!(out, "{}", serde_json::to_string(record)?)?;
                }
            }
        }
    }
    out.flush()?;
    Ok(())
}

fn trace(config: TwinConfig, dropouts: &[String], steps: u64, out: &mut impl Write) -> Result<()> {
    let mut twin = ControlLoop::new(config, TracingSink)?;
    for id in dropouts {
        if !twin
            .sensors_mut()
            .inject_fault(id, SensorFault::DropoutEvery { n: 1 })
        {
            bail!("unknown sensor id: {id}");
        }
    }
    for _ in 0..steps {
        let snapshot = twin.step();
        writeln!(out, "{}", serde_json::to_string(&snapshot)?)?;
    }
    Ok(())
}

fn load_config(args: &Args) -> Result<TwinConfig> {
    let mut cfg = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            TwinConfig::from_json(&text).with_context(|| format!("loading {}", path.display()))?
        }
        None => TwinConfig::default(),
    };

    if let Some(kind) = args.controller {
        cfg.controller.kind = kind;
    }
    cfg.setpoints = Setpoints {
        temperature: args.setpoint_temp.unwrap_or(cfg.setpoints.temperature),
        humidity: args.setpoint_humidity.unwrap_or(cfg.setpoints.humidity),
    };
    if let Some(t) = args.initial_temp {
        cfg.initial.indoor_temp = t;
    }
    if let Some(t) = args.outdoor_temp {
        let (_, humidity) = cfg.weather.outdoor(cfg.initial.time_s);
        cfg.weather = Weather::Fixed {
            temperature: t,
            humidity,
        };
    }
    if let Some(seed) = args.seed {
        cfg.sensors.seed = seed;
    }

    cfg.validate()?;
    Ok(cfg)
}

fn steps_for(minutes: u64, time_step_s: f64) -> u64 {
    (minutes as f64 * 60.0 / time_step_s).ceil() as u64
}
