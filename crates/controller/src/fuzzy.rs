//! Mamdani fuzzy controller.
//!
//! Each channel maps a clamped error (and, for temperature, the error rate) through
//! triangular membership functions, fires min-AND rules, aggregates the clipped
//! output sets with max and defuzzifies by centroid over the integer output
//! universe `[-100, 100]`. If no rule fires, the channel falls back to a
//! proportional law and reports that through [`Inference::Fallback`].

use serde::{Deserialize, Serialize};

const OUTPUT_MIN: i32 = -100;
const OUTPUT_MAX: i32 = 100;

/// Triangular membership function. `a == b` or `b == c` gives a shoulder.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Triangle {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl Triangle {
    pub const fn new(a: f64, b: f64, c: f64) -> Self {
        Self { a, b, c }
    }

    pub fn grade(&self, x: f64) -> f64 {
        if !(x >= self.a && x <= self.c) {
            return 0.0;
        }
        if x == self.b {
            1.0
        } else if x < self.b {
            (x - self.a) / (self.b - self.a)
        } else {
            (self.c - x) / (self.c - self.b)
        }
    }
}

/// Five linguistic levels, ordered from most negative to most positive. Used
/// for errors and for outputs (negative outputs cool or dehumidify).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    NegativeLarge,
    NegativeSmall,
    Zero,
    PositiveSmall,
    PositiveLarge,
}

impl Level {
    fn index(self) -> usize {
        self as usize
    }
}

/// Direction of the error between two calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trend {
    Negative,
    Zero,
    Positive,
}

impl Trend {
    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rule {
    pub error: Level,
    pub rate: Option<Trend>,
    pub output: Level,
}

impl Rule {
    pub const fn when(error: Level, output: Level) -> Self {
        Self {
            error,
            rate: None,
            output,
        }
    }

    pub const fn when_trending(error: Level, rate: Trend, output: Level) -> Self {
        Self {
            error,
            rate: Some(rate),
            output,
        }
    }
}

/// Immutable membership functions plus rules for one channel.
#[derive(Clone, Debug, PartialEq)]
pub struct RuleBase {
    pub error_range: (f64, f64),
    pub error_sets: [Triangle; 5],
    pub rate_range: (f64, f64),
    pub rate_sets: [Triangle; 3],
    pub output_sets: [Triangle; 5],
    pub rules: Vec<Rule>,
}

const OUTPUT_SETS: [Triangle; 5] = [
    Triangle::new(-100.0, -100.0, -50.0),
    Triangle::new(-70.0, -30.0, 0.0),
    Triangle::new(-20.0, 0.0, 20.0),
    Triangle::new(0.0, 30.0, 70.0),
    Triangle::new(50.0, 100.0, 100.0),
];

const RATE_SETS: [Triangle; 3] = [
    Triangle::new(-5.0, -5.0, 0.0),
    Triangle::new(-2.0, 0.0, 2.0),
    Triangle::new(0.0, 5.0, 5.0),
];

impl RuleBase {
    pub fn temperature() -> Self {
        use Level::*;
        Self {
            error_range: (-10.0, 10.0),
            error_sets: [
                Triangle::new(-10.0, -10.0, -5.0),
                Triangle::new(-7.0, -3.0, 0.0),
                Triangle::new(-2.0, 0.0, 2.0),
                Triangle::new(0.0, 3.0, 7.0),
                Triangle::new(5.0, 10.0, 10.0),
            ],
            rate_range: (-5.0, 5.0),
            rate_sets: RATE_SETS,
            output_sets: OUTPUT_SETS,
            rules: vec![
                Rule::when(PositiveLarge, PositiveLarge),
                Rule::when(PositiveSmall, PositiveSmall),
                Rule::when(Zero, Zero),
                Rule::when(NegativeSmall, NegativeSmall),
                Rule::when(NegativeLarge, NegativeLarge),
                // Already closing in on setpoint: ease off.
                Rule::when_trending(PositiveSmall, Trend::Negative, Zero),
                Rule::when_trending(NegativeSmall, Trend::Positive, Zero),
            ],
        }
    }

    pub fn humidity() -> Self {
        use Level::*;
        Self {
            error_range: (-20.0, 20.0),
            error_sets: [
                Triangle::new(-20.0, -20.0, -10.0),
                Triangle::new(-15.0, -5.0, 0.0),
                Triangle::new(-5.0, 0.0, 5.0),
                Triangle::new(0.0, 5.0, 15.0),
                Triangle::new(10.0, 20.0, 20.0),
            ],
            rate_range: (-5.0, 5.0),
            rate_sets: RATE_SETS,
            output_sets: OUTPUT_SETS,
            rules: vec![
                Rule::when(PositiveLarge, PositiveLarge),
                Rule::when(PositiveSmall, PositiveSmall),
                Rule::when(Zero, Zero),
                Rule::when(NegativeSmall, NegativeSmall),
                Rule::when(NegativeLarge, NegativeLarge),
            ],
        }
    }

    pub fn clamp_error(&self, error: f64) -> f64 {
        error.clamp(self.error_range.0, self.error_range.1)
    }

    pub fn clamp_rate(&self, rate: f64) -> f64 {
        rate.clamp(self.rate_range.0, self.rate_range.1)
    }

    /// Centroid of the aggregated output, or `None` when nothing fires.
    /// Inputs are expected to be clamped already.
    pub fn infer(&self, error: f64, rate: f64) -> Option<f64> {
        let mut activation = [0.0_f64; 5];
        for rule in &self.rules {
            let mut strength = self.error_sets[rule.error.index()].grade(error);
            if let Some(trend) = rule.rate {
                strength = strength.min(self.rate_sets[trend.index()].grade(rate));
            }
            let slot = &mut activation[rule.output.index()];
            *slot = slot.max(strength);
        }

        let mut area = 0.0;
        let mut moment = 0.0;
        for x in OUTPUT_MIN..=OUTPUT_MAX {
            let x = f64::from(x);
            let mu = self
                .output_sets
                .iter()
                .zip(activation)
                .map(|(set, act)| act.min(set.grade(x)))
                .fold(0.0, f64::max);
            area += mu;
            moment += mu * x;
        }

        if area > 0.0 && moment.is_finite() {
            Some(moment / area)
        } else {
            None
        }
    }
}

/// Outcome of one fuzzy evaluation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Inference {
    Inferred(f64),
    /// No rule fired; the value comes from `error * fallback_gain`.
    Fallback(f64),
}

impl Inference {
    pub fn value(self) -> f64 {
        match self {
            Inference::Inferred(v) | Inference::Fallback(v) => v,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Inference::Fallback(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FuzzyConfig {
    pub temperature_fallback_gain: f64,
    pub humidity_fallback_gain: f64,
}

impl Default for FuzzyConfig {
    fn default() -> Self {
        Self {
            temperature_fallback_gain: 5.0,
            humidity_fallback_gain: 2.0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Fuzzy {
    cfg: FuzzyConfig,
    temperature_rules: RuleBase,
    humidity_rules: RuleBase,
    previous_error: f64,
}

impl Fuzzy {
    pub fn new(cfg: FuzzyConfig) -> Self {
        Self::with_rule_bases(cfg, RuleBase::temperature(), RuleBase::humidity())
    }

    pub fn with_rule_bases(cfg: FuzzyConfig, temperature: RuleBase, humidity: RuleBase) -> Self {
        Self {
            cfg,
            temperature_rules: temperature,
            humidity_rules: humidity,
            previous_error: 0.0,
        }
    }

    pub fn previous_error(&self) -> f64 {
        self.previous_error
    }

    pub fn infer_temperature(&mut self, setpoint: f64, measurement: f64) -> Inference {
        let error = setpoint - measurement;
        let rate = error - self.previous_error;
        self.previous_error = error;

        let rules = &self.temperature_rules;
        let error = rules.clamp_error(error);
        let rate = rules.clamp_rate(rate);
        resolve(rules.infer(error, rate), error, self.cfg.temperature_fallback_gain)
    }

    pub fn infer_humidity(&mut self, setpoint: f64, measurement: f64) -> Inference {
        let rules = &self.humidity_rules;
        let error = rules.clamp_error(setpoint - measurement);
        resolve(rules.infer(error, 0.0), error, self.cfg.humidity_fallback_gain)
    }

    pub fn compute_temperature(&mut self, setpoint: f64, measurement: f64) -> f64 {
        self.infer_temperature(setpoint, measurement).value()
    }

    pub fn compute_humidity(&mut self, setpoint: f64, measurement: f64) -> f64 {
        self.infer_humidity(setpoint, measurement).value()
    }

    pub fn reset(&mut self) {
        self.previous_error = 0.0;
    }
}

impl Default for Fuzzy {
    fn default() -> Self {
        Self::new(FuzzyConfig::default())
    }
}

fn resolve(inferred: Option<f64>, clamped_error: f64, gain: f64) -> Inference {
    let bound = |v: f64| {
        if v.is_finite() {
            v.clamp(-100.0, 100.0)
        } else {
            0.0
        }
    };
    match inferred {
        Some(v) => Inference::Inferred(bound(v)),
        None => Inference::Fallback(bound(clamped_error * gain)),
    }
}
