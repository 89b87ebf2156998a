use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

pub const SECONDS_PER_DAY: f64 = 86_400.0;
const DAYS_PER_YEAR: f64 = 365.0;

/// Outdoor boundary condition for the building.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "profile", rename_all = "snake_case")]
pub enum Weather {
    /// Diurnal swing peaking at midday, on top of a yearly cycle.
    #[default]
    Sinusoidal,
    Fixed { temperature: f64, humidity: f64 },
}

impl Weather {
    /// Outdoor (temperature °C, relative humidity %) at simulated time `t_s`.
    pub fn outdoor(&self, t_s: f64) -> (f64, f64) {
        match *self {
            Weather::Sinusoidal => {
                let hour = hour_of_day(t_s);
                let day = (t_s % (DAYS_PER_YEAR * SECONDS_PER_DAY)) / SECONDS_PER_DAY;
                let daily = 8.0 * (2.0 * PI * (hour - 6.0) / 24.0).sin();
                let seasonal = 10.0 * (2.0 * PI * (day - 80.0) / DAYS_PER_YEAR).sin();
                let temperature = 15.0 + daily + seasonal;
                (temperature, humidity_for(temperature))
            }
            Weather::Fixed {
                temperature,
                humidity,
            } => (temperature, humidity.clamp(20.0, 90.0)),
        }
    }
}

/// Drier air when warm.
fn humidity_for(temperature: f64) -> f64 {
    (70.0 - 0.5 * (temperature - 15.0)).clamp(20.0, 90.0)
}

pub fn hour_of_day(t_s: f64) -> f64 {
    (t_s % SECONDS_PER_DAY) / 3600.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diurnal_peak_is_midday() {
        let w = Weather::Sinusoidal;
        let (dawn, _) = w.outdoor(0.0);
        let (noon, _) = w.outdoor(12.0 * 3600.0);
        assert!(noon > dawn);
        // 16 K diurnal range, seasonal term barely moves within a day.
        assert!((noon - dawn - 16.0).abs() < 0.5);
    }

    #[test]
    fn humidity_stays_in_bounds_all_year() {
        let w = Weather::Sinusoidal;
        let mut t = 0.0;
        while t < DAYS_PER_YEAR * SECONDS_PER_DAY {
            let (temp, rh) = w.outdoor(t);
            assert!(temp.is_finite());
            assert!((20.0..=90.0).contains(&rh));
            t += 3.0 * 3600.0;
        }
    }

    #[test]
    fn fixed_profile_clamps_humidity() {
        let w = Weather::Fixed {
            temperature: 5.0,
            humidity: 120.0,
        };
        assert_eq!(w.outdoor(1234.0), (5.0, 90.0));
    }

    #[test]
    fn profiles_parse_from_tagged_json() {
        let w: Weather =
            serde_json::from_str(r#"{"profile":"fixed","temperature":5.0,"humidity":50.0}"#)
                .unwrap();
        assert_eq!(
            w,
            Weather::Fixed {
                temperature: 5.0,
                humidity: 50.0
            }
        );
        let w: Weather = serde_json::from_str(r#"{"profile":"sinusoidal"}"#).unwrap();
        assert_eq!(w, Weather::Sinusoidal);
    }
}
