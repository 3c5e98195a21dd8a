//! Temperature to duty mapping.
//!
//! The curve is piecewise linear between its points and flat beyond both
//! ends. Hysteresis is expressed as a second, "down" curve shifted right by
//! the band: while the previous duty sits between `f(T)` and `f(T + band)`
//! it is held, so the fan only slows once the temperature has dropped a full
//! band below the point that raised it.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub temp_celsius: f64,
    pub duty_percent: f64,
}

impl CurvePoint {
    pub const fn new(temp_celsius: f64, duty_percent: f64) -> Self {
        Self {
            temp_celsius,
            duty_percent,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FanCurve {
    points: Vec<CurvePoint>,
    hysteresis: f64,
}

impl FanCurve {
    pub fn new(points: Vec<CurvePoint>, hysteresis: f64) -> Result<Self, ConfigError> {
        validate_points(&points)?;
        if !hysteresis.is_finite() || hysteresis < 0.0 {
            return Err(ConfigError::InvalidBand {
                field: "hysteresis_celsius",
                value: hysteresis,
            });
        }
        Ok(Self { points, hysteresis })
    }

    pub fn points(&self) -> &[CurvePoint] {
        &self.points
    }

    pub fn hysteresis(&self) -> f64 {
        self.hysteresis
    }

    /// Highest duty the curve can produce.
    pub fn max_duty(&self) -> f64 {
        self.points.last().map_or(100.0, |p| p.duty_percent)
    }

    /// Duty for `current_temp`, holding `previous_duty` inside the band.
    pub fn evaluate(&self, current_temp: f64, previous_duty: f64) -> f64 {
        if !current_temp.is_finite() {
            return self.max_duty();
        }
        let up = self.interpolate(current_temp);
        if !previous_duty.is_finite() {
            return up;
        }
        // Rounding at a breakpoint can put `up` a hair above `down`.
        let down = self.interpolate(current_temp + self.hysteresis).max(up);
        previous_duty.clamp(up, down)
    }

    /// The bare curve with no hysteresis applied.
    pub fn interpolate(&self, temp: f64) -> f64 {
        let first = self.points[0];
        let last = self.points[self.points.len() - 1];
        if temp <= first.temp_celsius {
            return first.duty_percent;
        }
        if temp >= last.temp_celsius {
            return last.duty_percent;
        }

        for pair in self.points.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            if temp == hi.temp_celsius {
                return hi.duty_percent;
            }
            if temp < hi.temp_celsius {
                let ratio = (temp - lo.temp_celsius) / (hi.temp_celsius - lo.temp_celsius);
                return lo.duty_percent + ratio * (hi.duty_percent - lo.duty_percent);
            }
        }
        last.duty_percent
    }
}

fn validate_points(points: &[CurvePoint]) -> Result<(), ConfigError> {
    if points.is_empty() {
        return Err(ConfigError::EmptyCurve);
    }
    for (index, p) in points.iter().enumerate() {
        if !p.temp_celsius.is_finite() || !p.duty_percent.is_finite() {
            return Err(ConfigError::NonFinitePoint { index });
        }
        if !(0.0..=100.0).contains(&p.duty_percent) {
            return Err(ConfigError::DutyOutOfRange {
                index,
                duty: p.duty_percent,
            });
        }
    }
    for (i, pair) in points.windows(2).enumerate() {
        if pair[1].temp_celsius <= pair[0].temp_celsius {
            return Err(ConfigError::NonIncreasingTemperature { index: i + 1 });
        }
        if pair[1].duty_percent < pair[0].duty_percent {
            return Err(ConfigError::DecreasingDuty { index: i + 1 });
        }
    }
    Ok(())
}

/// Built-in curve shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CurvePreset {
    Quiet,
    Balanced,
    Performance,
    FullSpeed,
}

impl CurvePreset {
    pub fn points(self) -> Vec<CurvePoint> {
        match self {
            CurvePreset::Quiet => vec![
                CurvePoint::new(40.0, 15.0),
                CurvePoint::new(55.0, 25.0),
                CurvePoint::new(68.0, 45.0),
                CurvePoint::new(78.0, 70.0),
                CurvePoint::new(88.0, 100.0),
            ],
            CurvePreset::Balanced => vec![
                CurvePoint::new(40.0, 20.0),
                CurvePoint::new(60.0, 50.0),
                CurvePoint::new(80.0, 100.0),
            ],
            CurvePreset::Performance => vec![
                CurvePoint::new(35.0, 40.0),
                CurvePoint::new(50.0, 60.0),
                CurvePoint::new(65.0, 80.0),
                CurvePoint::new(75.0, 100.0),
            ],
            CurvePreset::FullSpeed => vec![CurvePoint::new(0.0, 100.0)],
        }
    }
}

impl fmt::Display for CurvePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CurvePreset::Quiet => "quiet",
            CurvePreset::Balanced => "balanced",
            CurvePreset::Performance => "performance",
            CurvePreset::FullSpeed => "full-speed",
        };
        f.write_str(name)
    }
}

impl FromStr for CurvePreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quiet" => Ok(CurvePreset::Quiet),
            "balanced" => Ok(CurvePreset::Balanced),
            "performance" => Ok(CurvePreset::Performance),
            "full-speed" | "full" => Ok(CurvePreset::FullSpeed),
            other => Err(format!("unknown curve preset {other:?}")),
        }
    }
}

/// Parses `"40:20,60:50,80:100"` (temperature:duty pairs). Ordering and
/// ranges are checked later by [`FanCurve::new`].
pub fn parse_points(s: &str) -> Result<Vec<CurvePoint>, String> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (temp, duty) = part
                .split_once(':')
                .ok_or_else(|| format!("expected TEMP:DUTY, got {part:?}"))?;
            let temp = temp
                .trim()
                .parse::<f64>()
                .map_err(|e| format!("bad temperature in {part:?}: {e}"))?;
            let duty = duty
                .trim()
                .parse::<f64>()
                .map_err(|e| format!("bad duty in {part:?}: {e}"))?;
            Ok(CurvePoint::new(temp, duty))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curve(band: f64) -> FanCurve {
        FanCurve::new(CurvePreset::Balanced.points(), band).unwrap()
    }

    #[test]
    fn interpolates_between_points() {
        assert_eq!(curve(0.0).evaluate(50.0, 0.0), 35.0);
    }

    #[test]
    fn clamps_outside_the_defined_range() {
        let c = curve(0.0);
        assert_eq!(c.evaluate(10.0, 0.0), 20.0);
        assert_eq!(c.evaluate(120.0, 0.0), 100.0);
    }

    #[test]
    fn holds_duty_inside_the_band() {
        let c = curve(5.0);
        let mut duty = 0.0;
        duty = c.evaluate(60.0, duty);
        assert_eq!(duty, 50.0);

        for temp in [58.0, 56.0, 55.0] {
            duty = c.evaluate(temp, duty);
            assert_eq!(duty, 50.0, "at {temp} °C");
        }

        duty = c.evaluate(54.0, duty);
        assert!(duty < 50.0);
        assert!((duty - 48.5).abs() < 1e-9);
    }

    #[test]
    fn shallow_segment_after_a_breakpoint_does_not_invert_the_band() {
        let c = FanCurve::new(
            vec![
                CurvePoint::new(40.0, 0.3),
                CurvePoint::new(60.0, 0.9),
                CurvePoint::new(80.0, 0.9),
            ],
            5.0,
        )
        .unwrap();
        assert_eq!(c.interpolate(60.0), 0.9);
        assert_eq!(c.evaluate(60.0, 0.5), 0.9);
        for temp in [59.9, 59.999_999, 60.0, 60.1] {
            let duty = c.evaluate(temp, 0.5);
            assert!((0.3..=0.9 + 1e-12).contains(&duty), "{temp} -> {duty}");
        }

        let c = FanCurve::new(
            vec![
                CurvePoint::new(30.0, 0.7),
                CurvePoint::new(45.0, 3.4),
                CurvePoint::new(70.0, 3.4),
            ],
            2.5,
        )
        .unwrap();
        assert_eq!(c.evaluate(45.0, 1.0), 3.4);
    }

    #[test]
    fn rising_temperature_is_never_held_back() {
        let c = curve(5.0);
        assert_eq!(c.evaluate(70.0, 50.0), 75.0);
    }

    #[test]
    fn non_finite_inputs() {
        let c = curve(3.0);
        assert_eq!(c.evaluate(f64::NAN, 20.0), 100.0);
        assert_eq!(c.evaluate(50.0, f64::NAN), 35.0);
    }

    #[test]
    fn single_point_curve_is_constant() {
        let c = FanCurve::new(CurvePreset::FullSpeed.points(), 2.0).unwrap();
        assert_eq!(c.evaluate(-10.0, 0.0), 100.0);
        assert_eq!(c.evaluate(90.0, 0.0), 100.0);
    }

    #[test]
    fn rejects_invalid_definitions() {
        assert_eq!(FanCurve::new(vec![], 0.0), Err(ConfigError::EmptyCurve));
        assert_eq!(
            FanCurve::new(
                vec![CurvePoint::new(60.0, 50.0), CurvePoint::new(60.0, 70.0)],
                0.0
            ),
            Err(ConfigError::NonIncreasingTemperature { index: 1 })
        );
        assert_eq!(
            FanCurve::new(
                vec![CurvePoint::new(40.0, 50.0), CurvePoint::new(60.0, 30.0)],
                0.0
            ),
            Err(ConfigError::DecreasingDuty { index: 1 })
        );
        assert!(matches!(
            FanCurve::new(vec![CurvePoint::new(40.0, 120.0)], 0.0),
            Err(ConfigError::DutyOutOfRange { .. })
        ));
        assert!(matches!(
            FanCurve::new(CurvePreset::Quiet.points(), -1.0),
            Err(ConfigError::InvalidBand { .. })
        ));
    }

    #[test]
    fn parses_point_lists_and_presets() {
        let points = parse_points("40:20, 60:50,80:100").unwrap();
        assert_eq!(points, CurvePreset::Balanced.points());
        assert!(parse_points("40-20").is_err());
        assert_eq!("full-speed".parse::<CurvePreset>(), Ok(CurvePreset::FullSpeed));
        assert!("turbo".parse::<CurvePreset>().is_err());
    }

    #[test]
    fn presets_are_valid_curves() {
        for preset in [
            CurvePreset::Quiet,
            CurvePreset::Balanced,
            CurvePreset::Performance,
            CurvePreset::FullSpeed,
        ] {
            assert!(FanCurve::new(preset.points(), 3.0).is_ok(), "{preset}");
        }
    }
}
