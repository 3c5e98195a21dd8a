use crate::actuator::ActuatorConfig;
use crate::aggregator::AggregatorConfig;
use crate::error::ConfigError;
use serde::Serialize;
use std::time::Duration;

/// Fixed at loop construction.
#[derive(Clone, Debug, Serialize)]
pub struct ControlLoopConfig {
    pub tick_period: Duration,
    pub hysteresis_celsius: f64,
    pub min_valid_sources: usize,
    pub max_duty_change_per_tick: f64,
    pub fail_safe_duty: f64,
    /// Fully degraded ticks tolerated before the fail-safe duty is forced.
    pub fail_safe_after_ticks: u32,
    /// Healthy ticks required to leave fail-safe.
    pub recovery_ticks: u32,
    pub sensor_timeout: Duration,
    pub actuator_timeout: Duration,
    pub initial_duty: f64,
    /// Duty forced while draining, before control is handed back.
    pub shutdown_duty: Option<f64>,
    pub sentinel_celsius: f64,
    pub plausible_min_celsius: f64,
    pub plausible_max_celsius: f64,
}

impl Default for ControlLoopConfig {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_secs(1),
            hysteresis_celsius: 3.0,
            min_valid_sources: 1,
            max_duty_change_per_tick: 10.0,
            fail_safe_duty: 100.0,
            fail_safe_after_ticks: 3,
            recovery_ticks: 1,
            sensor_timeout: Duration::from_millis(250),
            actuator_timeout: Duration::from_millis(500),
            initial_duty: 50.0,
            shutdown_duty: None,
            sentinel_celsius: 100.0,
            plausible_min_celsius: -40.0,
            plausible_max_celsius: 150.0,
        }
    }
}

impl ControlLoopConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_period.is_zero() {
            return Err(ConfigError::Zero {
                field: "tick_period",
            });
        }
        if self.sensor_timeout.is_zero() {
            return Err(ConfigError::Zero {
                field: "sensor_timeout",
            });
        }
        if self.actuator_timeout.is_zero() {
            return Err(ConfigError::Zero {
                field: "actuator_timeout",
            });
        }
        if self.min_valid_sources == 0 {
            return Err(ConfigError::Zero {
                field: "min_valid_sources",
            });
        }
        non_negative("hysteresis_celsius", self.hysteresis_celsius)?;
        non_negative("max_duty_change_per_tick", self.max_duty_change_per_tick)?;
        if self.max_duty_change_per_tick == 0.0 {
            return Err(ConfigError::Zero {
                field: "max_duty_change_per_tick",
            });
        }
        duty("fail_safe_duty", self.fail_safe_duty)?;
        duty("initial_duty", self.initial_duty)?;
        if let Some(d) = self.shutdown_duty {
            duty("shutdown_duty", d)?;
        }
        if !self.sentinel_celsius.is_finite() {
            return Err(ConfigError::InvalidBand {
                field: "sentinel_celsius",
                value: self.sentinel_celsius,
            });
        }
        let (min, max) = (self.plausible_min_celsius, self.plausible_max_celsius);
        if !min.is_finite() || !max.is_finite() || min >= max {
            return Err(ConfigError::InvalidRange { min, max });
        }
        Ok(())
    }

    pub fn aggregator(&self) -> AggregatorConfig {
        AggregatorConfig {
            max_reading_age: self.tick_period,
            read_timeout: self.sensor_timeout,
            min_valid_sources: self.min_valid_sources,
            sentinel_celsius: self.sentinel_celsius,
            plausible_range: self.plausible_min_celsius..=self.plausible_max_celsius,
        }
    }

    pub fn actuator(&self) -> ActuatorConfig {
        ActuatorConfig {
            max_duty_change_per_tick: self.max_duty_change_per_tick,
            write_timeout: self.actuator_timeout,
            initial_duty: self.initial_duty,
        }
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidBand { field, value })
    }
}

fn duty(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidDuty { field, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(ControlLoopConfig::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_broken_values() {
        let zero_tick = ControlLoopConfig {
            tick_period: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(
            zero_tick.validate(),
            Err(ConfigError::Zero {
                field: "tick_period"
            })
        );

        let bad_fail_safe = ControlLoopConfig {
            fail_safe_duty: 140.0,
            ..Default::default()
        };
        assert!(matches!(
            bad_fail_safe.validate(),
            Err(ConfigError::InvalidDuty {
                field: "fail_safe_duty",
                ..
            })
        ));

        let inverted = ControlLoopConfig {
            plausible_min_celsius: 90.0,
            plausible_max_celsius: 10.0,
            ..Default::default()
        };
        assert!(matches!(
            inverted.validate(),
            Err(ConfigError::InvalidRange { .. })
        ));

        let no_sources_needed = ControlLoopConfig {
            min_valid_sources: 0,
            ..Default::default()
        };
        assert!(no_sources_needed.validate().is_err());
    }

    #[test]
    fn stale_age_follows_tick_period() {
        let cfg = ControlLoopConfig {
            tick_period: Duration::from_millis(200),
            ..Default::default()
        };
        assert_eq!(cfg.aggregator().max_reading_age, Duration::from_millis(200));
    }
}
