use crate::error::SensorError;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

/// One temperature measurement from one source.
///
/// An invalid reading never exposes its value: [`SensorReading::celsius`]
/// returns `None` and [`SensorReading::fault`] says why.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    source_id: String,
    celsius: f64,
    observed_at: Instant,
    fault: Option<SensorError>,
}

impl SensorReading {
    pub fn valid(source_id: impl Into<String>, celsius: f64, observed_at: Instant) -> Self {
        let source_id = source_id.into();
        if !celsius.is_finite() {
            return Self::invalid(
                source_id,
                observed_at,
                SensorError::Malformed {
                    raw: celsius.to_string(),
                },
            );
        }
        Self {
            source_id,
            celsius,
            observed_at,
            fault: None,
        }
    }

    pub fn invalid(source_id: impl Into<String>, observed_at: Instant, fault: SensorError) -> Self {
        Self {
            source_id: source_id.into(),
            celsius: f64::NAN,
            observed_at,
            fault: Some(fault),
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn is_valid(&self) -> bool {
        self.fault.is_none()
    }

    pub fn celsius(&self) -> Option<f64> {
        if self.is_valid() {
            Some(self.celsius)
        } else {
            None
        }
    }

    pub fn observed_at(&self) -> Instant {
        self.observed_at
    }

    pub fn fault(&self) -> Option<&SensorError> {
        self.fault.as_ref()
    }

    /// True when the reading was taken more than `max_age` before `now`.
    pub fn is_stale(&self, now: Instant, max_age: Duration) -> bool {
        now.saturating_duration_since(self.observed_at) > max_age
    }
}

/// The single control temperature produced by one aggregation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedTemperature {
    pub value: f64,
    pub degraded: bool,
    pub contributing_sources: BTreeSet<String>,
    /// `value` was carried over (last known good, or the sentinel) because
    /// no reading survived this pass.
    pub retained: bool,
}

impl AggregatedTemperature {
    /// No source contributed this pass.
    pub fn is_fully_degraded(&self) -> bool {
        self.contributing_sources.is_empty()
    }
}
