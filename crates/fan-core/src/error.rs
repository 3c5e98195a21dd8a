use std::time::Duration;
use thiserror::Error;

/// Why a sensor produced an invalid reading.
///
/// Never propagated out of a source: it travels inside the
/// [`SensorReading`](crate::reading::SensorReading) it invalidated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SensorError {
    #[error("sensor unreadable: {reason}")]
    Unreadable { reason: String },
    #[error("malformed sensor value {raw:?}")]
    Malformed { raw: String },
    #[error("sensor read timed out after {after:?}")]
    Timeout { after: Duration },
    #[error("sensor worker still busy with a previous read")]
    Busy,
    #[error("device query failed: {reason}")]
    Device { reason: String },
    #[error("reading {celsius} °C outside plausible range")]
    Implausible { celsius: f64 },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActuatorError {
    #[error("invalid duty target {target}")]
    InvalidTarget { target: f64 },
    #[error("duty write failed: {reason}")]
    Write { reason: String },
    #[error("duty write timed out after {after:?}")]
    Timeout { after: Duration },
    #[error("actuator worker still busy with a previous write")]
    Busy,
    #[error("actuator unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Configuration invariant violations. Fatal at construction time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("fan curve has no points")]
    EmptyCurve,
    #[error("curve point {index} is not finite")]
    NonFinitePoint { index: usize },
    #[error("curve point {index} duty {duty} outside [0, 100]")]
    DutyOutOfRange { index: usize, duty: f64 },
    #[error("curve temperatures must be strictly increasing (point {index})")]
    NonIncreasingTemperature { index: usize },
    #[error("curve duties must be non-decreasing (point {index})")]
    DecreasingDuty { index: usize },
    #[error("{field} must be a finite value >= 0, got {value}")]
    InvalidBand { field: &'static str, value: f64 },
    #[error("{field} must be a duty in [0, 100], got {value}")]
    InvalidDuty { field: &'static str, value: f64 },
    #[error("{field} must be non-zero")]
    Zero { field: &'static str },
    #[error("plausible range {min}..={max} is empty or not finite")]
    InvalidRange { min: f64, max: f64 },
    #[error("duplicate sensor source id {id:?}")]
    DuplicateSource { id: String },
    #[error("control loop has no actuator")]
    MissingActuator,
    #[error("failed to spawn worker thread {name:?}: {reason}")]
    Spawn { name: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoopError {
    #[error("control loop cannot {action} while {state:?}")]
    InvalidTransition {
        action: &'static str,
        state: crate::control_loop::LoopState,
    },
}
