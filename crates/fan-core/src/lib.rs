//! Sensor-driven fan control: aggregation, curve evaluation, slew-limited
//! actuation and the periodic loop tying them together.

pub mod actuator;
pub mod aggregator;
pub mod config;
pub mod control_loop;
pub mod curve;
pub mod error;
#[cfg(feature = "simulation")]
pub mod hal_sim;
pub mod reading;
pub mod source;
pub mod supervisor;
pub mod tags;
pub mod telemetry;
pub mod timebase;
pub mod worker;

pub use actuator::{ActuatorConfig, ActuatorState, DutyWriter, FanActuator};
pub use aggregator::{AggregatorConfig, SensorAggregator, SourceStatus};
pub use config::ControlLoopConfig;
pub use control_loop::{ControlLoop, ControlLoopBuilder, ExecutionStats, LoopState};
pub use curve::{parse_points, CurvePoint, CurvePreset, FanCurve};
pub use error::{ActuatorError, ConfigError, LoopError, SensorError};
#[cfg(feature = "simulation")]
pub use hal_sim::{PlantParams, SimulatedFan, SimulatedSensor, ThermalPlant};
pub use reading::{AggregatedTemperature, SensorReading};
pub use source::{SensorSource, SysfsSensor, TimedSource, VendorSample, VendorSensor, VendorSession};
pub use supervisor::{Directive, FailSafeSupervisor, SupervisorState};
pub use telemetry::{LogSink, TelemetrySink, TickRecord};
pub use timebase::TimeBase;
pub use worker::{Worker, WorkerError};
