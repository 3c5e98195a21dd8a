use crate::supervisor::SupervisorState;
use crate::tags;
use serde::Serialize;
use std::sync::mpsc::Sender;

/// What one tick observed and did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickRecord {
    pub tick: u64,
    /// Monotonic microseconds since the loop's time base started.
    pub timestamp_us: u64,
    pub unix_us: u64,
    pub control_celsius: f64,
    pub degraded: bool,
    pub fail_safe: bool,
    pub supervisor: SupervisorState,
    pub contributing: Vec<String>,
    pub target_duty: f64,
    /// Duty the actuator holds after this tick.
    pub applied_duty: f64,
    pub actuator_ok: bool,
    pub tick_duration_us: u64,
    /// Tick boundaries skipped so far because of overruns.
    pub ticks_missed: u64,
}

/// Append-only observer of loop ticks.
pub trait TelemetrySink: Send {
    fn record(&mut self, tick: &TickRecord);

    fn flush(&mut self) {}
}

impl TelemetrySink for Sender<TickRecord> {
    fn record(&mut self, tick: &TickRecord) {
        let _ = self.send(tick.clone());
    }
}

/// Emits one debug line per tick through the `log` facade.
#[derive(Debug, Default)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn record(&mut self, t: &TickRecord) {
        log::debug!(
            "tick {} {}={:.1} {}={} {}={} {}={:.1} {}={:.1} {}={}",
            t.tick,
            tags::CONTROL_TEMP_C.key,
            t.control_celsius,
            tags::DEGRADED.key,
            t.degraded,
            tags::FAIL_SAFE.key,
            t.fail_safe,
            tags::TARGET_DUTY.key,
            t.target_duty,
            tags::APPLIED_DUTY.key,
            t.applied_duty,
            tags::TICK_DURATION_US.key,
            t.tick_duration_us
        );
    }
}
