use crate::actuator::{DutyWriter, FanActuator};
use crate::aggregator::SensorAggregator;
use crate::config::ControlLoopConfig;
use crate::curve::{CurvePoint, CurvePreset, FanCurve};
use crate::error::{ConfigError, LoopError};
use crate::source::SensorSource;
use crate::supervisor::{Directive, FailSafeSupervisor};
use crate::telemetry::{TelemetrySink, TickRecord};
use crate::timebase::TimeBase;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Longest sleep between stop-flag checks while waiting for a tick boundary.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    Running,
    Draining,
    Stopped,
}

#[derive(Clone, Default, Debug, Serialize)]
pub struct ExecutionStats {
    pub ticks_executed: u64,
    /// Tick boundaries skipped because a tick overran.
    pub ticks_missed: u64,
    pub max_tick_us: u64,
    pub degraded_ticks: u64,
    pub fail_safe_ticks: u64,
    pub actuator_failures: u64,
}

pub struct ControlLoopBuilder {
    config: ControlLoopConfig,
    curve: Option<Vec<CurvePoint>>,
    sources: Vec<Box<dyn SensorSource>>,
    writer: Option<Box<dyn DutyWriter>>,
    sinks: Vec<Box<dyn TelemetrySink>>,
    timebase: Option<TimeBase>,
}

impl ControlLoopBuilder {
    pub fn curve(mut self, points: Vec<CurvePoint>) -> Self {
        self.curve = Some(points);
        self
    }

    pub fn source(mut self, source: Box<dyn SensorSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn sources(mut self, sources: impl IntoIterator<Item = Box<dyn SensorSource>>) -> Self {
        self.sources.extend(sources);
        self
    }

    pub fn actuator(mut self, writer: Box<dyn DutyWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn sink(mut self, sink: Box<dyn TelemetrySink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn timebase(mut self, timebase: TimeBase) -> Self {
        self.timebase = Some(timebase);
        self
    }

    /// Validates everything and spawns the provider workers. The loop is
    /// returned `Idle`.
    pub fn build(self) -> Result<ControlLoop, ConfigError> {
        self.config.validate()?;
        let points = self
            .curve
            .unwrap_or_else(|| CurvePreset::Balanced.points());
        let curve = FanCurve::new(points, self.config.hysteresis_celsius)?;
        let writer = self.writer.ok_or(ConfigError::MissingActuator)?;

        let mut aggregator = SensorAggregator::new(self.config.aggregator());
        for source in self.sources {
            aggregator.register(source)?;
        }
        if aggregator.source_count() == 0 {
            log::warn!("control loop has no sensor sources; it will run on the fail-safe path");
        }

        let actuator = FanActuator::new(writer, self.config.actuator())?;
        let supervisor =
            FailSafeSupervisor::new(self.config.fail_safe_after_ticks, self.config.recovery_ticks);

        Ok(ControlLoop {
            config: self.config,
            aggregator,
            curve,
            actuator,
            supervisor,
            sinks: self.sinks,
            state: LoopState::Idle,
            stats: ExecutionStats::default(),
            last_target: None,
            actuator_failure_streak: 0,
            tick_count: 0,
            timebase: self.timebase.unwrap_or_default(),
        })
    }
}

/// Periodic aggregate → evaluate → actuate → record pipeline.
pub struct ControlLoop {
    config: ControlLoopConfig,
    aggregator: SensorAggregator,
    curve: FanCurve,
    actuator: FanActuator,
    supervisor: FailSafeSupervisor,
    sinks: Vec<Box<dyn TelemetrySink>>,
    state: LoopState,
    stats: ExecutionStats,
    last_target: Option<f64>,
    actuator_failure_streak: u32,
    tick_count: u64,
    timebase: TimeBase,
}

impl ControlLoop {
    pub fn builder(config: ControlLoopConfig) -> ControlLoopBuilder {
        ControlLoopBuilder {
            config,
            curve: None,
            sources: Vec::new(),
            writer: None,
            sinks: Vec::new(),
            timebase: None,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> &ExecutionStats {
        &self.stats
    }

    pub fn config(&self) -> &ControlLoopConfig {
        &self.config
    }

    pub fn curve(&self) -> &FanCurve {
        &self.curve
    }

    pub fn aggregator(&self) -> &SensorAggregator {
        &self.aggregator
    }

    pub fn actuator(&self) -> &FanActuator {
        &self.actuator
    }

    pub fn supervisor(&self) -> &FailSafeSupervisor {
        &self.supervisor
    }

    /// `Idle → Running`. Failing to take manual control of the fan is
    /// logged, not fatal: every tick retries the write.
    pub fn start(&mut self) -> Result<(), LoopError> {
        self.require(LoopState::Idle, "start")?;
        if let Err(e) = self.actuator.acquire() {
            log::warn!("could not take control of fan {}: {}", self.actuator.id(), e);
        }
        self.state = LoopState::Running;
        log::info!(
            "control loop running: {} sources, period {:?}, fan {}",
            self.aggregator.source_count(),
            self.config.tick_period,
            self.actuator.id()
        );
        Ok(())
    }

    /// Runs one tick immediately, outside the scheduler.
    pub fn tick(&mut self) -> Result<TickRecord, LoopError> {
        self.require(LoopState::Running, "tick")?;
        Ok(self.execute_tick())
    }

    /// Starts the loop and ticks on the fixed period until `stop` is set,
    /// then drains. `stop` is only checked between ticks.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<ExecutionStats, LoopError> {
        self.start()?;
        let period = self.config.tick_period;
        let mut next_tick = Instant::now();

        while !stop.load(Ordering::Acquire) {
            let now = Instant::now();
            if now < next_tick {
                thread::sleep((next_tick - now).min(STOP_POLL_INTERVAL));
                continue;
            }

            self.execute_tick();
            next_tick += period;

            let now = Instant::now();
            if now > next_tick {
                let behind = now - next_tick;
                let skipped = (behind.as_nanos() / period.as_nanos()) as u32 + 1;
                self.stats.ticks_missed += u64::from(skipped);
                log::warn!(
                    "tick {} overran by {:?}, skipping {} boundaries",
                    self.tick_count,
                    behind,
                    skipped
                );
                next_tick += period * skipped;
            }
        }

        self.shutdown()?;
        Ok(self.stats.clone())
    }

    /// `Running → Draining → Stopped`. An idle loop stops without touching
    /// the fan; a stopped loop stays stopped.
    pub fn shutdown(&mut self) -> Result<(), LoopError> {
        match self.state {
            LoopState::Stopped => return Ok(()),
            LoopState::Idle => {
                self.state = LoopState::Stopped;
                return Ok(());
            }
            LoopState::Draining => {
                return Err(LoopError::InvalidTransition {
                    action: "shutdown",
                    state: self.state,
                })
            }
            LoopState::Running => {}
        }

        self.state = LoopState::Draining;
        log::info!("control loop draining after {} ticks", self.stats.ticks_executed);

        if let Some(duty) = self.config.shutdown_duty {
            if let Err(e) = self.actuator.force(duty) {
                log::error!("failed to set shutdown duty {:.1}%: {}", duty, e);
            }
        }
        if let Err(e) = self.actuator.release() {
            log::error!("failed to release fan {}: {}", self.actuator.id(), e);
        }
        for sink in &mut self.sinks {
            sink.flush();
        }

        self.state = LoopState::Stopped;
        log::info!("control loop stopped");
        Ok(())
    }

    fn require(&self, expected: LoopState, action: &'static str) -> Result<(), LoopError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(LoopError::InvalidTransition {
                action,
                state: self.state,
            })
        }
    }

    fn execute_tick(&mut self) -> TickRecord {
        let started = Instant::now();
        self.tick_count += 1;

        let aggregate = self.aggregator.poll();
        let directive = self.supervisor.observe(&aggregate);
        let fail_safe = directive == Directive::ForceFailSafe;

        let target = if fail_safe {
            self.config.fail_safe_duty
        } else {
            let previous = self.last_target.unwrap_or(f64::NAN);
            self.curve.evaluate(aggregate.value, previous)
        };
        self.last_target = Some(target);

        let outcome = if fail_safe {
            self.actuator.force(target)
        } else {
            self.actuator.apply(target)
        };
        let actuator_ok = match outcome {
            Ok(()) => {
                if self.actuator_failure_streak > 0 {
                    log::info!(
                        "fan {} writable again after {} failed ticks",
                        self.actuator.id(),
                        self.actuator_failure_streak
                    );
                }
                self.actuator_failure_streak = 0;
                true
            }
            Err(e) => {
                self.actuator_failure_streak += 1;
                self.stats.actuator_failures += 1;
                log::warn!(
                    "fan {} write failed ({} in a row): {}",
                    self.actuator.id(),
                    self.actuator_failure_streak,
                    e
                );
                false
            }
        };

        let elapsed = started.elapsed();
        let tick_us = elapsed.as_micros() as u64;
        if elapsed > self.config.tick_period {
            log::warn!(
                "tick {} took {:?}, longer than the {:?} period",
                self.tick_count,
                elapsed,
                self.config.tick_period
            );
        }

        self.stats.ticks_executed += 1;
        self.stats.max_tick_us = self.stats.max_tick_us.max(tick_us);
        if aggregate.degraded {
            self.stats.degraded_ticks += 1;
        }
        if fail_safe {
            self.stats.fail_safe_ticks += 1;
        }

        let record = TickRecord {
            tick: self.tick_count,
            timestamp_us: self.timebase.us_at(started),
            unix_us: self.timebase.unix_us(),
            control_celsius: aggregate.value,
            degraded: aggregate.degraded,
            fail_safe,
            supervisor: self.supervisor.state(),
            contributing: aggregate.contributing_sources.into_iter().collect(),
            target_duty: target,
            applied_duty: self.actuator.current_duty(),
            actuator_ok,
            tick_duration_us: tick_us,
            ticks_missed: self.stats.ticks_missed,
        };
        for sink in &mut self.sinks {
            sink.record(&record);
        }
        record
    }
}
