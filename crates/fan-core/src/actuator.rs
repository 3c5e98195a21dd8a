use crate::error::{ActuatorError, ConfigError};
use crate::worker::{Worker, WorkerError};
use std::time::{Duration, Instant};

/// Platform fan control mechanism.
pub trait DutyWriter: Send {
    fn id(&self) -> &str;

    fn write_duty(&mut self, percent: f64) -> Result<(), ActuatorError>;

    /// Current hardware duty, if the device can report it.
    fn read_duty(&mut self) -> Option<f64> {
        None
    }

    /// Takes the fan out of firmware control.
    fn acquire(&mut self) -> Result<(), ActuatorError> {
        Ok(())
    }

    /// Hands the fan back to firmware control.
    fn release(&mut self) -> Result<(), ActuatorError> {
        Ok(())
    }
}

impl<W: DutyWriter + ?Sized> DutyWriter for Box<W> {
    fn id(&self) -> &str {
        (**self).id()
    }

    fn write_duty(&mut self, percent: f64) -> Result<(), ActuatorError> {
        (**self).write_duty(percent)
    }

    fn read_duty(&mut self) -> Option<f64> {
        (**self).read_duty()
    }

    fn acquire(&mut self) -> Result<(), ActuatorError> {
        (**self).acquire()
    }

    fn release(&mut self) -> Result<(), ActuatorError> {
        (**self).release()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActuatorState {
    pub current_duty: f64,
    pub last_applied_at: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct ActuatorConfig {
    pub max_duty_change_per_tick: f64,
    pub write_timeout: Duration,
    /// Assumed duty when the writer cannot report one.
    pub initial_duty: f64,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            max_duty_change_per_tick: 10.0,
            write_timeout: Duration::from_millis(500),
            initial_duty: 50.0,
        }
    }
}

/// Slew-limited duty output.
///
/// `state` only ever reflects a duty the writer confirmed. A write that timed
/// out may still land later, so until the next confirmed write the slew
/// window is bounded against both the confirmed and the unconfirmed duty.
pub struct FanActuator {
    id: String,
    config: ActuatorConfig,
    state: ActuatorState,
    unconfirmed: Option<f64>,
    worker: Worker<Box<dyn DutyWriter>>,
}

impl FanActuator {
    pub fn new(mut writer: Box<dyn DutyWriter>, config: ActuatorConfig) -> Result<Self, ConfigError> {
        let id = writer.id().to_string();
        let current_duty = writer
            .read_duty()
            .filter(|d| d.is_finite())
            .map(|d| d.clamp(0.0, 100.0))
            .unwrap_or(config.initial_duty);
        let worker = Worker::spawn(format!("fan-{id}"), writer).map_err(|e| ConfigError::Spawn {
            name: format!("fan-{id}"),
            reason: e.to_string(),
        })?;
        Ok(Self {
            id,
            config,
            state: ActuatorState {
                current_duty,
                last_applied_at: None,
            },
            unconfirmed: None,
            worker,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ActuatorState {
        self.state
    }

    pub fn current_duty(&self) -> f64 {
        self.state.current_duty
    }

    /// Duty of a timed-out write that may or may not have reached the fan.
    pub fn unconfirmed_duty(&self) -> Option<f64> {
        self.unconfirmed
    }

    /// Moves toward `target_duty` by at most one slew step.
    pub fn apply(&mut self, target_duty: f64) -> Result<(), ActuatorError> {
        let target = checked_target(target_duty)?;
        if self.unconfirmed.is_some() {
            self.resync();
        }
        let step = self.config.max_duty_change_per_tick;
        let current = self.state.current_duty;
        let (mut lo, mut hi) = (current - step, current + step);
        if let Some(pending) = self.unconfirmed {
            // Empty after a timed-out force; the confirmed window then wins.
            if (pending - current).abs() <= step {
                lo = lo.max(pending - step);
                hi = hi.min(pending + step);
            }
        }
        self.write(target.clamp(lo, hi).clamp(0.0, 100.0))
    }

    /// Writes `duty` immediately, bypassing the slew limit.
    pub fn force(&mut self, duty: f64) -> Result<(), ActuatorError> {
        let duty = checked_target(duty)?;
        self.write(duty)
    }

    pub fn acquire(&mut self) -> Result<(), ActuatorError> {
        self.call(|w| w.acquire())
    }

    pub fn release(&mut self) -> Result<(), ActuatorError> {
        self.call(|w| w.release())
    }

    fn write(&mut self, duty: f64) -> Result<(), ActuatorError> {
        match self.call(move |w| w.write_duty(duty)) {
            Ok(()) => {
                self.unconfirmed = None;
                self.state = ActuatorState {
                    current_duty: duty,
                    last_applied_at: Some(Instant::now()),
                };
                Ok(())
            }
            Err(e) => {
                if matches!(e, ActuatorError::Timeout { .. }) {
                    self.unconfirmed = Some(duty);
                }
                Err(e)
            }
        }
    }

    /// Adopts the hardware duty once the writer answers again.
    fn resync(&mut self) {
        if let Ok(Some(duty)) = self.call(|w| Ok(w.read_duty())) {
            if duty.is_finite() {
                log::debug!("fan {} resynced at {:.1}% after a timed-out write", self.id, duty);
                self.state.current_duty = duty.clamp(0.0, 100.0);
                self.unconfirmed = None;
            }
        }
    }

    fn call<R, F>(&self, f: F) -> Result<R, ActuatorError>
    where
        R: Send + 'static,
        F: FnOnce(&mut Box<dyn DutyWriter>) -> Result<R, ActuatorError> + Send + 'static,
    {
        let timeout = self.config.write_timeout;
        match self.worker.call(timeout, f) {
            Ok(result) => result,
            Err(WorkerError::Busy) => Err(ActuatorError::Busy),
            Err(WorkerError::TimedOut) => Err(ActuatorError::Timeout { after: timeout }),
            Err(WorkerError::Gone) => Err(ActuatorError::Unavailable {
                reason: format!("writer worker for {} exited", self.id),
            }),
        }
    }
}

fn checked_target(target: f64) -> Result<f64, ActuatorError> {
    if target.is_finite() {
        Ok(target.clamp(0.0, 100.0))
    } else {
        Err(ActuatorError::InvalidTarget { target })
    }
}
