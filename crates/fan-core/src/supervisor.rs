use crate::reading::AggregatedTemperature;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    #[default]
    Normal,
    /// Fewer valid sources than required, or a short run of blind ticks.
    Degraded,
    /// Blind for too long: fail-safe duty is forced until recovery.
    FailSafe,
}

/// What the loop should do with this tick's aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    FollowCurve,
    ForceFailSafe,
}

/// Escalates runs of fully degraded ticks to the fail-safe duty.
#[derive(Debug, Clone)]
pub struct FailSafeSupervisor {
    state: SupervisorState,
    escalate_after: u32,
    recovery_ticks: u32,
    blind_streak: u32,
    seeing_streak: u32,
}

impl FailSafeSupervisor {
    /// Escalates on the tick after `escalate_after` consecutive fully
    /// degraded ticks, and stands down after `recovery_ticks` consecutive
    /// ticks with at least one contributing source.
    pub fn new(escalate_after: u32, recovery_ticks: u32) -> Self {
        Self {
            state: SupervisorState::Normal,
            escalate_after,
            recovery_ticks: recovery_ticks.max(1),
            blind_streak: 0,
            seeing_streak: 0,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn blind_streak(&self) -> u32 {
        self.blind_streak
    }

    pub fn observe(&mut self, aggregate: &AggregatedTemperature) -> Directive {
        if aggregate.is_fully_degraded() {
            self.blind_streak = self.blind_streak.saturating_add(1);
            self.seeing_streak = 0;
        } else {
            self.seeing_streak = self.seeing_streak.saturating_add(1);
            self.blind_streak = 0;
        }

        let next = match self.state {
            SupervisorState::FailSafe if self.seeing_streak < self.recovery_ticks => {
                SupervisorState::FailSafe
            }
            _ if self.blind_streak > self.escalate_after => SupervisorState::FailSafe,
            _ if aggregate.degraded => SupervisorState::Degraded,
            _ => SupervisorState::Normal,
        };

        if next != self.state {
            match next {
                SupervisorState::FailSafe => log::error!(
                    "no usable sensor for {} ticks, forcing fail-safe duty",
                    self.blind_streak
                ),
                _ if self.state == SupervisorState::FailSafe => {
                    log::warn!("sensors recovered, leaving fail-safe")
                }
                SupervisorState::Degraded => log::warn!(
                    "aggregation degraded ({} contributing sources)",
                    aggregate.contributing_sources.len()
                ),
                SupervisorState::Normal => log::info!("aggregation healthy"),
            }
            self.state = next;
        }

        match self.state {
            SupervisorState::FailSafe => Directive::ForceFailSafe,
            _ => Directive::FollowCurve,
        }
    }
}
