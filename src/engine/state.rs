use super::schedule::Cadence;
use crate::pipeline::types::{RunOutcome, Verdict};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Mode {
    AwaitingWeeklyWindow,
    RetryArmed { fire_at: DateTime<Utc> },
}

/// What caused a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Trigger {
    WeeklyWindow { nominal: DateTime<Utc> },
    Retry { fire_at: DateTime<Utc> },
    Manual,
}

/// A scheduling decision worth a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleDecision {
    Deferred { recheck_after: DateTime<Utc> },
    WindowAdvanced { from: DateTime<Utc>, to: DateTime<Utc> },
    RetryArmed { fire_at: DateTime<Utc> },
    RetryCleared,
    RetrySuperseded { fire_at: DateTime<Utc> },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulingFault {
    #[error("retry already armed for {armed}, refusing to arm another for {requested}")]
    RetryAlreadyArmed {
        armed: DateTime<Utc>,
        requested: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerState {
    pub mode: Mode,
    /// Next weekly instant not yet serviced.
    pub next_window: DateTime<Utc>,
    /// Set after a market-closed deferral; nothing runs before it.
    pub recheck_after: Option<DateTime<Utc>>,
    pub last_run_outcome: Option<RunOutcome>,
}

/// Result of folding one run outcome into the state.
#[derive(Debug, Clone)]
pub struct Transition {
    pub state: SchedulerState,
    pub decisions: Vec<ScheduleDecision>,
    pub fault: Option<SchedulingFault>,
}

impl SchedulerState {
    pub fn new(next_window: DateTime<Utc>) -> Self {
        Self {
            mode: Mode::AwaitingWeeklyWindow,
            next_window,
            recheck_after: None,
            last_run_outcome: None,
        }
    }

    /// Drop an armed retry once the following weekly window is itself due.
    pub fn supersede_stale_retry(mut self, now: DateTime<Utc>) -> (Self, Option<ScheduleDecision>) {
        match self.mode {
            Mode::RetryArmed { fire_at } if now >= self.next_window => {
                self.mode = Mode::AwaitingWeeklyWindow;
                (self, Some(ScheduleDecision::RetrySuperseded { fire_at }))
            }
            _ => (self, None),
        }
    }

    pub fn deferred_until(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.recheck_after.filter(|r| now < *r)
    }

    /// The trigger that should run at `now`, if any.
    pub fn due_trigger(&self, now: DateTime<Utc>) -> Option<Trigger> {
        if self.deferred_until(now).is_some() {
            return None;
        }
        match self.mode {
            Mode::RetryArmed { fire_at } if now >= fire_at => Some(Trigger::Retry { fire_at }),
            Mode::RetryArmed { .. } => None,
            Mode::AwaitingWeeklyWindow if now >= self.next_window => Some(Trigger::WeeklyWindow {
                nominal: self.next_window,
            }),
            Mode::AwaitingWeeklyWindow => None,
        }
    }

    fn arm_retry(&mut self, fire_at: DateTime<Utc>) -> Result<(), SchedulingFault> {
        if let Mode::RetryArmed { fire_at: armed } = self.mode {
            return Err(SchedulingFault::RetryAlreadyArmed {
                armed,
                requested: fire_at,
            });
        }
        self.mode = Mode::RetryArmed { fire_at };
        Ok(())
    }
}

/// Fold the outcome of a run started by `trigger` into `state`.
pub fn transition(
    state: SchedulerState,
    trigger: Trigger,
    outcome: &RunOutcome,
    cadence: &Cadence,
    now: DateTime<Utc>,
) -> Transition {
    let mut state = state;
    let mut decisions = Vec::new();
    let mut fault = None;

    state.last_run_outcome = Some(outcome.clone());

    // Manual runs only record their outcome.
    if trigger == Trigger::Manual {
        return Transition { state, decisions, fault };
    }

    let verdict = outcome.verdict();
    if verdict == Verdict::Deferred {
        let recheck_after = now + cadence.closed_recheck;
        state.recheck_after = Some(recheck_after);
        decisions.push(ScheduleDecision::Deferred { recheck_after });
        return Transition { state, decisions, fault };
    }
    state.recheck_after = None;

    match trigger {
        Trigger::WeeklyWindow { nominal } => {
            let to = cadence.weekly.next_after(nominal, now);
            state.next_window = to;
            decisions.push(ScheduleDecision::WindowAdvanced { from: nominal, to });

            if verdict == Verdict::Failure {
                let fire_at = cadence.weekly.retry_after(nominal, now);
                match state.arm_retry(fire_at) {
                    Ok(()) => decisions.push(ScheduleDecision::RetryArmed { fire_at }),
                    Err(e) => {
                        state.mode = Mode::AwaitingWeeklyWindow;
                        fault = Some(e);
                    }
                }
            }
        }
        Trigger::Retry { .. } => {
            state.mode = Mode::AwaitingWeeklyWindow;
            decisions.push(ScheduleDecision::RetryCleared);
        }
        Trigger::Manual => {}
    }

    Transition { state, decisions, fault }
}
