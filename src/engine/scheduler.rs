use super::schedule::Cadence;
use super::state::{transition, ScheduleDecision, SchedulerState, Trigger};
use crate::pipeline::types::{RunOutcome, Stage};
use crate::pipeline::Pipeline;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};

/// What a single `tick` did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickReport {
    /// Nothing due.
    Idle,
    /// Another run holds the in-flight guard.
    Busy,
    /// A trigger is due but the market-closed recheck interval has not elapsed.
    Deferred { until: DateTime<Utc> },
    Ran { trigger: Trigger, outcome: RunOutcome },
}

/// Owns the scheduler state machine and serializes every pipeline run.
pub struct SchedulingEngine {
    pipeline: Arc<dyn Pipeline>,
    cadence: Cadence,
    state: Mutex<SchedulerState>,
    in_flight: tokio::sync::Mutex<()>,
}

impl SchedulingEngine {
    /// Start in `AwaitingWeeklyWindow` with the first window at or after `now`.
    pub fn new(pipeline: Arc<dyn Pipeline>, cadence: Cadence, now: DateTime<Utc>) -> Self {
        let first = cadence.weekly.first_at_or_after(now);
        tracing::info!(
            next_window = %first,
            weekday = %cadence.weekly.weekday,
            time = %cadence.weekly.time,
            timezone = %cadence.weekly.tz,
            "scheduler initialized"
        );
        Self {
            pipeline,
            cadence,
            state: Mutex::new(SchedulerState::new(first)),
            in_flight: tokio::sync::Mutex::new(()),
        }
    }

    pub fn current_state(&self) -> SchedulerState {
        self.lock_state().clone()
    }

    pub async fn tick(&self) -> TickReport {
        self.tick_at(Utc::now()).await
    }

    /// Evaluate the clock once. Runs the pipeline at most once per call.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickReport {
        let Ok(_guard) = self.in_flight.try_lock() else {
            tracing::debug!("run in flight, skipping tick");
            return TickReport::Busy;
        };

        let trigger = {
            let mut state = self.lock_state();
            let (next, superseded) = state.clone().supersede_stale_retry(now);
            *state = next;
            if let Some(decision) = superseded {
                log_decision(&decision);
            }
            if let Some(until) = state.deferred_until(now) {
                return TickReport::Deferred { until };
            }
            match state.due_trigger(now) {
                Some(t) => t,
                None => return TickReport::Idle,
            }
        };

        let outcome = self.execute(trigger).await;
        self.apply(trigger, &outcome, now);
        TickReport::Ran { trigger, outcome }
    }

    /// Run the pipeline now, bypassing the window and retry gating.
    /// Waits for any run already in flight. Only `last_run_outcome` changes.
    pub async fn run_immediately(&self) -> RunOutcome {
        let _guard = self.in_flight.lock().await;
        tracing::info!("manual run requested");
        let outcome = self.execute(Trigger::Manual).await;
        self.apply(Trigger::Manual, &outcome, Utc::now());
        outcome
    }

    async fn execute(&self, trigger: Trigger) -> RunOutcome {
        tracing::info!(trigger = ?trigger, "pipeline run starting");
        let outcome = match AssertUnwindSafe(self.pipeline.run_once()).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                let reason = format!("pipeline aborted: {}", panic_message(panic.as_ref()));
                tracing::error!(trigger = ?trigger, error = %reason, "pipeline run aborted");
                RunOutcome::stage_failed(Stage::Unclassified, reason, true)
            }
        };
        tracing::info!(
            trigger = ?trigger,
            status = ?outcome.status,
            actions = outcome.executed_actions.len(),
            failed = outcome.failed_actions(),
            "pipeline run finished"
        );
        outcome
    }

    fn apply(&self, trigger: Trigger, outcome: &RunOutcome, now: DateTime<Utc>) {
        let mut state = self.lock_state();
        let t = transition(state.clone(), trigger, outcome, &self.cadence, now);
        if let Some(fault) = &t.fault {
            tracing::error!(error = %fault, "scheduling fault, falling back to weekly cadence");
        }
        for decision in &t.decisions {
            log_decision(decision);
        }
        *state = t.state;
    }

    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        // State is only replaced wholesale, so a poisoned value is still consistent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn log_decision(decision: &ScheduleDecision) {
    match decision {
        ScheduleDecision::Deferred { recheck_after } => {
            tracing::info!(recheck_after = %recheck_after, "deferred: market closed, window kept");
        }
        ScheduleDecision::WindowAdvanced { from, to } => {
            tracing::info!(from = %from, to = %to, "window advanced");
        }
        ScheduleDecision::RetryArmed { fire_at } => {
            tracing::warn!(fire_at = %fire_at, "retry armed");
        }
        ScheduleDecision::RetryCleared => {
            tracing::info!("retry cleared, back to weekly cadence");
        }
        ScheduleDecision::RetrySuperseded { fire_at } => {
            tracing::warn!(fire_at = %fire_at, "retry superseded by weekly window");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
