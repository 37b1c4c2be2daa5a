#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use weekly_trader::pipeline::types::{
    AccountSnapshot, ActionKind, ActionResult, Candidate, DirectedAction, MetricRecord, RunOutcome,
};
use weekly_trader::pipeline::{
    AccountSource, ActionExecutor, AnalysisStage, DecisionStage, Pipeline, ResearchStage, StageError,
    StageResult,
};

#[derive(Default)]
pub struct Calls {
    pub account: AtomicUsize,
    pub research: AtomicUsize,
    pub analysis: AtomicUsize,
    pub decision: AtomicUsize,
    pub execution: AtomicUsize,
}

impl Calls {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub fn candidate(id: &str) -> Candidate {
    Candidate {
        name: format!("{} Corp", id),
        subject_id: id.to_string(),
        rationale: "momentum".to_string(),
        summary: "beat estimates".to_string(),
    }
}

pub fn action(id: &str, kind: ActionKind, quantity: u32) -> DirectedAction {
    DirectedAction::new(id, kind, quantity, "test", 0.7).unwrap()
}

pub struct FakeAccount {
    pub calls: Arc<Calls>,
    pub open: bool,
    pub fail: bool,
}

#[async_trait]
impl AccountSource for FakeAccount {
    async fn status(&self) -> StageResult<AccountSnapshot> {
        self.calls.account.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(StageError::retriable("account unavailable"));
        }
        Ok(AccountSnapshot {
            is_market_open: self.open,
            available_capital: 10_000.0,
            portfolio_value: 25_000.0,
            ..AccountSnapshot::default()
        })
    }
}

pub struct FakeResearch {
    pub calls: Arc<Calls>,
    pub result: StageResult<Vec<Candidate>>,
}

#[async_trait]
impl ResearchStage for FakeResearch {
    async fn discover(&self) -> StageResult<Vec<Candidate>> {
        self.calls.research.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

pub struct FakeAnalysis {
    pub calls: Arc<Calls>,
    pub fail: bool,
}

#[async_trait]
impl AnalysisStage for FakeAnalysis {
    async fn enrich(&self, candidates: &[Candidate]) -> StageResult<Vec<MetricRecord>> {
        self.calls.analysis.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(StageError::retriable("unparseable analysis"));
        }
        Ok(candidates
            .iter()
            .map(|c| MetricRecord {
                subject_id: c.subject_id.clone(),
                pe_ratio: Some(20.0),
                ..MetricRecord::default()
            })
            .collect())
    }
}

pub struct FakeDecision {
    pub calls: Arc<Calls>,
    pub result: StageResult<Vec<DirectedAction>>,
    /// Candidate count seen by the last call.
    pub seen_candidates: AtomicUsize,
    pub seen_metrics: AtomicUsize,
}

#[async_trait]
impl DecisionStage for FakeDecision {
    async fn decide(
        &self,
        candidates: &[Candidate],
        metrics: &[MetricRecord],
        _account: &AccountSnapshot,
    ) -> StageResult<Vec<DirectedAction>> {
        self.calls.decision.fetch_add(1, Ordering::SeqCst);
        self.seen_candidates.store(candidates.len(), Ordering::SeqCst);
        self.seen_metrics.store(metrics.len(), Ordering::SeqCst);
        self.result.clone()
    }
}

/// Fails (via `Err`) for subjects in `fail_with_error` and reports an
/// unsuccessful result for `reject`. Records call order.
pub struct FakeExecutor {
    pub calls: Arc<Calls>,
    pub fail_with_error: HashSet<String>,
    pub reject: HashSet<String>,
    pub order: Mutex<Vec<String>>,
}

#[async_trait]
impl ActionExecutor for FakeExecutor {
    async fn apply(&self, action: &DirectedAction) -> anyhow::Result<ActionResult> {
        self.calls.execution.fetch_add(1, Ordering::SeqCst);
        self.order.lock().unwrap().push(action.subject_id().to_string());
        if self.fail_with_error.contains(action.subject_id()) {
            anyhow::bail!("insufficient buying power");
        }
        if self.reject.contains(action.subject_id()) {
            return Ok(ActionResult::failure(action, "rejected by broker"));
        }
        Ok(ActionResult::success(action, Some(100.0), Some(format!("order-{}", action.subject_id()))))
    }
}

/// Pipeline that replays a script of outcomes, then repeats the last one.
pub struct ScriptedPipeline {
    pub runs: AtomicUsize,
    script: Mutex<VecDeque<Scripted>>,
    last: Mutex<Option<RunOutcome>>,
}

pub enum Scripted {
    Outcome(RunOutcome),
    Panic,
}

impl ScriptedPipeline {
    pub fn new(script: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            runs: AtomicUsize::new(0),
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
        })
    }

    pub fn outcomes(outcomes: Vec<RunOutcome>) -> Arc<Self> {
        Self::new(outcomes.into_iter().map(Scripted::Outcome).collect())
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Pipeline for ScriptedPipeline {
    async fn run_once(&self) -> RunOutcome {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Outcome(o)) => {
                *self.last.lock().unwrap() = Some(o.clone());
                o
            }
            Some(Scripted::Panic) => panic!("adapter exploded"),
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(RunOutcome::empty),
        }
    }
}

/// Pipeline that blocks until released, to hold the in-flight guard.
pub struct GatedPipeline {
    pub started: Notify,
    pub release: Notify,
    pub runs: AtomicUsize,
}

impl GatedPipeline {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            started: Notify::new(),
            release: Notify::new(),
            runs: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Pipeline for GatedPipeline {
    async fn run_once(&self) -> RunOutcome {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        self.release.notified().await;
        RunOutcome::empty()
    }
}
