use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// Normalized internal types threaded between pipeline stages (provider-agnostic).

/// Broker account as seen at the start of a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AccountSnapshot {
    pub is_market_open: bool,
    pub available_capital: f64,
    pub portfolio_value: f64,
    pub holdings: BTreeMap<String, Holding>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Holding {
    pub quantity: f64,
    pub market_value: f64,
    pub avg_entry_price: f64,
    pub current_price: f64,
    pub unrealized_pl: f64,
}

/// One item surfaced by the research stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub name: String,
    pub subject_id: String,
    pub rationale: String,
    pub summary: String,
}

/// Metrics the analysis stage attached to one candidate. Any figure may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub subject_id: String,
    pub pe_ratio: Option<f64>,
    pub cash_flow: Option<f64>,
    pub revenue: Option<f64>,
    pub market_cap: Option<f64>,
    pub debt_to_equity: Option<f64>,
    pub earnings_growth: Option<f64>,
    pub dividend_yield: Option<f64>,
    #[serde(default)]
    pub additional: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    Acquire,
    Release,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Acquire => write!(f, "ACQUIRE"),
            ActionKind::Release => write!(f, "RELEASE"),
        }
    }
}

/// One instruction produced by the decision stage. Fields are private so the
/// quantity and confidence bounds hold for every value that exists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectedAction {
    subject_id: String,
    kind: ActionKind,
    quantity: u32,
    rationale: String,
    confidence: f64,
}

impl DirectedAction {
    /// Returns `None` for a zero quantity. Confidence is clamped to [0, 1].
    pub fn new(
        subject_id: impl Into<String>,
        kind: ActionKind,
        quantity: u32,
        rationale: impl Into<String>,
        confidence: f64,
    ) -> Option<Self> {
        if quantity == 0 {
            return None;
        }
        let confidence = if confidence.is_nan() { 0.0 } else { confidence.clamp(0.0, 1.0) };
        Some(Self {
            subject_id: subject_id.into(),
            kind,
            quantity,
            rationale: rationale.into(),
            confidence,
        })
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    pub fn rationale(&self) -> &str {
        &self.rationale
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }
}

/// Outcome of attempting one DirectedAction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionResult {
    pub subject_id: String,
    pub kind: ActionKind,
    pub quantity: u32,
    pub unit_price: Option<f64>,
    pub succeeded: bool,
    pub failure_reason: Option<String>,
    pub order_id: Option<String>,
}

impl ActionResult {
    pub fn success(action: &DirectedAction, unit_price: Option<f64>, order_id: Option<String>) -> Self {
        Self {
            subject_id: action.subject_id().to_string(),
            kind: action.kind(),
            quantity: action.quantity(),
            unit_price,
            succeeded: true,
            failure_reason: None,
            order_id,
        }
    }

    pub fn failure(action: &DirectedAction, reason: impl Into<String>) -> Self {
        Self {
            subject_id: action.subject_id().to_string(),
            kind: action.kind(),
            quantity: action.quantity(),
            unit_price: None,
            succeeded: false,
            failure_reason: Some(reason.into()),
            order_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Account,
    Research,
    Analysis,
    Decision,
    /// Failure that escaped the pipeline without naming a stage (panic, aborted task).
    Unclassified,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Account => "account",
            Stage::Research => "research",
            Stage::Analysis => "analysis",
            Stage::Decision => "decision",
            Stage::Unclassified => "unclassified",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RunStatus {
    /// Precondition gate: nothing beyond the account query ran.
    MarketClosed,
    StageFailed {
        stage: Stage,
        reason: String,
        retriable: bool,
    },
    Completed {
        all_actions_succeeded: bool,
    },
    /// Every stage ran but the decision stage produced no actions.
    Empty,
}

/// How the scheduler should read a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Deferred,
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub executed_actions: Vec<ActionResult>,
    pub timestamp: DateTime<Utc>,
}

impl RunOutcome {
    pub fn market_closed() -> Self {
        Self::with_status(RunStatus::MarketClosed)
    }

    pub fn empty() -> Self {
        Self::with_status(RunStatus::Empty)
    }

    pub fn stage_failed(stage: Stage, reason: impl Into<String>, retriable: bool) -> Self {
        Self::with_status(RunStatus::StageFailed {
            stage,
            reason: reason.into(),
            retriable,
        })
    }

    /// Fold per-action results into a completed run.
    pub fn completed(executed_actions: Vec<ActionResult>) -> Self {
        let all_actions_succeeded = executed_actions.iter().all(|r| r.succeeded);
        Self {
            status: RunStatus::Completed { all_actions_succeeded },
            executed_actions,
            timestamp: Utc::now(),
        }
    }

    fn with_status(status: RunStatus) -> Self {
        Self {
            status,
            executed_actions: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn verdict(&self) -> Verdict {
        match self.status {
            RunStatus::MarketClosed => Verdict::Deferred,
            RunStatus::Empty
            | RunStatus::Completed {
                all_actions_succeeded: true,
            } => Verdict::Success,
            RunStatus::Completed {
                all_actions_succeeded: false,
            }
            | RunStatus::StageFailed { .. } => Verdict::Failure,
        }
    }

    pub fn failed_actions(&self) -> usize {
        self.executed_actions.iter().filter(|r| !r.succeeded).count()
    }
}
