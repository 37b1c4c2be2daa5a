pub mod aggregator;
pub mod types;

use async_trait::async_trait;
use thiserror::Error;
use types::{AccountSnapshot, ActionResult, Candidate, DirectedAction, MetricRecord, RunOutcome};

pub use aggregator::RunAggregator;

/// Failure reported by a stage adapter. `retriable` is false for quota/rate-limit
/// class errors, where another attempt cannot succeed until someone fixes billing.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct StageError {
    pub message: String,
    pub retriable: bool,
}

impl StageError {
    pub fn retriable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retriable: true,
        }
    }

    pub fn non_retriable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retriable: false,
        }
    }
}

impl From<anyhow::Error> for StageError {
    fn from(e: anyhow::Error) -> Self {
        Self::retriable(format!("{:#}", e))
    }
}

pub type StageResult<T> = std::result::Result<T, StageError>;

#[async_trait]
pub trait AccountSource: Send + Sync {
    async fn status(&self) -> StageResult<AccountSnapshot>;
}

#[async_trait]
pub trait ResearchStage: Send + Sync {
    async fn discover(&self) -> StageResult<Vec<Candidate>>;
}

#[async_trait]
pub trait AnalysisStage: Send + Sync {
    async fn enrich(&self, candidates: &[Candidate]) -> StageResult<Vec<MetricRecord>>;
}

#[async_trait]
pub trait DecisionStage: Send + Sync {
    async fn decide(
        &self,
        candidates: &[Candidate],
        metrics: &[MetricRecord],
        account: &AccountSnapshot,
    ) -> StageResult<Vec<DirectedAction>>;
}

/// Carries out one action. An `Err` is recorded against that action only.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn apply(&self, action: &DirectedAction) -> anyhow::Result<ActionResult>;
}

/// One full pipeline attempt, as seen by the scheduler.
#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn run_once(&self) -> RunOutcome;
}

#[async_trait]
impl Pipeline for RunAggregator {
    async fn run_once(&self) -> RunOutcome {
        RunAggregator::run_once(self).await
    }
}
