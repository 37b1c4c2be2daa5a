use super::types::{ActionResult, DirectedAction, RunOutcome, Stage};
use super::{AccountSource, ActionExecutor, AnalysisStage, DecisionStage, ResearchStage, StageError};
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;

/// Runs one pipeline attempt: account gate, research -> analysis -> decision,
/// then per-action execution folded into a single `RunOutcome`.
///
/// Holds no state between calls. Retry policy lives in the scheduler.
pub struct RunAggregator {
    account: Arc<dyn AccountSource>,
    research: Arc<dyn ResearchStage>,
    analysis: Arc<dyn AnalysisStage>,
    decision: Arc<dyn DecisionStage>,
    executor: Arc<dyn ActionExecutor>,
}

impl RunAggregator {
    pub fn new(
        account: Arc<dyn AccountSource>,
        research: Arc<dyn ResearchStage>,
        analysis: Arc<dyn AnalysisStage>,
        decision: Arc<dyn DecisionStage>,
        executor: Arc<dyn ActionExecutor>,
    ) -> Self {
        Self {
            account,
            research,
            analysis,
            decision,
            executor,
        }
    }

    pub async fn run_once(&self) -> RunOutcome {
        tracing::info!(stage = %Stage::Account, "checking market status and account");
        let account = match self.account.status().await {
            Ok(a) => a,
            Err(e) => return stage_failed(Stage::Account, e),
        };
        if !account.is_market_open {
            tracing::info!("market is closed, deferring run");
            return RunOutcome::market_closed();
        }
        tracing::info!(
            available_capital = account.available_capital,
            portfolio_value = account.portfolio_value,
            holdings = account.holdings.len(),
            "account snapshot loaded"
        );

        tracing::info!(stage = %Stage::Research, "stage started");
        let candidates = match self.research.discover().await {
            Ok(c) => c,
            Err(e) => return stage_failed(Stage::Research, e),
        };
        for c in &candidates {
            tracing::info!(stage = %Stage::Research, subject = %c.subject_id, name = %c.name, "candidate");
        }
        tracing::info!(stage = %Stage::Research, candidates = candidates.len(), "stage completed");

        tracing::info!(stage = %Stage::Analysis, "stage started");
        let metrics = match self.analysis.enrich(&candidates).await {
            Ok(m) => m,
            Err(e) => return stage_failed(Stage::Analysis, e),
        };
        tracing::info!(stage = %Stage::Analysis, records = metrics.len(), "stage completed");

        tracing::info!(stage = %Stage::Decision, "stage started");
        let actions = match self.decision.decide(&candidates, &metrics, &account).await {
            Ok(a) => a,
            Err(e) => return stage_failed(Stage::Decision, e),
        };
        for a in &actions {
            tracing::info!(
                stage = %Stage::Decision,
                subject = %a.subject_id(),
                kind = %a.kind(),
                quantity = a.quantity(),
                confidence = a.confidence(),
                "directed action"
            );
        }
        tracing::info!(stage = %Stage::Decision, actions = actions.len(), "stage completed");

        if actions.is_empty() {
            tracing::info!("no actions to execute");
            return RunOutcome::empty();
        }

        // Sequential: actions share one capital pool.
        let results: Vec<ActionResult> = stream::iter(&actions)
            .then(|action| self.execute_isolated(action))
            .collect()
            .await;

        let outcome = RunOutcome::completed(results);
        tracing::info!(
            executed = outcome.executed_actions.len(),
            failed = outcome.failed_actions(),
            status = ?outcome.status,
            "run completed"
        );
        outcome
    }

    /// Execute one action; any error becomes a failed `ActionResult`.
    async fn execute_isolated(&self, action: &DirectedAction) -> ActionResult {
        let result = match self.executor.apply(action).await {
            Ok(r) => r,
            Err(e) => ActionResult::failure(action, format!("{:#}", e)),
        };
        if result.succeeded {
            tracing::info!(
                subject = %result.subject_id,
                kind = %result.kind,
                quantity = result.quantity,
                unit_price = ?result.unit_price,
                order_id = ?result.order_id,
                "action succeeded"
            );
        } else {
            tracing::error!(
                subject = %result.subject_id,
                kind = %result.kind,
                quantity = result.quantity,
                reason = result.failure_reason.as_deref().unwrap_or("unknown"),
                "action failed"
            );
        }
        result
    }
}

fn stage_failed(stage: Stage, e: StageError) -> RunOutcome {
    tracing::error!(
        stage = %stage,
        retriable = e.retriable,
        error = %e.message,
        "stage failed, aborting run"
    );
    RunOutcome::stage_failed(stage, e.message, e.retriable)
}
