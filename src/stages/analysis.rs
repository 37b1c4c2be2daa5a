use super::chat::ChatModel;
use super::reply::{lenient_f64, parse_reply};
use crate::pipeline::types::{Candidate, MetricRecord};
use crate::pipeline::{AnalysisStage, StageResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

const SYSTEM: &str = "You are a financial analyst specializing in fundamental analysis. \
Always respond with valid JSON.";

#[derive(Debug, Deserialize)]
struct FundamentalsReply {
    fundamentals: Vec<Fundamentals>,
}

#[derive(Debug, Deserialize)]
struct Fundamentals {
    ticker: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    pe_ratio: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    cash_flow: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    revenue: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    market_cap: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    debt_to_equity: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    earnings_growth: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    dividend_yield: Option<f64>,
    #[serde(default)]
    additional_metrics: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default)]
    analysis_notes: Option<String>,
}

/// Analysis stage: fundamental metrics for each candidate.
pub struct FundamentalAnalyst {
    model: Arc<dyn ChatModel>,
}

impl FundamentalAnalyst {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }
}

fn prompt(candidates: &[Candidate]) -> String {
    let input = serde_json::json!({ "companies": candidates });
    format!(
        r#"You have received the following companies selected for potential investment:

{input}

For each company provide: P/E ratio, operating cash flow (millions), annual revenue
(millions), market cap (billions), debt-to-equity, YoY earnings growth (percent),
dividend yield, any additional relevant metrics, and notes connecting the fundamentals
to the news and rationale. Use your best estimates where exact figures are unknown.

Return ONLY a JSON object:
{{
  "fundamentals": [
    {{
      "company": "Company Name",
      "ticker": "TICK",
      "pe_ratio": 25.5,
      "cash_flow": 5000,
      "revenue": 50000,
      "market_cap": 200,
      "debt_to_equity": 0.5,
      "earnings_growth": 15.5,
      "dividend_yield": 1.2,
      "additional_metrics": {{"metric_name": "value"}},
      "analysis_notes": "How fundamentals relate to the thesis"
    }}
  ]
}}"#,
        input = serde_json::to_string_pretty(&input).unwrap_or_default()
    )
}

pub(crate) fn parse_metrics(reply: &str) -> StageResult<Vec<MetricRecord>> {
    let parsed: FundamentalsReply = parse_reply(reply)?;
    Ok(parsed
        .fundamentals
        .into_iter()
        .map(|f| MetricRecord {
            subject_id: f.ticker.trim().to_uppercase(),
            pe_ratio: f.pe_ratio,
            cash_flow: f.cash_flow,
            revenue: f.revenue,
            market_cap: f.market_cap,
            debt_to_equity: f.debt_to_equity,
            earnings_growth: f.earnings_growth,
            dividend_yield: f.dividend_yield,
            additional: f.additional_metrics.unwrap_or_default(),
            notes: f.analysis_notes.unwrap_or_default(),
        })
        .collect())
}

#[async_trait]
impl AnalysisStage for FundamentalAnalyst {
    async fn enrich(&self, candidates: &[Candidate]) -> StageResult<Vec<MetricRecord>> {
        let reply = self.model.complete(SYSTEM, &prompt(candidates), false).await?;
        let metrics = parse_metrics(&reply)?;
        for m in &metrics {
            tracing::debug!(subject = %m.subject_id, pe_ratio = ?m.pe_ratio, earnings_growth = ?m.earnings_growth, "metrics");
        }
        Ok(metrics)
    }
}
