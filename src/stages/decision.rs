use super::chat::ChatModel;
use super::reply::{lenient_f64, parse_reply};
use crate::pipeline::types::{AccountSnapshot, ActionKind, Candidate, DirectedAction, MetricRecord};
use crate::pipeline::{DecisionStage, StageResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

const SYSTEM: &str = "You are a quantitative investment analyst. Make data-driven decisions \
using specific metrics and numbers. Always respond with valid JSON.";

#[derive(Debug, Deserialize)]
struct DecisionsReply {
    decisions: Vec<Decision>,
    #[serde(default)]
    portfolio_risk_analysis: String,
}

#[derive(Debug, Deserialize)]
struct Decision {
    ticker: String,
    action: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    shares: Option<f64>,
    #[serde(default)]
    rationale: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    confidence: Option<f64>,
    #[serde(default)]
    risk_assessment: String,
}

/// Decision stage: turns candidates, metrics and the account into buy/sell actions.
pub struct QuantDecider {
    model: Arc<dyn ChatModel>,
    max_position_fraction: f64,
}

impl QuantDecider {
    pub fn new(model: Arc<dyn ChatModel>, max_position_fraction: f64) -> Self {
        Self {
            model,
            max_position_fraction,
        }
    }

    fn prompt(
        &self,
        candidates: &[Candidate],
        metrics: &[MetricRecord],
        account: &AccountSnapshot,
    ) -> String {
        let by_subject: HashMap<&str, &MetricRecord> =
            metrics.iter().map(|m| (m.subject_id.as_str(), m)).collect();
        let companies: Vec<serde_json::Value> = candidates
            .iter()
            .map(|c| {
                let mut entry = json!({
                    "company": c.name,
                    "ticker": c.subject_id,
                    "news_rationale": c.rationale,
                    "news_summary": c.summary,
                });
                if let Some(m) = by_subject.get(c.subject_id.as_str()) {
                    entry["fundamentals"] = json!(m);
                }
                entry
            })
            .collect();
        let input = json!({
            "companies": companies,
            "available_capital": account.available_capital,
            "current_positions": account.holdings,
        });

        format!(
            r#"INPUT DATA:
{input}

Analyse portfolio risk given current positions, evaluate each company quantitatively
(valuation, growth, leverage, catalyst strength, risk/reward) and decide what to BUY,
SELL or HOLD.

RULES:
- Available capital: ${capital:.2}
- Never put more than {pct:.0}% of available capital into one position
- Never invest more than available capital
- Never sell more shares than currently held
- Give whole share counts based on approximate current prices
- confidence is 0-1

Return ONLY a JSON object:
{{
  "decisions": [
    {{
      "company": "Company Name",
      "ticker": "TICK",
      "action": "BUY",
      "shares": 10,
      "rationale": "Quantitative reasoning",
      "confidence": 0.8,
      "risk_assessment": "Low/Medium/High with explanation"
    }}
  ],
  "portfolio_risk_analysis": "Overall portfolio risk after these trades"
}}"#,
            input = serde_json::to_string_pretty(&input).unwrap_or_default(),
            capital = account.available_capital,
            pct = self.max_position_fraction * 100.0,
        )
    }
}

pub(crate) fn parse_actions(reply: &str) -> StageResult<(Vec<DirectedAction>, String)> {
    let parsed: DecisionsReply = parse_reply(reply)?;
    let mut actions = Vec::new();
    for d in parsed.decisions {
        let kind = match d.action.trim().to_ascii_uppercase().as_str() {
            "BUY" => ActionKind::Acquire,
            "SELL" => ActionKind::Release,
            "HOLD" => continue,
            other => {
                tracing::warn!(ticker = %d.ticker, action = other, "ignoring unknown decision action");
                continue;
            }
        };
        let shares = d.shares.unwrap_or(0.0).floor();
        if !(shares >= 1.0 && shares <= u32::MAX as f64) {
            tracing::warn!(ticker = %d.ticker, shares = ?d.shares, "ignoring decision without a positive share count");
            continue;
        }
        let subject = d.ticker.trim().to_uppercase();
        tracing::debug!(ticker = %subject, risk = %d.risk_assessment, "decision risk");
        if let Some(action) = DirectedAction::new(
            subject,
            kind,
            shares as u32,
            d.rationale,
            d.confidence.unwrap_or(0.0),
        ) {
            actions.push(action);
        }
    }
    Ok((actions, parsed.portfolio_risk_analysis))
}

#[async_trait]
impl DecisionStage for QuantDecider {
    async fn decide(
        &self,
        candidates: &[Candidate],
        metrics: &[MetricRecord],
        account: &AccountSnapshot,
    ) -> StageResult<Vec<DirectedAction>> {
        let prompt = self.prompt(candidates, metrics, account);
        let reply = self.model.complete(SYSTEM, &prompt, false).await?;
        let (actions, risk) = parse_actions(&reply)?;
        if !risk.is_empty() {
            tracing::info!(analysis = %risk, "portfolio risk analysis");
        }
        Ok(actions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_actions_maps_and_filters() {
        let reply = r#"{
            "decisions": [
                {"company": "NVIDIA", "ticker": "NVDA", "action": "BUY", "shares": 10, "rationale": "growth", "confidence": 0.85, "risk_assessment": "Medium"},
                {"company": "Apple", "ticker": "aapl", "action": "sell", "shares": "5", "rationale": "trim", "confidence": 1.4, "risk_assessment": "Low"},
                {"company": "Acme", "ticker": "ACME", "action": "HOLD", "shares": 0, "rationale": "", "confidence": 0.5, "risk_assessment": ""},
                {"company": "Zero", "ticker": "ZERO", "action": "BUY", "shares": 0, "rationale": "", "confidence": 0.5, "risk_assessment": ""},
                {"company": "Neg", "ticker": "NEG", "action": "SELL", "shares": -3, "rationale": "", "confidence": 0.5, "risk_assessment": ""},
                {"company": "Odd", "ticker": "ODD", "action": "SHORT", "shares": 3, "rationale": "", "confidence": 0.5, "risk_assessment": ""}
            ],
            "portfolio_risk_analysis": "Concentrated in tech"
        }"#;
        let (actions, risk) = parse_actions(reply).unwrap();
        assert_eq!(risk, "Concentrated in tech");
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].subject_id(), "NVDA");
        assert_eq!(actions[0].kind(), ActionKind::Acquire);
        assert_eq!(actions[0].quantity(), 10);
        assert_eq!(actions[1].subject_id(), "AAPL");
        assert_eq!(actions[1].kind(), ActionKind::Release);
        assert_eq!(actions[1].confidence(), 1.0);
    }

    #[test]
    fn test_fractional_shares_round_down() {
        let reply = r#"{"decisions": [{"ticker": "X", "action": "BUY", "shares": 2.7}]}"#;
        let (actions, _) = parse_actions(reply).unwrap();
        assert_eq!(actions[0].quantity(), 2);
    }

    #[test]
    fn test_empty_decisions_parse() {
        let (actions, risk) = parse_actions(r#"{"decisions": []}"#).unwrap();
        assert!(actions.is_empty());
        assert!(risk.is_empty());
    }
}
