use super::chat::ChatModel;
use super::reply::parse_reply;
use crate::pipeline::types::Candidate;
use crate::pipeline::{ResearchStage, StageError, StageResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

const SYSTEM: &str = "You are a financial research analyst providing investment \
recommendations based on current news and market analysis. Always respond with valid JSON.";

#[derive(Debug, Deserialize)]
struct PicksReply {
    picks: Vec<Pick>,
}

#[derive(Debug, Deserialize)]
struct Pick {
    company: String,
    ticker: String,
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    news_summary: String,
}

/// Research stage: asks a chat model for a short list of candidates from recent news.
pub struct NewsResearcher {
    model: Arc<dyn ChatModel>,
    pick_count: usize,
}

impl NewsResearcher {
    pub fn new(model: Arc<dyn ChatModel>, pick_count: usize) -> Self {
        Self { model, pick_count }
    }

    fn prompt(&self) -> String {
        format!(
            r#"Review recent news and current market happenings and identify {n} promising
publicly traded companies for potential investment (positive momentum, earnings beats,
upgrades, industry tailwinds, product launches, undervalued opportunities).

Return ONLY a JSON object:
{{
  "picks": [
    {{
      "company": "Company Name",
      "ticker": "TICK",
      "rationale": "Why this is a good investment",
      "news_summary": "Recent news driving this recommendation"
    }}
  ]
}}"#,
            n = self.pick_count
        )
    }
}

pub(crate) fn parse_candidates(reply: &str) -> StageResult<Vec<Candidate>> {
    let parsed: PicksReply = parse_reply(reply)?;
    let candidates: Vec<Candidate> = parsed
        .picks
        .into_iter()
        .filter(|p| !p.ticker.trim().is_empty())
        .map(|p| Candidate {
            name: p.company,
            subject_id: p.ticker.trim().to_uppercase(),
            rationale: p.rationale,
            summary: p.news_summary,
        })
        .collect();
    if candidates.is_empty() {
        return Err(StageError::retriable("research returned no candidates"));
    }
    Ok(candidates)
}

#[async_trait]
impl ResearchStage for NewsResearcher {
    async fn discover(&self) -> StageResult<Vec<Candidate>> {
        let reply = self.model.complete(SYSTEM, &self.prompt(), true).await?;
        parse_candidates(&reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_candidates_normalizes_tickers() {
        let reply = r#"{"picks": [
            {"company": "NVIDIA", "ticker": " nvda ", "rationale": "AI demand", "news_summary": "Record revenue"},
            {"company": "Nameless", "ticker": "", "rationale": "", "news_summary": ""}
        ]}"#;
        let candidates = parse_candidates(reply).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].subject_id, "NVDA");
        assert_eq!(candidates[0].name, "NVIDIA");
    }

    #[test]
    fn test_no_picks_is_a_stage_error() {
        let err = parse_candidates(r#"{"picks": []}"#).unwrap_err();
        assert!(err.retriable);
    }
}
