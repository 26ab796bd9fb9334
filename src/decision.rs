//! Decision aggregation
//!
//! The terminal stage: one deep-think invocation synthesizes every report
//! and transcript into a directional action, a sizing hint, and the
//! supporting rationale. Deterministic given the session contents; no
//! other external calls are made.

use crate::agents::{prompts, AgentInvoker, InvocationContext};
use crate::error::{CouncilError, Result};
use crate::memory::MemoryStore;
use crate::models::{AgentRole, Decision, MemoryCollection, ModelSelection, TradeAction};
use crate::reasoning::AgentReply;
use crate::session::Session;
use crate::tools::ToolRegistry;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

const DEFAULT_MAGNITUDE: f32 = 0.5;

/// Structured decision payload the judge may answer with directly.
#[derive(Debug, Deserialize)]
struct DecisionPayload {
    action: String,
    magnitude: Option<f32>,
    rationale: Option<String>,
}

pub struct DecisionAggregator {
    invoker: Arc<AgentInvoker>,
    memory: Arc<MemoryStore>,
    registry: Arc<ToolRegistry>,
}

impl DecisionAggregator {
    pub fn new(
        invoker: Arc<AgentInvoker>,
        memory: Arc<MemoryStore>,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            invoker,
            memory,
            registry,
        }
    }

    /// Produce the terminal decision for a session that has completed both
    /// debates.
    pub async fn decide(&self, session: &Session, models: &ModelSelection) -> Result<Decision> {
        let collection = MemoryCollection::RiskManager;
        let retrieved = self
            .memory
            .retrieve(
                collection,
                &prompts::situation_summary(session),
                self.memory.limit(),
                self.memory.alpha_for(collection),
            )
            .await;
        let memories = MemoryStore::format_matches(&retrieved);

        let toolset = self.registry.toolset_for(AgentRole::RiskJudge).await;
        let reply = self
            .invoker
            .invoke(InvocationContext {
                role: AgentRole::RiskJudge,
                model: models.for_role(AgentRole::RiskJudge),
                system_prompt: prompts::system_prompt(
                    AgentRole::RiskJudge,
                    &session.ticker,
                    session.trade_date,
                ),
                user_prompt: prompts::judge_prompt(session, &memories),
                toolset: &toolset,
            })
            .await?;

        let decision = parse_decision(&reply)?;
        info!(
            session_id = %session.session_id,
            action = %decision.action,
            magnitude = decision.magnitude,
            "decision aggregated"
        );
        Ok(decision)
    }
}

/// Extract the decision from the judge's reply: a structured JSON payload
/// when present, otherwise the transaction-proposal marker in the prose. A
/// reply with neither is malformed.
fn parse_decision(reply: &AgentReply) -> Result<Decision> {
    if let Some(payload) = extract_payload(&reply.text) {
        if let Some(action) = parse_action(&payload.action) {
            return Ok(Decision {
                action,
                magnitude: payload
                    .magnitude
                    .unwrap_or(DEFAULT_MAGNITUDE)
                    .clamp(0.0, 1.0),
                rationale: payload
                    .rationale
                    .unwrap_or_else(|| reply.text.clone()),
            });
        }
    }

    if let Some(action) = scan_proposal_marker(&reply.text) {
        return Ok(Decision {
            action,
            magnitude: DEFAULT_MAGNITUDE,
            rationale: reply.text.clone(),
        });
    }

    Err(CouncilError::Invocation {
        role: AgentRole::RiskJudge,
        reason: "reply carried no actionable decision".to_string(),
    })
}

fn extract_payload(text: &str) -> Option<DecisionPayload> {
    let start = text.find('{')?;
    let mut depth = 0;
    for (i, c) in text[start..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return serde_json::from_str(&text[start..start + i + 1]).ok();
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_action(raw: &str) -> Option<TradeAction> {
    match raw.trim().to_uppercase().as_str() {
        "BUY" => Some(TradeAction::Buy),
        "SELL" => Some(TradeAction::Sell),
        "HOLD" => Some(TradeAction::Hold),
        _ => None,
    }
}

/// Find the action in a `FINAL TRANSACTION PROPOSAL: **BUY/SELL/HOLD**`
/// marker; the first action word after the marker wins.
fn scan_proposal_marker(text: &str) -> Option<TradeAction> {
    let upper = text.to_uppercase();
    let position = upper.find("FINAL TRANSACTION PROPOSAL")?;
    let tail = &upper[position..];

    let candidates = [
        (tail.find("BUY"), TradeAction::Buy),
        (tail.find("SELL"), TradeAction::Sell),
        (tail.find("HOLD"), TradeAction::Hold),
    ];

    candidates
        .into_iter()
        .filter_map(|(pos, action)| pos.map(|p| (p, action)))
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, action)| action)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(text: &str) -> AgentReply {
        AgentReply {
            text: text.to_string(),
            tool_calls: Vec::new(),
            aligned: false,
        }
    }

    #[test]
    fn parses_structured_payload() {
        let decision = parse_decision(&reply(
            r#"{"action": "BUY", "magnitude": 0.7, "rationale": "momentum and earnings"}"#,
        ))
        .unwrap();
        assert_eq!(decision.action, TradeAction::Buy);
        assert!((decision.magnitude - 0.7).abs() < 1e-6);
        assert_eq!(decision.rationale, "momentum and earnings");
    }

    #[test]
    fn parses_proposal_marker() {
        let decision = parse_decision(&reply(
            "Risk outweighs reward here.\nFINAL TRANSACTION PROPOSAL: **SELL**",
        ))
        .unwrap();
        assert_eq!(decision.action, TradeAction::Sell);
        assert_eq!(decision.magnitude, DEFAULT_MAGNITUDE);
        assert!(decision.rationale.contains("Risk outweighs reward"));
    }

    #[test]
    fn marker_takes_first_action_word() {
        let decision = parse_decision(&reply(
            "FINAL TRANSACTION PROPOSAL: **HOLD** (not BUY yet)",
        ))
        .unwrap();
        assert_eq!(decision.action, TradeAction::Hold);
    }

    #[test]
    fn magnitude_is_clamped() {
        let decision = parse_decision(&reply(r#"{"action": "HOLD", "magnitude": 3.0}"#)).unwrap();
        assert_eq!(decision.magnitude, 1.0);
    }

    #[test]
    fn undecidable_reply_is_malformed() {
        let err = parse_decision(&reply("The outlook is nuanced.")).unwrap_err();
        assert!(matches!(err, CouncilError::Invocation { .. }));
    }
}
