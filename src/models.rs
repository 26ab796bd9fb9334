//! Core data model for the deliberation engine

use crate::error::ErrorKind;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

//
// ================= Roles =================
//

/// Closed set of agent roles. Every invocation, transcript turn, and tool
/// set is keyed by one of these variants; roles are never resolved from
/// strings at runtime.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    MarketAnalyst,
    SocialAnalyst,
    NewsAnalyst,
    FundamentalsAnalyst,
    Bull,
    Bear,
    Risky,
    Safe,
    Neutral,
    RiskJudge,
}

impl AgentRole {
    /// Analyst roles in their report order.
    pub const ANALYSTS: [AgentRole; 4] = [
        AgentRole::MarketAnalyst,
        AgentRole::SocialAnalyst,
        AgentRole::NewsAnalyst,
        AgentRole::FundamentalsAnalyst,
    ];

    pub fn is_analyst(&self) -> bool {
        Self::ANALYSTS.contains(self)
    }

    /// Memory collection this role reads from.
    pub fn memory_collection(&self) -> MemoryCollection {
        match self {
            AgentRole::Bull => MemoryCollection::BullResearcher,
            AgentRole::Bear => MemoryCollection::BearResearcher,
            AgentRole::Risky | AgentRole::Safe | AgentRole::Neutral | AgentRole::RiskJudge => {
                MemoryCollection::RiskManager
            }
            _ => MemoryCollection::Analyst,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::MarketAnalyst => "market_analyst",
            AgentRole::SocialAnalyst => "social_analyst",
            AgentRole::NewsAnalyst => "news_analyst",
            AgentRole::FundamentalsAnalyst => "fundamentals_analyst",
            AgentRole::Bull => "bull",
            AgentRole::Bear => "bear",
            AgentRole::Risky => "risky",
            AgentRole::Safe => "safe",
            AgentRole::Neutral => "neutral",
            AgentRole::RiskJudge => "risk_judge",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One precedent collection per role group. Collections are logically
/// isolated; a query against one never returns records from another.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCollection {
    BullResearcher,
    BearResearcher,
    Trader,
    Analyst,
    RiskManager,
}

impl MemoryCollection {
    pub const ALL: [MemoryCollection; 5] = [
        MemoryCollection::BullResearcher,
        MemoryCollection::BearResearcher,
        MemoryCollection::Trader,
        MemoryCollection::Analyst,
        MemoryCollection::RiskManager,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryCollection::BullResearcher => "bull_researcher",
            MemoryCollection::BearResearcher => "bear_researcher",
            MemoryCollection::Trader => "trader",
            MemoryCollection::Analyst => "analyst",
            MemoryCollection::RiskManager => "risk_manager",
        }
    }
}

impl fmt::Display for MemoryCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

//
// ================= Session Lifecycle =================
//

/// Session phases. Transitions are strictly forward; `Failed` is reachable
/// from any non-terminal phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    AnalystsRunning,
    ResearcherDebate,
    RiskDebate,
    Decided,
    Failed,
}

impl SessionStatus {
    /// Position in the forward phase order. `Failed` is terminal from
    /// anywhere and sorts last.
    pub fn rank(&self) -> u8 {
        match self {
            SessionStatus::Pending => 0,
            SessionStatus::AnalystsRunning => 1,
            SessionStatus::ResearcherDebate => 2,
            SessionStatus::RiskDebate => 3,
            SessionStatus::Decided => 4,
            SessionStatus::Failed => 5,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Decided | SessionStatus::Failed)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Pending => "pending",
            SessionStatus::AnalystsRunning => "analysts_running",
            SessionStatus::ResearcherDebate => "researcher_debate",
            SessionStatus::RiskDebate => "risk_debate",
            SessionStatus::Decided => "decided",
            SessionStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DebateKind {
    Researcher,
    Risk,
}

impl DebateKind {
    /// Fixed speaking order within one round.
    pub fn participants(&self) -> &'static [AgentRole] {
        match self {
            DebateKind::Researcher => &[AgentRole::Bull, AgentRole::Bear],
            DebateKind::Risk => &[AgentRole::Risky, AgentRole::Safe, AgentRole::Neutral],
        }
    }
}

impl fmt::Display for DebateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DebateKind::Researcher => "researcher",
            DebateKind::Risk => "risk",
        };
        write!(f, "{}", s)
    }
}

//
// ================= Session Request =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoundLimits {
    pub researcher: u32,
    pub risk: u32,
}

impl RoundLimits {
    pub fn for_kind(&self, kind: DebateKind) -> u32 {
        match kind {
            DebateKind::Researcher => self.researcher,
            DebateKind::Risk => self.risk,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSelection {
    pub deep_think: String,
    pub quick_think: String,
}

impl ModelSelection {
    /// Analysts and debaters run on the quick model; the neutral risk
    /// voice and the final judge get the deep one.
    pub fn for_role(&self, role: AgentRole) -> &str {
        match role {
            AgentRole::Neutral | AgentRole::RiskJudge => &self.deep_think,
            _ => &self.quick_think,
        }
    }
}

/// One deliberation request: a security and a date to decide on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequest {
    pub ticker: String,
    pub trade_date: NaiveDate,
    pub round_limits: RoundLimits,
    pub models: ModelSelection,
}

//
// ================= Debate =================
//

/// One exchange in a debate transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateTurn {
    pub turn_id: Uuid,
    pub role: AgentRole,
    pub round: u32,
    pub text: String,
    /// Memory records consulted while producing this turn.
    pub cited_memories: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

//
// ================= Decision =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TradeAction::Buy => "BUY",
            TradeAction::Sell => "SELL",
            TradeAction::Hold => "HOLD",
        };
        write!(f, "{}", s)
    }
}

/// Terminal decision artifact. Set exactly once per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub action: TradeAction,
    /// Sizing hint in [0, 1].
    pub magnitude: f32,
    pub rationale: String,
}

//
// ================= Results =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub session_id: Uuid,
    pub ticker: String,
    pub trade_date: NaiveDate,
    pub action: TradeAction,
    pub magnitude: f32,
    pub rationale: String,
    pub full_transcript: String,
    pub transcript_hash: String,
}

/// Structured failure result: the phase reached, the error kind, and the
/// partial reports/transcripts accumulated up to the failure. Never carries
/// a fabricated decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureReport {
    pub session_id: Uuid,
    pub ticker: String,
    pub trade_date: NaiveDate,
    pub phase_reached: SessionStatus,
    pub error_kind: ErrorKind,
    pub detail: String,
    pub reports: BTreeMap<AgentRole, String>,
    pub researcher_turns: Vec<DebateTurn>,
    pub risk_turns: Vec<DebateTurn>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionResult {
    Decided(SessionOutcome),
    Failed(FailureReport),
}

//
// ================= Tools =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolOrigin {
    Static,
    Discovered,
}

/// A callable data-access capability exposed to an agent. Names are unique
/// within one merged set; on collision the static descriptor wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub origin: ToolOrigin,
    pub description: String,
    /// JSON schema of the structured arguments.
    pub parameters: serde_json::Value,
    pub available: bool,
}

/// A tool invocation requested by the reasoning capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_order_is_fixed_per_debate() {
        assert_eq!(
            DebateKind::Researcher.participants(),
            &[AgentRole::Bull, AgentRole::Bear]
        );
        assert_eq!(
            DebateKind::Risk.participants(),
            &[AgentRole::Risky, AgentRole::Safe, AgentRole::Neutral]
        );
    }

    #[test]
    fn role_memory_collections() {
        assert_eq!(
            AgentRole::Bull.memory_collection(),
            MemoryCollection::BullResearcher
        );
        assert_eq!(
            AgentRole::MarketAnalyst.memory_collection(),
            MemoryCollection::Analyst
        );
        assert_eq!(
            AgentRole::RiskJudge.memory_collection(),
            MemoryCollection::RiskManager
        );
    }

    #[test]
    fn status_ranks_are_strictly_increasing() {
        let order = [
            SessionStatus::Pending,
            SessionStatus::AnalystsRunning,
            SessionStatus::ResearcherDebate,
            SessionStatus::RiskDebate,
            SessionStatus::Decided,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].rank() < pair[1].rank());
        }
    }

    #[test]
    fn deep_model_only_for_neutral_and_judge() {
        let models = ModelSelection {
            deep_think: "deep".to_string(),
            quick_think: "quick".to_string(),
        };
        assert_eq!(models.for_role(AgentRole::Bull), "quick");
        assert_eq!(models.for_role(AgentRole::Neutral), "deep");
        assert_eq!(models.for_role(AgentRole::RiskJudge), "deep");
    }
}
