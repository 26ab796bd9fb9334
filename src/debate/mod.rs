//! Round-bounded debate engine
//!
//! Runs exactly one round per call: one turn per participant, in fixed role
//! order. Researcher debates alternate bull → bear; risk debates run
//! risky → safe → neutral. A turn failure propagates unchanged: debate
//! integrity requires every configured participant to speak each round, so
//! the controller fails the session rather than skipping a voice.

use crate::agents::{prompts, AgentInvoker, InvocationContext};
use crate::error::{CouncilError, Result};
use crate::memory::MemoryStore;
use crate::models::{DebateKind, DebateTurn, ModelSelection};
use crate::session::Session;
use crate::tools::ToolRegistry;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Result of one completed round.
#[derive(Debug, Clone, Copy)]
pub struct RoundReport {
    pub round: u32,
    /// True when every turn in the round carried the convergence signal.
    pub aligned: bool,
}

pub struct DebateEngine {
    invoker: Arc<AgentInvoker>,
    memory: Arc<MemoryStore>,
    registry: Arc<ToolRegistry>,
}

impl DebateEngine {
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

    /// Run one round of the given debate, appending turns to the session
    /// transcript as they are produced. Starting a round at or past the
    /// configured cap is an integrity violation.
    pub async fn run_round(
        &self,
        session: &mut Session,
        kind: DebateKind,
        models: &ModelSelection,
    ) -> Result<RoundReport> {
        let limit = session.round_limits.for_kind(kind);
        let executed = session.debate(kind).rounds_executed;
        if executed >= limit {
            return Err(CouncilError::RoundIntegrity {
                debate: kind,
                round: executed + 1,
                reason: format!("round cap {} already reached", limit),
            });
        }

        let round = executed + 1;
        let mut aligned = true;

        info!(
            session_id = %session.session_id,
            debate = %kind,
            round,
            "starting debate round"
        );

        for &role in kind.participants() {
            let collection = role.memory_collection();
            let query = retrieval_query(session, kind);
            let retrieved = self
                .memory
                .retrieve(
                    collection,
                    &query,
                    self.memory.limit(),
                    self.memory.alpha_for(collection),
                )
                .await;
            let cited = retrieved.cited_ids();
            let memories = MemoryStore::format_matches(&retrieved);

            let toolset = self.registry.toolset_for(role).await;
            let reply = self
                .invoker
                .invoke(InvocationContext {
                    role,
                    model: models.for_role(role),
                    system_prompt: prompts::system_prompt(role, &session.ticker, session.trade_date),
                    user_prompt: prompts::debate_prompt(role, kind, session, &memories),
                    toolset: &toolset,
                })
                .await?;

            debug!(debate = %kind, round, %role, aligned = reply.aligned, "turn produced");
            aligned &= reply.aligned;

            session.debate_mut(kind).turns.push(DebateTurn {
                turn_id: Uuid::new_v4(),
                role,
                round,
                text: reply.text,
                cited_memories: cited,
                created_at: Utc::now(),
            });
        }

        let debate = session.debate_mut(kind);
        debate.rounds_executed = round;
        debate.converged = aligned;

        info!(
            session_id = %session.session_id,
            debate = %kind,
            round,
            aligned,
            "debate round complete"
        );

        Ok(RoundReport { round, aligned })
    }
}

/// Retrieval query for a debate turn: the transcript so far, or the
/// analyst-report summary when the debate is opening.
fn retrieval_query(session: &Session, kind: DebateKind) -> String {
    let debate = session.debate(kind);
    if debate.turns.is_empty() {
        prompts::situation_summary(session)
    } else {
        debate
            .turns
            .iter()
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::{AgentRole, ModelSelection, RoundLimits, SessionRequest, SessionStatus};
    use crate::reasoning::{AgentReply, CannedProvider};
    use chrono::NaiveDate;
    use std::time::Duration;

    fn models() -> ModelSelection {
        ModelSelection {
            deep_think: "deep".to_string(),
            quick_think: "quick".to_string(),
        }
    }

    fn session(researcher: u32, risk: u32) -> Session {
        let mut session = Session::new(&SessionRequest {
            ticker: "NVDA".to_string(),
            trade_date: NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(),
            round_limits: RoundLimits { researcher, risk },
            models: models(),
        });
        session.transition(SessionStatus::AnalystsRunning).unwrap();
        session.transition(SessionStatus::ResearcherDebate).unwrap();
        session
    }

    fn engine(provider: CannedProvider) -> DebateEngine {
        let config = Config::default();
        DebateEngine::new(
            Arc::new(AgentInvoker::new(
                Arc::new(provider),
                Duration::from_secs(5),
            )),
            Arc::new(MemoryStore::new(
                Arc::new(crate::memory::HashEmbeddingProvider::default()),
                config.memory.clone(),
            )),
            Arc::new(ToolRegistry::new(&config)),
        )
    }

    #[tokio::test]
    async fn researcher_round_produces_bull_then_bear() {
        let mut session = session(2, 1);
        let engine = engine(CannedProvider::new());

        let report = engine
            .run_round(&mut session, DebateKind::Researcher, &models())
            .await
            .unwrap();

        assert_eq!(report.round, 1);
        let turns = &session.debate(DebateKind::Researcher).turns;
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, AgentRole::Bull);
        assert_eq!(turns[1].role, AgentRole::Bear);
        assert!(turns.iter().all(|t| t.round == 1));
    }

    #[tokio::test]
    async fn risk_round_runs_three_turns_in_order() {
        let mut session = session(1, 1);
        session.transition(SessionStatus::RiskDebate).unwrap();
        let engine = engine(CannedProvider::new());

        engine
            .run_round(&mut session, DebateKind::Risk, &models())
            .await
            .unwrap();

        let roles: Vec<AgentRole> = session
            .debate(DebateKind::Risk)
            .turns
            .iter()
            .map(|t| t.role)
            .collect();
        assert_eq!(roles, vec![AgentRole::Risky, AgentRole::Safe, AgentRole::Neutral]);
    }

    #[tokio::test]
    async fn round_past_cap_is_integrity_violation() {
        let mut session = session(1, 1);
        let engine = engine(CannedProvider::new());

        engine
            .run_round(&mut session, DebateKind::Researcher, &models())
            .await
            .unwrap();

        let err = engine
            .run_round(&mut session, DebateKind::Researcher, &models())
            .await
            .unwrap_err();
        assert!(matches!(err, CouncilError::RoundIntegrity { .. }));
    }

    #[tokio::test]
    async fn aligned_round_marks_convergence() {
        let mut session = session(3, 1);
        let engine = engine(CannedProvider::aligned());

        let report = engine
            .run_round(&mut session, DebateKind::Researcher, &models())
            .await
            .unwrap();

        assert!(report.aligned);
        assert!(session.debate(DebateKind::Researcher).converged);
    }

    #[tokio::test]
    async fn mid_round_failure_keeps_earlier_turns() {
        // Safe's backend is down: risky speaks, then the round aborts with
        // the originating invocation failure and no neutral turn.
        let mut session = session(1, 1);
        session.transition(SessionStatus::RiskDebate).unwrap();
        let engine = engine(CannedProvider::new().fail_for(AgentRole::Safe));

        let err = engine
            .run_round(&mut session, DebateKind::Risk, &models())
            .await
            .unwrap_err();

        assert!(matches!(err, CouncilError::Invocation { role: AgentRole::Safe, .. }));

        let turns = &session.debate(DebateKind::Risk).turns;
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, AgentRole::Risky);
        assert_eq!(session.debate(DebateKind::Risk).rounds_executed, 0);
    }

    #[tokio::test]
    async fn turn_counts_match_rounds_times_participants() {
        let mut session = session(2, 1);
        let engine = engine(CannedProvider::new());

        for _ in 0..2 {
            engine
                .run_round(&mut session, DebateKind::Researcher, &models())
                .await
                .unwrap();
        }

        let debate = session.debate(DebateKind::Researcher);
        assert_eq!(
            debate.turns.len(),
            (debate.rounds_executed as usize) * DebateKind::Researcher.participants().len()
        );
    }
}
