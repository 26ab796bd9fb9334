//! Phase controller
//!
//! Owns the top-level state machine:
//! PENDING → ANALYSTS → RESEARCHER DEBATE → RISK DEBATE → DECIDED
//! with FAILED reachable from any phase. Analyst routing is decided once
//! per role per session; debate rounds stop at the configured cap or on an
//! explicit convergence signal; the decision fires exactly once, after
//! which precedent memory is written back.

use crate::agents::{prompts, AgentInvoker, InvocationContext};
use crate::archive::{transcript_hash, DeliberationRecord, SessionArchive};
use crate::config::{validate_rounds, Config};
use crate::debate::DebateEngine;
use crate::decision::DecisionAggregator;
use crate::error::{CouncilError, Result};
use crate::memory::MemoryStore;
use crate::models::{
    AgentRole, DebateKind, FailureReport, MemoryCollection, SessionOutcome, SessionRequest,
    SessionResult, SessionStatus,
};
use crate::session::Session;
use crate::tools::ToolRegistry;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct PhaseController {
    invoker: Arc<AgentInvoker>,
    engine: DebateEngine,
    aggregator: DecisionAggregator,
    memory: Arc<MemoryStore>,
    registry: Arc<ToolRegistry>,
    archive: Arc<dyn SessionArchive>,
    config: Arc<Config>,
}

impl PhaseController {
    pub fn new(
        invoker: Arc<AgentInvoker>,
        memory: Arc<MemoryStore>,
        registry: Arc<ToolRegistry>,
        archive: Arc<dyn SessionArchive>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            engine: DebateEngine::new(
                Arc::clone(&invoker),
                Arc::clone(&memory),
                Arc::clone(&registry),
            ),
            aggregator: DecisionAggregator::new(
                Arc::clone(&invoker),
                Arc::clone(&memory),
                Arc::clone(&registry),
            ),
            invoker,
            memory,
            registry,
            archive,
            config,
        }
    }

    /// Run one deliberation to its terminal state. Configuration problems
    /// abort before a session exists; any later failure yields a structured
    /// failure result, never a fabricated decision.
    pub async fn run(&self, request: SessionRequest) -> Result<SessionResult> {
        self.config.validate()?;
        validate_rounds(&request.round_limits)?;
        if request.ticker.trim().is_empty() {
            return Err(CouncilError::Configuration(
                "ticker must not be empty".to_string(),
            ));
        }

        let mut session = Session::new(&request);
        info!(
            session_id = %session.session_id,
            ticker = %session.ticker,
            trade_date = %session.trade_date,
            "session created"
        );

        session.transition(SessionStatus::AnalystsRunning)?;
        if let Err(e) = self.run_analysts(&mut session, &request).await {
            return self.fail_session(session, e).await;
        }

        session.transition(SessionStatus::ResearcherDebate)?;
        if let Err(e) = self
            .run_debate(&mut session, DebateKind::Researcher, &request)
            .await
        {
            return self.fail_session(session, e).await;
        }

        session.transition(SessionStatus::RiskDebate)?;
        if let Err(e) = self.run_debate(&mut session, DebateKind::Risk, &request).await {
            return self.fail_session(session, e).await;
        }

        let decision = match self.aggregator.decide(&session, &request.models).await {
            Ok(decision) => decision,
            Err(e) => return self.fail_session(session, e).await,
        };
        session.set_decision(decision)?;
        session.transition(SessionStatus::Decided)?;

        self.write_back(&session).await;

        let outcome = self.archive_decided(&session).await?;
        Ok(SessionResult::Decided(outcome))
    }

    /// Routing pre-check: a role is skipped when it is disabled in
    /// configuration or its report is already present. Skipped roles never
    /// consume a reasoning call; non-skipped roles are invoked exactly once.
    fn should_skip(&self, session: &Session, role: AgentRole) -> bool {
        let enabled = match role {
            AgentRole::MarketAnalyst => self.config.analysts.market,
            AgentRole::SocialAnalyst => self.config.analysts.social,
            AgentRole::NewsAnalyst => self.config.analysts.news,
            AgentRole::FundamentalsAnalyst => self.config.analysts.fundamentals,
            _ => true,
        };
        !enabled || session.report(role).is_some()
    }

    /// Analyst phase. Independent roles are dispatched concurrently; the
    /// phase completes only when every dispatched invocation has returned.
    async fn run_analysts(&self, session: &mut Session, request: &SessionRequest) -> Result<()> {
        let selected: Vec<AgentRole> = AgentRole::ANALYSTS
            .into_iter()
            .filter(|role| {
                let skip = self.should_skip(session, *role);
                if skip {
                    debug!(role = %role, "analyst skipped by routing pre-check");
                }
                !skip
            })
            .collect();

        info!(
            session_id = %session.session_id,
            dispatched = selected.len(),
            "analyst phase starting"
        );

        let situation = prompts::situation_summary(session);
        let mut handles = Vec::with_capacity(selected.len());

        for role in selected {
            let invoker = Arc::clone(&self.invoker);
            let memory = Arc::clone(&self.memory);
            let registry = Arc::clone(&self.registry);
            let model = request.models.for_role(role).to_string();
            let ticker = session.ticker.clone();
            let trade_date = session.trade_date;
            let situation = situation.clone();

            let handle = tokio::spawn(async move {
                let collection = role.memory_collection();
                let retrieved = memory
                    .retrieve(collection, &situation, memory.limit(), memory.alpha_for(collection))
                    .await;
                let memories = MemoryStore::format_matches(&retrieved);

                let toolset = registry.toolset_for(role).await;
                let user_prompt = prompts::analyst_prompt(
                    role,
                    &ticker,
                    trade_date,
                    toolset.descriptors(),
                    &memories,
                );

                let reply = invoker
                    .invoke(InvocationContext {
                        role,
                        model: &model,
                        system_prompt: prompts::system_prompt(role, &ticker, trade_date),
                        user_prompt,
                        toolset: &toolset,
                    })
                    .await?;

                Ok::<(AgentRole, String), CouncilError>((role, reply.text))
            });
            handles.push(handle);
        }

        let mut reports = Vec::with_capacity(handles.len());
        let mut first_error: Option<CouncilError> = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(report)) => reports.push(report),
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    first_error.get_or_insert(CouncilError::Tool(format!(
                        "analyst task aborted: {}",
                        e
                    )));
                }
            }
        }

        // Successful reports are kept even when a sibling failed, so a
        // failure report still carries the partial output.
        reports.sort_by_key(|(role, _)| *role);
        for (role, text) in reports {
            session.set_report(role, text);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Debate phase: rounds run until the cap or until a round where every
    /// participant signals alignment.
    async fn run_debate(
        &self,
        session: &mut Session,
        kind: DebateKind,
        request: &SessionRequest,
    ) -> Result<()> {
        let limit = session.round_limits.for_kind(kind);

        while session.debate(kind).rounds_executed < limit {
            let report = self.engine.run_round(session, kind, &request.models).await?;
            if report.aligned {
                info!(
                    session_id = %session.session_id,
                    debate = %kind,
                    round = report.round,
                    "debate converged early"
                );
                break;
            }
        }

        Ok(())
    }

    /// Reflection write-back after `decided`: one precedent per collection.
    /// Write failures degrade future retrieval quality but never the
    /// already-decided session, so they are logged and dropped.
    async fn write_back(&self, session: &Session) {
        let situation = prompts::situation_summary(session);
        let decision_summary = match session.decision() {
            Some(d) => format!("{} (magnitude {:.2}): {}", d.action, d.magnitude, d.rationale),
            None => return,
        };

        let last_turn = |kind: DebateKind, role: AgentRole| {
            session
                .debate(kind)
                .turns
                .iter()
                .rev()
                .find(|t| t.role == role)
                .map(|t| t.text.clone())
                .unwrap_or_else(|| decision_summary.clone())
        };

        let entries = [
            (
                MemoryCollection::BullResearcher,
                last_turn(DebateKind::Researcher, AgentRole::Bull),
            ),
            (
                MemoryCollection::BearResearcher,
                last_turn(DebateKind::Researcher, AgentRole::Bear),
            ),
            (MemoryCollection::Trader, decision_summary.clone()),
            (MemoryCollection::Analyst, decision_summary.clone()),
            (MemoryCollection::RiskManager, decision_summary),
        ];

        for (collection, recommendation) in entries {
            if let Err(e) = self.memory.write(collection, &situation, &recommendation).await {
                warn!(%collection, error = %e, "memory write-back failed");
            }
        }
    }

    async fn archive_decided(&self, session: &Session) -> Result<SessionOutcome> {
        let decision = session
            .decision()
            .ok_or_else(|| CouncilError::Archive("decided session without decision".to_string()))?;

        let full_transcript = session.full_transcript();
        let hash = transcript_hash(&full_transcript);

        let outcome = SessionOutcome {
            session_id: session.session_id,
            ticker: session.ticker.clone(),
            trade_date: session.trade_date,
            action: decision.action,
            magnitude: decision.magnitude,
            rationale: decision.rationale.clone(),
            full_transcript,
            transcript_hash: hash.clone(),
        };

        self.archive
            .record(DeliberationRecord {
                session_id: session.session_id,
                ticker: session.ticker.clone(),
                trade_date: session.trade_date,
                status: session.status(),
                outcome: Some(outcome.clone()),
                failure: None,
                transcript_hash: hash,
                created_at: Utc::now(),
            })
            .await?;

        info!(
            session_id = %session.session_id,
            action = %outcome.action,
            "session decided and archived"
        );
        Ok(outcome)
    }

    /// Terminal failure path: record the phase reached, the error kind and
    /// every partial report/transcript for diagnostics.
    async fn fail_session(
        &self,
        mut session: Session,
        error: CouncilError,
    ) -> Result<SessionResult> {
        let phase_reached = session.status();
        session.transition(SessionStatus::Failed)?;

        warn!(
            session_id = %session.session_id,
            phase = %phase_reached,
            error = %error,
            "session failed"
        );

        let report = FailureReport {
            session_id: session.session_id,
            ticker: session.ticker.clone(),
            trade_date: session.trade_date,
            phase_reached,
            error_kind: error.kind(),
            detail: error.to_string(),
            reports: session.reports().clone(),
            researcher_turns: session.debate(DebateKind::Researcher).turns.clone(),
            risk_turns: session.debate(DebateKind::Risk).turns.clone(),
        };

        self.archive
            .record(DeliberationRecord {
                session_id: session.session_id,
                ticker: session.ticker.clone(),
                trade_date: session.trade_date,
                status: SessionStatus::Failed,
                outcome: None,
                failure: Some(report.clone()),
                transcript_hash: transcript_hash(&session.full_transcript()),
                created_at: Utc::now(),
            })
            .await?;

        Ok(SessionResult::Failed(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::InMemoryArchive;
    use crate::error::ErrorKind;
    use crate::memory::HashEmbeddingProvider;
    use crate::models::{ModelSelection, RoundLimits, TradeAction};
    use crate::reasoning::CannedProvider;
    use chrono::NaiveDate;
    use std::time::Duration;

    struct Harness {
        controller: PhaseController,
        memory: Arc<MemoryStore>,
        archive: Arc<InMemoryArchive>,
    }

    fn harness_with(provider: CannedProvider, config: Config) -> Harness {
        let config = Arc::new(config);
        let memory = Arc::new(MemoryStore::new(
            Arc::new(HashEmbeddingProvider::default()),
            config.memory.clone(),
        ));
        let registry = Arc::new(ToolRegistry::new(&config));
        let archive = Arc::new(InMemoryArchive::new());
        let invoker = Arc::new(AgentInvoker::new(
            Arc::new(provider),
            Duration::from_secs(5),
        ));

        Harness {
            controller: PhaseController::new(
                invoker,
                Arc::clone(&memory),
                registry,
                archive.clone() as Arc<dyn SessionArchive>,
                Arc::clone(&config),
            ),
            memory,
            archive,
        }
    }

    fn harness(provider: CannedProvider) -> Harness {
        harness_with(provider, Config::default())
    }

    fn request(researcher: u32, risk: u32) -> SessionRequest {
        SessionRequest {
            ticker: "NVDA".to_string(),
            trade_date: NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(),
            round_limits: RoundLimits { researcher, risk },
            models: ModelSelection {
                deep_think: "deep".to_string(),
                quick_think: "quick".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn full_pipeline_decides_with_exact_turn_counts() {
        // Round limits {researcher: 1, risk: 1}, all analysts enabled:
        // 4 reports, 2 researcher turns, 3 risk turns, one decision.
        let h = harness(CannedProvider::new());

        let result = h.controller.run(request(1, 1)).await.unwrap();
        let outcome = match result {
            SessionResult::Decided(outcome) => outcome,
            SessionResult::Failed(report) => panic!("unexpected failure: {:?}", report),
        };

        assert_eq!(outcome.action, TradeAction::Hold);
        assert!(!outcome.rationale.is_empty());

        let archived = h.archive.get(outcome.session_id).await.unwrap().unwrap();
        assert_eq!(archived.status, SessionStatus::Decided);
        let stored = archived.outcome.unwrap();
        assert_eq!(
            stored.full_transcript.matches("### Report:").count(),
            4
        );
        assert!(h.archive.verify_integrity(outcome.session_id).await.unwrap());
    }

    #[tokio::test]
    async fn mid_risk_failure_yields_structured_report() {
        // Safe's invocation times out/fails in risk round 1: the session
        // fails with InvocationFailure, risky's turn is present and
        // neutral never speaks.
        let h = harness(CannedProvider::new().fail_for(AgentRole::Safe));

        let result = h.controller.run(request(1, 1)).await.unwrap();
        let report = match result {
            SessionResult::Failed(report) => report,
            SessionResult::Decided(_) => panic!("expected failure"),
        };

        assert_eq!(report.error_kind, ErrorKind::Invocation);
        assert_eq!(report.phase_reached, SessionStatus::RiskDebate);
        assert_eq!(report.reports.len(), 4);
        assert_eq!(report.researcher_turns.len(), 2);
        assert_eq!(report.risk_turns.len(), 1);
        assert_eq!(report.risk_turns[0].role, AgentRole::Risky);

        let archived = h.archive.get(report.session_id).await.unwrap().unwrap();
        assert_eq!(archived.status, SessionStatus::Failed);
        assert!(archived.outcome.is_none());
    }

    #[tokio::test]
    async fn zero_round_limit_prevents_session_creation() {
        let h = harness(CannedProvider::new());
        let err = h.controller.run(request(0, 1)).await.unwrap_err();
        assert!(matches!(err, CouncilError::Configuration(_)));
    }

    #[tokio::test]
    async fn disabled_analyst_is_skipped() {
        let mut config = Config::default();
        config.analysts.social = false;
        let h = harness_with(CannedProvider::new(), config);

        let result = h.controller.run(request(1, 1)).await.unwrap();
        let outcome = match result {
            SessionResult::Decided(outcome) => outcome,
            SessionResult::Failed(report) => panic!("unexpected failure: {:?}", report),
        };

        let archived = h.archive.get(outcome.session_id).await.unwrap().unwrap();
        let transcript = archived.outcome.unwrap().full_transcript;
        assert_eq!(transcript.matches("### Report:").count(), 3);
        assert!(!transcript.contains("social_analyst"));
    }

    #[tokio::test]
    async fn aligned_debate_stops_before_cap() {
        let h = harness(CannedProvider::aligned());

        let result = h.controller.run(request(3, 3)).await.unwrap();
        let outcome = match result {
            SessionResult::Decided(outcome) => outcome,
            SessionResult::Failed(report) => panic!("unexpected failure: {:?}", report),
        };

        // One researcher round (2 turns) and one risk round (3 turns)
        // despite the cap of 3.
        let transcript = outcome.full_transcript;
        assert_eq!(transcript.matches("[round 1]").count(), 5);
        assert_eq!(transcript.matches("[round 2]").count(), 0);
    }

    #[tokio::test]
    async fn decided_session_writes_back_all_collections() {
        let h = harness(CannedProvider::new());
        h.controller.run(request(1, 1)).await.unwrap();

        for collection in MemoryCollection::ALL {
            assert_eq!(h.memory.len(collection).await, 1, "{}", collection);
        }
    }

    #[tokio::test]
    async fn discovery_outage_does_not_disturb_the_pipeline() {
        // The market analyst's discovery endpoint refuses connections; the
        // role falls back to its static tools and the session decides.
        let mut config = Config::default();
        config.discovery.roles.insert(
            "market_analyst".to_string(),
            crate::config::DiscoveryPolicy {
                enabled: true,
                description: "dead endpoint".to_string(),
                servers: std::collections::HashMap::from([(
                    "primary".to_string(),
                    crate::config::ServerConfig {
                        url: "http://127.0.0.1:9/mcp".to_string(),
                        transport: crate::config::TransportKind::StreamableHttp,
                    },
                )]),
            },
        );
        config.discovery.timeout_seconds = Some(1);
        let h = harness_with(CannedProvider::new(), config);

        let result = h.controller.run(request(1, 1)).await.unwrap();
        assert!(matches!(result, SessionResult::Decided(_)));
    }

    #[tokio::test]
    async fn analyst_failure_fails_in_analyst_phase() {
        let h = harness(CannedProvider::new().fail_for(AgentRole::NewsAnalyst));

        let result = h.controller.run(request(1, 1)).await.unwrap();
        let report = match result {
            SessionResult::Failed(report) => report,
            SessionResult::Decided(_) => panic!("expected failure"),
        };

        assert_eq!(report.phase_reached, SessionStatus::AnalystsRunning);
        assert_eq!(report.error_kind, ErrorKind::Invocation);
        assert!(report.researcher_turns.is_empty());
        // The three healthy analysts' partial reports survive.
        assert_eq!(report.reports.len(), 3);
        assert!(!report.reports.contains_key(&AgentRole::NewsAnalyst));
    }
}
