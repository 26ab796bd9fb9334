//! Session state threaded through every phase
//!
//! The session is mutated exclusively by the phase controller and the
//! debate engine; everything else reads it.

use crate::error::{CouncilError, Result};
use crate::models::{
    AgentRole, DebateKind, DebateTurn, Decision, RoundLimits, SessionRequest, SessionStatus,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Transcript and counters for one debate type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebateState {
    pub turns: Vec<DebateTurn>,
    pub rounds_executed: u32,
    pub converged: bool,
}

/// One deliberation in flight for a (security, date) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub ticker: String,
    pub trade_date: NaiveDate,
    pub round_limits: RoundLimits,
    status: SessionStatus,
    reports: BTreeMap<AgentRole, String>,
    researcher_debate: DebateState,
    risk_debate: DebateState,
    decision: Option<Decision>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Create a fresh session: every report empty, both debates zeroed.
    pub fn new(request: &SessionRequest) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            ticker: request.ticker.clone(),
            trade_date: request.trade_date,
            round_limits: request.round_limits,
            status: SessionStatus::Pending,
            reports: BTreeMap::new(),
            researcher_debate: DebateState::default(),
            risk_debate: DebateState::default(),
            decision: None,
            created_at: Utc::now(),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Advance to the next phase. The forward order is strict: each
    /// transition moves exactly one phase ahead, never skipping or
    /// reversing. `Failed` is reachable from any non-terminal phase.
    pub fn transition(&mut self, to: SessionStatus) -> Result<()> {
        if self.status.is_terminal() {
            return Err(CouncilError::Configuration(format!(
                "session {} is terminal ({}); cannot transition to {}",
                self.session_id, self.status, to
            )));
        }
        if to != SessionStatus::Failed && to.rank() != self.status.rank() + 1 {
            return Err(CouncilError::Configuration(format!(
                "transition {} -> {} violates the phase order",
                self.status, to
            )));
        }
        self.status = to;
        Ok(())
    }

    pub fn reports(&self) -> &BTreeMap<AgentRole, String> {
        &self.reports
    }

    pub fn report(&self, role: AgentRole) -> Option<&str> {
        self.reports.get(&role).map(|s| s.as_str())
    }

    pub fn set_report(&mut self, role: AgentRole, text: String) {
        self.reports.insert(role, text);
    }

    pub fn debate(&self, kind: DebateKind) -> &DebateState {
        match kind {
            DebateKind::Researcher => &self.researcher_debate,
            DebateKind::Risk => &self.risk_debate,
        }
    }

    pub fn debate_mut(&mut self, kind: DebateKind) -> &mut DebateState {
        match kind {
            DebateKind::Researcher => &mut self.researcher_debate,
            DebateKind::Risk => &mut self.risk_debate,
        }
    }

    pub fn decision(&self) -> Option<&Decision> {
        self.decision.as_ref()
    }

    /// Record the terminal decision. Allowed exactly once, only while the
    /// session is in the risk-debate phase; the caller then transitions to
    /// `Decided`.
    pub fn set_decision(&mut self, decision: Decision) -> Result<()> {
        if self.decision.is_some() {
            return Err(CouncilError::Configuration(format!(
                "decision already set for session {}",
                self.session_id
            )));
        }
        if self.status != SessionStatus::RiskDebate {
            return Err(CouncilError::Configuration(format!(
                "decision may only be set from risk_debate, session is {}",
                self.status
            )));
        }
        self.decision = Some(decision);
        Ok(())
    }

    /// Render the whole deliberation as one readable transcript: analyst
    /// reports first, then both debates in turn order.
    pub fn full_transcript(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "## Deliberation {} on {}\n\n",
            self.ticker, self.trade_date
        ));

        for (role, report) in &self.reports {
            out.push_str(&format!("### Report: {}\n{}\n\n", role, report));
        }

        for (label, state) in [
            ("Researcher debate", &self.researcher_debate),
            ("Risk debate", &self.risk_debate),
        ] {
            if state.turns.is_empty() {
                continue;
            }
            out.push_str(&format!("### {}\n", label));
            for turn in &state.turns {
                out.push_str(&format!("[round {}] {}: {}\n", turn.round, turn.role, turn.text));
            }
            out.push('\n');
        }

        if let Some(decision) = &self.decision {
            out.push_str(&format!(
                "### Decision\n{} (magnitude {:.2})\n{}\n",
                decision.action, decision.magnitude, decision.rationale
            ));
        }

        out
    }
}
