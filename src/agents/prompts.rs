//! Role prompts and per-turn context assembly

use crate::models::{AgentRole, DebateKind, ToolDescriptor};
use crate::session::Session;
use chrono::NaiveDate;

/// Reply contract every agent is held to. Replies that ignore it are
/// treated as plain text with no tool calls and no alignment signal.
const REPLY_FORMAT: &str = "Respond with a single JSON object: \
{\"text\": \"<your full analysis>\", \"tool_calls\": [{\"name\": \"<tool>\", \"arguments\": {}}], \"aligned\": <bool>}. \
Leave tool_calls empty when you have enough data. Set aligned to true only \
when your recommendation has converged with the opposing side's.";

pub fn system_prompt(role: AgentRole, ticker: &str, trade_date: NaiveDate) -> String {
    let role_brief = match role {
        AgentRole::MarketAnalyst => {
            "You are a trading assistant analyzing financial markets. Select up to 8 \
             complementary technical indicators (exact lowercase codes: close_50_sma, \
             close_200_sma, close_10_ema, macd, macds, macdh, rsi, boll, boll_ub, boll_lb, \
             atr, vwma) and write a detailed, fine-grained report of the trends you observe. \
             Do not simply state that trends are mixed. End with a markdown table of key points."
        }
        AgentRole::SocialAnalyst => {
            "You are a social media analyst. Assess posts, sentiment swings and crowd \
             positioning for the company, and write a detailed report on what they imply \
             for traders. End with a markdown table of key points."
        }
        AgentRole::NewsAnalyst => {
            "You are a news researcher analyzing recent company and macro news. Write a \
             detailed report on the state of the world as it bears on this trade. End with \
             a markdown table of key points."
        }
        AgentRole::FundamentalsAnalyst => {
            "You are a fundamentals researcher. Review financial statements, ratios and \
             insider activity, and write a detailed report on company health. End with a \
             markdown table of key points."
        }
        AgentRole::Bull => {
            "You are the Bull Analyst arguing FOR investing in the stock. Build an \
             evidence-driven case around growth potential and competitive advantages, and \
             rebut the bear's latest points directly."
        }
        AgentRole::Bear => {
            "You are the Bear Analyst arguing AGAINST investing in the stock. Build an \
             evidence-driven case around risks, stretched valuation and deteriorating \
             signals, and rebut the bull's latest points directly."
        }
        AgentRole::Risky => {
            "You are the Risky risk debator advocating for high-reward positioning. Argue \
             why the bolder sizing is justified, engaging the safe and neutral views."
        }
        AgentRole::Safe => {
            "You are the Safe risk debator prioritizing capital preservation. Argue for \
             conservative sizing and hedges, engaging the risky and neutral views."
        }
        AgentRole::Neutral => {
            "You are the Neutral risk debator weighing both sides. Point out where the \
             risky and safe arguments overreach and steer toward a balanced stance."
        }
        AgentRole::RiskJudge => {
            "You are the portfolio manager and debate facilitator. Synthesize the analyst \
             reports and both debates into one actionable verdict. State the decisive \
             arguments plainly and end with: FINAL TRANSACTION PROPOSAL: **BUY/SELL/HOLD**."
        }
    };

    format!(
        "{}\n\nContext: analysis date is {}. Company under analysis: {}.\n\n{}",
        role_brief, trade_date, ticker, REPLY_FORMAT
    )
}

pub fn tool_section(tools: &[ToolDescriptor]) -> String {
    if tools.is_empty() {
        return String::new();
    }
    let listing = tools
        .iter()
        .map(|t| format!("- {}: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n");
    format!("You have access to the following tools:\n{}\n\n", listing)
}

/// Analyst task prompt: tools plus the standing instruction to produce a
/// report.
pub fn analyst_prompt(
    role: AgentRole,
    ticker: &str,
    trade_date: NaiveDate,
    tools: &[ToolDescriptor],
    memories: &str,
) -> String {
    format!(
        "Produce your {} report for {} as of {}.\n\n\
         {}Lessons from similar past situations:\n{}\n",
        role,
        ticker,
        trade_date,
        tool_section(tools),
        memories
    )
}

/// Debate turn prompt: analyst reports, the transcript so far, and past
/// lessons for this role.
pub fn debate_prompt(
    role: AgentRole,
    kind: DebateKind,
    session: &Session,
    memories: &str,
) -> String {
    let mut reports = String::new();
    for (report_role, text) in session.reports() {
        reports.push_str(&format!("--- {} report ---\n{}\n", report_role, text));
    }

    let debate = session.debate(kind);
    let transcript = if debate.turns.is_empty() {
        "(no turns yet; you open the debate)".to_string()
    } else {
        debate
            .turns
            .iter()
            .map(|t| format!("[round {}] {}: {}", t.round, t.role, t.text))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "It is your turn as {} in the {} debate on {}.\n\n\
         Analyst reports:\n{}\n\
         Debate so far:\n{}\n\n\
         Lessons from similar past situations:\n{}\n\n\
         Make your strongest argument for this round.",
        role, kind, session.ticker, reports, transcript, memories
    )
}

/// Judge prompt: the whole deliberation plus risk-manager precedent.
pub fn judge_prompt(session: &Session, memories: &str) -> String {
    format!(
        "The deliberation on {} ({}) is complete. Review everything below and \
         deliver the final decision.\n\n{}\n\
         Lessons from similar past situations:\n{}\n\n\
         Decide: commit to BUY, SELL, or HOLD with a sizing magnitude between 0 and 1.",
        session.ticker,
        session.trade_date,
        session.full_transcript(),
        memories
    )
}

/// The situation description used both as retrieval query and as the
/// written-back memory key.
pub fn situation_summary(session: &Session) -> String {
    let mut parts = vec![format!("{} on {}", session.ticker, session.trade_date)];
    for (role, text) in session.reports() {
        let head: String = text.chars().take(300).collect();
        parts.push(format!("{}: {}", role, head));
    }
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ModelSelection, RoundLimits, SessionRequest};

    fn session() -> Session {
        Session::new(&SessionRequest {
            ticker: "NVDA".to_string(),
            trade_date: NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(),
            round_limits: RoundLimits {
                researcher: 1,
                risk: 1,
            },
            models: ModelSelection {
                deep_think: "deep".to_string(),
                quick_think: "quick".to_string(),
            },
        })
    }

    #[test]
    fn system_prompts_carry_reply_contract() {
        let prompt = system_prompt(
            AgentRole::Bull,
            "NVDA",
            NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(),
        );
        assert!(prompt.contains("aligned"));
        assert!(prompt.contains("NVDA"));
    }

    #[test]
    fn judge_prompt_includes_reports_and_marker_instruction() {
        let mut session = session();
        session.set_report(AgentRole::MarketAnalyst, "uptrend intact".to_string());

        let system = system_prompt(AgentRole::RiskJudge, "NVDA", session.trade_date);
        assert!(system.contains("FINAL TRANSACTION PROPOSAL"));

        let prompt = judge_prompt(&session, "No past memories found.");
        assert!(prompt.contains("uptrend intact"));
    }

    #[test]
    fn debate_prompt_marks_opening_turn() {
        let session = session();
        let prompt = debate_prompt(
            AgentRole::Bull,
            DebateKind::Researcher,
            &session,
            "No past memories found.",
        );
        assert!(prompt.contains("you open the debate"));
    }
}
