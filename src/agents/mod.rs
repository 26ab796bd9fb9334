//! Agent invocation adapter
//!
//! Packages role, prompt context, merged tool set and memory context into
//! one reasoning call, validates the structured reply, and runs the bounded
//! tool loop when the reply requests data.

pub mod prompts;

use crate::error::{CouncilError, Result};
use crate::models::AgentRole;
use crate::reasoning::{AgentReply, ReasoningProvider, ReasoningRequest};
use crate::tools::RoleToolset;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Tool-call rounds allowed within one logical invocation.
const MAX_TOOL_ROUNDS: u32 = 4;

pub struct InvocationContext<'a> {
    pub role: AgentRole,
    pub model: &'a str,
    pub system_prompt: String,
    pub user_prompt: String,
    pub toolset: &'a RoleToolset,
}

/// Thin adapter over the reasoning provider. Owns reply validation; any
/// malformed reply is a reported `Invocation` error, never coerced.
pub struct AgentInvoker {
    provider: Arc<dyn ReasoningProvider>,
    timeout: Duration,
}

impl AgentInvoker {
    pub fn new(provider: Arc<dyn ReasoningProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Run one logical invocation. Requested tool calls are executed
    /// against the merged set and their results fed back, up to
    /// `MAX_TOOL_ROUNDS`; the final reply must carry non-empty text.
    pub async fn invoke(&self, ctx: InvocationContext<'_>) -> Result<AgentReply> {
        let mut user_prompt = ctx.user_prompt;
        let mut round = 0;

        loop {
            let request = ReasoningRequest {
                role: ctx.role,
                model: ctx.model.to_string(),
                system_prompt: ctx.system_prompt.clone(),
                user_prompt: user_prompt.clone(),
                tools: ctx.toolset.descriptors().to_vec(),
                timeout: self.timeout,
            };

            let reply = self.provider.complete(&request).await?;
            self.validate(ctx.role, &reply, ctx.toolset)?;

            if reply.tool_calls.is_empty() {
                return Ok(reply);
            }

            if round == MAX_TOOL_ROUNDS {
                warn!(
                    role = %ctx.role,
                    "tool round limit reached, returning reply with pending calls dropped"
                );
                return Ok(AgentReply {
                    tool_calls: Vec::new(),
                    ..reply
                });
            }

            debug!(
                role = %ctx.role,
                calls = reply.tool_calls.len(),
                round,
                "executing requested tool calls"
            );

            let mut results = Vec::with_capacity(reply.tool_calls.len());
            for call in &reply.tool_calls {
                let outcome = match ctx.toolset.execute(&call.name, &call.arguments).await {
                    Ok(value) => json!({ "tool": call.name, "result": value }),
                    Err(e) => {
                        warn!(role = %ctx.role, tool = %call.name, error = %e, "tool call failed");
                        json!({ "tool": call.name, "error": e.to_string() })
                    }
                };
                results.push(outcome);
            }

            user_prompt.push_str(&format!(
                "\n\nTool results:\n{}\n\nContinue your analysis with this data.",
                serde_json::to_string_pretty(&results)?
            ));
            round += 1;
        }
    }

    /// Reply validation per the adapter contract: text must be present
    /// unless the reply is a pure tool request, and every requested call
    /// must resolve to a descriptor in the merged set.
    fn validate(&self, role: AgentRole, reply: &AgentReply, toolset: &RoleToolset) -> Result<()> {
        if reply.text.trim().is_empty() && reply.tool_calls.is_empty() {
            return Err(CouncilError::Invocation {
                role,
                reason: "reply carried neither text nor tool calls".to_string(),
            });
        }

        for call in &reply.tool_calls {
            if !toolset.contains(&call.name) {
                return Err(CouncilError::Invocation {
                    role,
                    reason: format!("reply referenced unknown tool '{}'", call.name),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::ToolCallRequest;
    use crate::reasoning::CannedProvider;
    use crate::tools::ToolRegistry;

    fn invoker(provider: CannedProvider) -> AgentInvoker {
        AgentInvoker::new(Arc::new(provider), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn plain_reply_passes_through() {
        let provider = CannedProvider::new();
        provider.push_reply(AgentReply {
            text: "trend is up".to_string(),
            tool_calls: Vec::new(),
            aligned: false,
        });

        let registry = ToolRegistry::new(&Config::default());
        let toolset = registry.toolset_for(AgentRole::MarketAnalyst).await;

        let reply = invoker(provider)
            .invoke(InvocationContext {
                role: AgentRole::MarketAnalyst,
                model: "quick",
                system_prompt: String::new(),
                user_prompt: "analyze".to_string(),
                toolset: &toolset,
            })
            .await
            .unwrap();

        assert_eq!(reply.text, "trend is up");
    }

    #[tokio::test]
    async fn unknown_tool_reference_is_invocation_failure() {
        let provider = CannedProvider::new();
        provider.push_reply(AgentReply {
            text: "need data".to_string(),
            tool_calls: vec![ToolCallRequest {
                name: "mystery_tool".to_string(),
                arguments: json!({}),
            }],
            aligned: false,
        });

        let registry = ToolRegistry::new(&Config::default());
        let toolset = registry.toolset_for(AgentRole::MarketAnalyst).await;

        let err = invoker(provider)
            .invoke(InvocationContext {
                role: AgentRole::MarketAnalyst,
                model: "quick",
                system_prompt: String::new(),
                user_prompt: "analyze".to_string(),
                toolset: &toolset,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CouncilError::Invocation { .. }));
    }

    #[tokio::test]
    async fn tool_loop_feeds_results_back() {
        // First reply requests a known tool (which fails without a data
        // service); second reply closes with text.
        let provider = CannedProvider::new();
        provider.push_reply(AgentReply {
            text: String::new(),
            tool_calls: vec![ToolCallRequest {
                name: "get_news".to_string(),
                arguments: json!({ "ticker": "NVDA" }),
            }],
            aligned: false,
        });
        provider.push_reply(AgentReply {
            text: "news reviewed".to_string(),
            tool_calls: Vec::new(),
            aligned: false,
        });

        let registry = ToolRegistry::new(&Config::default());
        let toolset = registry.toolset_for(AgentRole::NewsAnalyst).await;

        let reply = invoker(provider)
            .invoke(InvocationContext {
                role: AgentRole::NewsAnalyst,
                model: "quick",
                system_prompt: String::new(),
                user_prompt: "analyze".to_string(),
                toolset: &toolset,
            })
            .await
            .unwrap();

        assert_eq!(reply.text, "news reviewed");
    }

    #[tokio::test]
    async fn empty_reply_is_rejected() {
        let provider = CannedProvider::new();
        provider.push_reply(AgentReply::default());

        let registry = ToolRegistry::new(&Config::default());
        let toolset = registry.toolset_for(AgentRole::Bull).await;

        let err = invoker(provider)
            .invoke(InvocationContext {
                role: AgentRole::Bull,
                model: "quick",
                system_prompt: String::new(),
                user_prompt: "argue".to_string(),
                toolset: &toolset,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CouncilError::Invocation { .. }));
    }
}
