//! Reasoning-provider seam
//!
//! One call to the external reasoning capability: prompt in, structured
//! reply out. The HTTP provider targets an OpenAI-compatible chat endpoint;
//! the canned provider keeps the pipeline runnable without network access.

use crate::error::{CouncilError, Result};
use crate::models::{AgentRole, ToolCallRequest, ToolDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info};

/// Input for one reasoning invocation.
#[derive(Debug, Clone)]
pub struct ReasoningRequest {
    pub role: AgentRole,
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub tools: Vec<ToolDescriptor>,
    pub timeout: Duration,
}

/// Structured reply contract. `aligned` is the explicit convergence signal
/// a debate turn may set; it is never inferred from free text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentReply {
    pub text: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default)]
    pub aligned: bool,
}

#[async_trait::async_trait]
pub trait ReasoningProvider: Send + Sync {
    async fn complete(&self, request: &ReasoningRequest) -> Result<AgentReply>;
}

//
// ================= HTTP Provider =================
//

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Chat-completions client (connection-pooled).
pub struct HttpReasoningProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpReasoningProvider {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    async fn post_chat(&self, request: &ReasoningRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let body = ChatRequest {
            model: &request.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user_prompt,
                },
            ],
        };

        let mut http = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let response = http.send().await.map_err(|e| {
            error!(role = %request.role, "reasoning request failed: {}", e);
            CouncilError::Invocation {
                role: request.role,
                reason: format!("reasoning backend error: {}", e),
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(CouncilError::Invocation {
                role: request.role,
                reason: format!("reasoning backend returned {}: {}", status, detail),
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| CouncilError::Invocation {
            role: request.role,
            reason: format!("unparseable reasoning response: {}", e),
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| CouncilError::Invocation {
                role: request.role,
                reason: "empty reasoning response".to_string(),
            })
    }
}

#[async_trait::async_trait]
impl ReasoningProvider for HttpReasoningProvider {
    async fn complete(&self, request: &ReasoningRequest) -> Result<AgentReply> {
        info!(
            role = %request.role,
            model = %request.model,
            prompt_chars = request.user_prompt.len(),
            "invoking reasoning backend"
        );

        let content = match timeout(request.timeout, self.post_chat(request)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(CouncilError::Invocation {
                    role: request.role,
                    reason: format!("reasoning call timed out after {:?}", request.timeout),
                })
            }
        };

        Ok(parse_reply(&content))
    }
}

/// Parse the structured reply out of raw model output. Models that answer
/// with the JSON contract get full structure; anything else is treated as
/// plain text with no tool calls and no alignment signal.
pub fn parse_reply(content: &str) -> AgentReply {
    if let Some(json) = extract_json_from_text(content) {
        if let Ok(reply) = serde_json::from_str::<AgentReply>(&json) {
            if !reply.text.trim().is_empty() || !reply.tool_calls.is_empty() {
                return reply;
            }
        }
    }

    AgentReply {
        text: content.trim().to_string(),
        tool_calls: Vec::new(),
        aligned: false,
    }
}

/// Extract a JSON object from text that may wrap it in markdown fences.
fn extract_json_from_text(text: &str) -> Option<String> {
    if let Some(start) = text.find("```json") {
        if let Some(end) = text[start + 7..].find("```") {
            return Some(text[start + 7..start + 7 + end].trim().to_string());
        }
    }

    if let Some(start) = text.find('{') {
        let mut depth = 0;
        for (i, c) in text[start..].char_indices() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(text[start..start + i + 1].to_string());
                    }
                }
                _ => {}
            }
        }
    }

    None
}

//
// ================= Canned Provider =================
//

/// Scripted provider for development and tests. Replies are popped in FIFO
/// order; when the queue is empty a role-appropriate default is produced.
/// Keeps the pipeline functional without an LLM dependency.
pub struct CannedProvider {
    replies: Mutex<std::collections::VecDeque<AgentReply>>,
    fail_roles: HashSet<AgentRole>,
    default_aligned: bool,
}

impl CannedProvider {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(std::collections::VecDeque::new()),
            fail_roles: HashSet::new(),
            default_aligned: false,
        }
    }

    /// All default replies carry the alignment signal, ending debates after
    /// one round.
    pub fn aligned() -> Self {
        Self {
            default_aligned: true,
            ..Self::new()
        }
    }

    pub fn push_reply(&self, reply: AgentReply) {
        self.replies
            .lock()
            .expect("canned reply queue poisoned")
            .push_back(reply);
    }

    /// Every invocation for `role` fails, simulating a backend outage.
    pub fn fail_for(mut self, role: AgentRole) -> Self {
        self.fail_roles.insert(role);
        self
    }

    fn default_reply(&self, role: AgentRole) -> AgentReply {
        let text = match role {
            AgentRole::RiskJudge => {
                "Weighing the debate, exposure is acceptable at modest size.\n\
                 FINAL TRANSACTION PROPOSAL: **HOLD**"
                    .to_string()
            }
            role if role.is_analyst() => {
                format!("{} report: no unusual signals in the reviewed window.", role)
            }
            role => format!("{} position statement: maintaining stated stance.", role),
        };

        AgentReply {
            text,
            tool_calls: Vec::new(),
            aligned: self.default_aligned,
        }
    }
}

impl Default for CannedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ReasoningProvider for CannedProvider {
    async fn complete(&self, request: &ReasoningRequest) -> Result<AgentReply> {
        if self.fail_roles.contains(&request.role) {
            return Err(CouncilError::Invocation {
                role: request.role,
                reason: "simulated backend outage".to_string(),
            });
        }

        let queued = self
            .replies
            .lock()
            .expect("canned reply queue poisoned")
            .pop_front();

        Ok(queued.unwrap_or_else(|| self.default_reply(request.role)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reply_accepts_json_contract() {
        let content = r#"```json
{"text": "momentum weakening", "tool_calls": [], "aligned": true}
```"#;
        let reply = parse_reply(content);
        assert_eq!(reply.text, "momentum weakening");
        assert!(reply.aligned);
    }

    #[test]
    fn parse_reply_accepts_bare_json() {
        let content =
            r#"{"text": "need data", "tool_calls": [{"name": "get_news", "arguments": {"q": "NVDA"}}]}"#;
        let reply = parse_reply(content);
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].name, "get_news");
        assert!(!reply.aligned);
    }

    #[test]
    fn parse_reply_falls_back_to_plain_text() {
        let reply = parse_reply("The trend is constructive overall.");
        assert_eq!(reply.text, "The trend is constructive overall.");
        assert!(reply.tool_calls.is_empty());
        assert!(!reply.aligned);
    }

    #[tokio::test]
    async fn canned_provider_pops_then_defaults() {
        let provider = CannedProvider::new();
        provider.push_reply(AgentReply {
            text: "scripted".to_string(),
            tool_calls: Vec::new(),
            aligned: true,
        });

        let request = ReasoningRequest {
            role: AgentRole::Bull,
            model: "quick".to_string(),
            system_prompt: String::new(),
            user_prompt: String::new(),
            tools: Vec::new(),
            timeout: Duration::from_secs(1),
        };

        let first = provider.complete(&request).await.unwrap();
        assert_eq!(first.text, "scripted");

        let second = provider.complete(&request).await.unwrap();
        assert!(second.text.contains("bull"));
    }

    #[tokio::test]
    async fn canned_provider_simulates_outage() {
        let provider = CannedProvider::new().fail_for(AgentRole::Safe);
        let request = ReasoningRequest {
            role: AgentRole::Safe,
            model: "quick".to_string(),
            system_prompt: String::new(),
            user_prompt: String::new(),
            tools: Vec::new(),
            timeout: Duration::from_secs(1),
        };
        let err = provider.complete(&request).await.unwrap_err();
        assert!(matches!(err, CouncilError::Invocation { .. }));
    }
}
