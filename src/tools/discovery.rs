//! Dynamic tool discovery
//!
//! Enumerates externally hosted tools for a role and adapts each one into
//! the `Tool` trait. Discovery failure is a local, recoverable condition:
//! the caller always gets an outcome value, never an error.

use crate::config::{DiscoveryPolicy, ServerConfig, TransportKind};
use crate::error::{CouncilError, Result};
use crate::tools::Tool;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// How a role's merged tool set was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    /// Discovery ran and contributed `discovered` tools (possibly zero
    /// after collision skips).
    Merged { discovered: usize },
    /// Static tools only. `reason` is set when discovery was attempted and
    /// failed; `None` means discovery was disabled or unconfigured.
    StaticOnly { reason: Option<String> },
}

#[derive(Debug, Deserialize)]
struct ListToolsResponse {
    result: Option<ListToolsResult>,
}

#[derive(Debug, Deserialize)]
struct ListToolsResult {
    #[serde(default)]
    tools: Vec<RemoteToolSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CallToolResponse {
    result: Option<Value>,
    error: Option<Value>,
}

/// Client for the external tool-discovery protocol.
pub struct DiscoveryClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl DiscoveryClient {
    pub fn new(timeout_seconds: u64) -> Self {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();

        Self {
            client,
            timeout: Duration::from_secs(timeout_seconds.max(1)),
        }
    }

    /// Discover tools for one role. Every failure path collapses into
    /// `Ok(vec![])`-like behavior at the registry; this method reports the
    /// first hard failure so the registry can record a reason.
    pub async fn discover(
        &self,
        role_name: &str,
        policy: &DiscoveryPolicy,
    ) -> std::result::Result<Vec<Arc<dyn Tool>>, String> {
        let mut tools: Vec<Arc<dyn Tool>> = Vec::new();
        let mut first_failure: Option<String> = None;

        for (server_name, server) in &policy.servers {
            if server.transport != TransportKind::StreamableHttp {
                warn!(
                    role = role_name,
                    server = server_name,
                    "unsupported transport, skipping server"
                );
                continue;
            }

            match self.list_tools(server).await {
                Ok(specs) => {
                    info!(
                        role = role_name,
                        server = server_name,
                        count = specs.len(),
                        "discovered external tools"
                    );
                    for spec in specs {
                        tools.push(Arc::new(DiscoveredTool {
                            spec,
                            endpoint: server.url.clone(),
                            client: self.client.clone(),
                            timeout: self.timeout,
                        }));
                    }
                }
                Err(e) => {
                    warn!(
                        role = role_name,
                        server = server_name,
                        error = %e,
                        "tool discovery failed for server"
                    );
                    first_failure.get_or_insert_with(|| e.to_string());
                }
            }
        }

        // A reachable server with zero tools is still a success; a failure
        // with nothing discovered is reported so the caller can fall back.
        match first_failure {
            Some(reason) if tools.is_empty() => Err(reason),
            _ => Ok(tools),
        }
    }

    async fn list_tools(&self, server: &ServerConfig) -> Result<Vec<RemoteToolSpec>> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/list",
        });

        let response = tokio::time::timeout(
            self.timeout,
            self.client.post(&server.url).json(&body).send(),
        )
        .await
        .map_err(|_| CouncilError::Tool(format!("discovery timed out for {}", server.url)))?
        .map_err(|e| CouncilError::Tool(format!("discovery endpoint unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(CouncilError::Tool(format!(
                "discovery endpoint returned {}",
                response.status()
            )));
        }

        let parsed: ListToolsResponse = response
            .json()
            .await
            .map_err(|e| CouncilError::Tool(format!("malformed discovery response: {}", e)))?;

        Ok(parsed.result.map(|r| r.tools).unwrap_or_default())
    }
}

/// A remotely hosted tool, invoked over the discovery protocol's call
/// method.
struct DiscoveredTool {
    spec: RemoteToolSpec,
    endpoint: String,
    client: reqwest::Client,
    timeout: Duration,
}

#[async_trait::async_trait]
impl Tool for DiscoveredTool {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn parameters(&self) -> Value {
        self.spec
            .input_schema
            .clone()
            .unwrap_or_else(|| json!({ "type": "object" }))
    }

    async fn execute(&self, arguments: &Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": {
                "name": self.spec.name,
                "arguments": arguments,
            },
        });

        let response = tokio::time::timeout(
            self.timeout,
            self.client.post(&self.endpoint).json(&body).send(),
        )
        .await
        .map_err(|_| CouncilError::Tool(format!("tool call timed out: {}", self.spec.name)))?
        .map_err(|e| CouncilError::Tool(format!("tool call failed: {}", e)))?;

        let parsed: CallToolResponse = response
            .json()
            .await
            .map_err(|e| CouncilError::Tool(format!("malformed tool response: {}", e)))?;

        if let Some(error) = parsed.error {
            return Err(CouncilError::Tool(format!(
                "tool {} returned error: {}",
                self.spec.name, error
            )));
        }

        Ok(parsed.result.unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn unreachable_endpoint_reports_failure() {
        let client = DiscoveryClient::new(1);
        let policy = DiscoveryPolicy {
            enabled: true,
            description: "test".to_string(),
            servers: HashMap::from([(
                "dead".to_string(),
                ServerConfig {
                    // Reserved port on localhost; connection is refused.
                    url: "http://127.0.0.1:9/mcp".to_string(),
                    transport: TransportKind::StreamableHttp,
                },
            )]),
        };

        let result = client.discover("market_analyst", &policy).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn stdio_servers_are_skipped_without_failure() {
        let client = DiscoveryClient::new(1);
        let policy = DiscoveryPolicy {
            enabled: true,
            description: "test".to_string(),
            servers: HashMap::from([(
                "local".to_string(),
                ServerConfig {
                    url: "cmd://ignored".to_string(),
                    transport: TransportKind::Stdio,
                },
            )]),
        };

        let result = client.discover("news_analyst", &policy).await;
        assert_eq!(result.unwrap().len(), 0);
    }
}
