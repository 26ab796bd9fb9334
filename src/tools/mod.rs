//! Tool trait and per-role registry
//!
//! Static tools are the baseline contract for each role; discovered tools
//! only add coverage, never override it. The merged set for a role is
//! computed once per registry and reused for every later invocation of
//! that role, so tool availability never shifts mid-debate.

pub mod discovery;

pub use discovery::{DiscoveryClient, DiscoveryOutcome};

use crate::config::Config;
use crate::error::{CouncilError, Result};
use crate::models::{AgentRole, ToolDescriptor, ToolOrigin};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Trait for a single data-access tool.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Value {
        json!({ "type": "object" })
    }
    async fn execute(&self, arguments: &Value) -> Result<Value>;
}

/// The merged, immutable tool set for one role within one session.
pub struct RoleToolset {
    pub role: AgentRole,
    tools: HashMap<String, Arc<dyn Tool>>,
    descriptors: Vec<ToolDescriptor>,
    pub discovery: DiscoveryOutcome,
}

impl RoleToolset {
    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.descriptors
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.descriptors.iter().map(|d| d.name.as_str()).collect()
    }

    /// Execute one named tool from this set.
    pub async fn execute(&self, name: &str, arguments: &Value) -> Result<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| CouncilError::ToolNotFound(name.to_string()))?;
        tool.execute(arguments).await
    }
}

//
// ================= Market-Data Service Client =================
//

#[derive(Clone)]
struct MarketDataClient {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl MarketDataClient {
    fn new(base_url: Option<String>, timeout_seconds: u64) -> Self {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(timeout_seconds.max(1)))
            .build()
            .unwrap_or_default();

        Self { client, base_url }
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let base = self.base_url.as_ref().ok_or_else(|| {
            CouncilError::Tool("MARKET_DATA_BASE_URL is not configured".to_string())
        })?;
        let url = format!("{}{}", base, path);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| CouncilError::Tool(format!("market data request failed for {}: {}", path, e)))?;

        let status = response.status();
        let payload = response
            .json::<Value>()
            .await
            .map_err(|e| CouncilError::Tool(format!("invalid JSON response: {}", e)))?;

        if !status.is_success() {
            return Err(CouncilError::Tool(format!(
                "market data service returned {} for {}: {}",
                status, path, payload
            )));
        }

        Ok(payload)
    }
}

//
// ================= Static Tools =================
//

fn ticker_date_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "ticker": { "type": "string" },
            "date": { "type": "string", "format": "date" }
        },
        "required": ["ticker", "date"]
    })
}

pub struct PriceHistoryTool {
    api: MarketDataClient,
}

#[async_trait::async_trait]
impl Tool for PriceHistoryTool {
    fn name(&self) -> &str {
        "get_price_history"
    }

    fn description(&self) -> &str {
        "Fetch daily OHLCV price history for a ticker up to the analysis date"
    }

    fn parameters(&self) -> Value {
        ticker_date_schema()
    }

    async fn execute(&self, arguments: &Value) -> Result<Value> {
        self.api.post_json("/api/v1/prices/history", arguments).await
    }
}

pub struct IndicatorsTool {
    api: MarketDataClient,
}

#[async_trait::async_trait]
impl Tool for IndicatorsTool {
    fn name(&self) -> &str {
        "get_indicators"
    }

    fn description(&self) -> &str {
        "Compute technical indicators (sma, ema, macd, rsi, boll, atr, vwma) over price history"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "ticker": { "type": "string" },
                "date": { "type": "string", "format": "date" },
                "indicators": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["ticker", "date", "indicators"]
        })
    }

    async fn execute(&self, arguments: &Value) -> Result<Value> {
        self.api
            .post_json("/api/v1/prices/indicators", arguments)
            .await
    }
}

pub struct NewsTool {
    api: MarketDataClient,
}

#[async_trait::async_trait]
impl Tool for NewsTool {
    fn name(&self) -> &str {
        "get_news"
    }

    fn description(&self) -> &str {
        "Fetch recent company and macro news for a ticker"
    }

    fn parameters(&self) -> Value {
        ticker_date_schema()
    }

    async fn execute(&self, arguments: &Value) -> Result<Value> {
        self.api.post_json("/api/v1/news/search", arguments).await
    }
}

pub struct SentimentTool {
    api: MarketDataClient,
}

#[async_trait::async_trait]
impl Tool for SentimentTool {
    fn name(&self) -> &str {
        "get_social_sentiment"
    }

    fn description(&self) -> &str {
        "Fetch aggregated social-media sentiment for a ticker"
    }

    fn parameters(&self) -> Value {
        ticker_date_schema()
    }

    async fn execute(&self, arguments: &Value) -> Result<Value> {
        self.api.post_json("/api/v1/sentiment/social", arguments).await
    }
}

pub struct FundamentalsTool {
    api: MarketDataClient,
}

#[async_trait::async_trait]
impl Tool for FundamentalsTool {
    fn name(&self) -> &str {
        "get_fundamentals"
    }

    fn description(&self) -> &str {
        "Fetch fundamental statements and ratios for a ticker"
    }

    fn parameters(&self) -> Value {
        ticker_date_schema()
    }

    async fn execute(&self, arguments: &Value) -> Result<Value> {
        self.api
            .post_json("/api/v1/fundamentals/summary", arguments)
            .await
    }
}

/// Static tool set declared for a role. Debate and judge roles carry no
/// data tools; they argue over the analyst reports.
fn static_tools_for(role: AgentRole, api: &MarketDataClient) -> Vec<Arc<dyn Tool>> {
    match role {
        AgentRole::MarketAnalyst => vec![
            Arc::new(PriceHistoryTool { api: api.clone() }),
            Arc::new(IndicatorsTool { api: api.clone() }),
        ],
        AgentRole::NewsAnalyst => vec![Arc::new(NewsTool { api: api.clone() })],
        AgentRole::SocialAnalyst => vec![Arc::new(SentimentTool { api: api.clone() })],
        AgentRole::FundamentalsAnalyst => vec![Arc::new(FundamentalsTool { api: api.clone() })],
        _ => Vec::new(),
    }
}

//
// ================= Registry =================
//

/// Tool registry. Merged sets are cached per role so tool availability
/// stays consistent across every turn of a session.
pub struct ToolRegistry {
    api: MarketDataClient,
    discovery_client: DiscoveryClient,
    config: Config,
    merged: RwLock<HashMap<AgentRole, Arc<RoleToolset>>>,
}

impl ToolRegistry {
    pub fn new(config: &Config) -> Self {
        let api = MarketDataClient::new(
            config.data.base_url.clone(),
            config.data.timeout_seconds,
        );
        let discovery_client =
            DiscoveryClient::new(config.discovery.timeout_seconds.unwrap_or(10));

        Self {
            api,
            discovery_client,
            config: config.clone(),
            merged: RwLock::new(HashMap::new()),
        }
    }

    /// Merged tool set for a role. Computed once, then reused for the
    /// registry's lifetime; never fails.
    pub async fn toolset_for(&self, role: AgentRole) -> Arc<RoleToolset> {
        if let Some(existing) = self.merged.read().await.get(&role) {
            return Arc::clone(existing);
        }

        let toolset = Arc::new(self.build_toolset(role).await);

        let mut merged = self.merged.write().await;
        // Another task may have built the set while we did; first write wins
        // so every caller observes the same merged set.
        Arc::clone(merged.entry(role).or_insert(toolset))
    }

    async fn build_toolset(&self, role: AgentRole) -> RoleToolset {
        let mut tools: HashMap<String, Arc<dyn Tool>> = HashMap::new();
        let mut descriptors = Vec::new();

        for tool in static_tools_for(role, &self.api) {
            descriptors.push(ToolDescriptor {
                name: tool.name().to_string(),
                origin: ToolOrigin::Static,
                description: tool.description().to_string(),
                parameters: tool.parameters(),
                available: true,
            });
            tools.insert(tool.name().to_string(), tool);
        }

        let discovery = match self.config.discovery.policy_for(role.as_str()) {
            Some(policy) if policy.enabled => {
                match self.discovery_client.discover(role.as_str(), policy).await {
                    Ok(discovered) => {
                        let added = merge_discovered(&mut tools, &mut descriptors, discovered);
                        DiscoveryOutcome::Merged { discovered: added }
                    }
                    Err(reason) => {
                        warn!(role = %role, %reason, "discovery failed, using static tools only");
                        DiscoveryOutcome::StaticOnly {
                            reason: Some(reason),
                        }
                    }
                }
            }
            _ => DiscoveryOutcome::StaticOnly { reason: None },
        };

        info!(
            role = %role,
            tool_count = descriptors.len(),
            "tool set resolved"
        );

        RoleToolset {
            role,
            tools,
            descriptors,
            discovery,
        }
    }
}

/// Union discovered tools into the merged set. A discovered tool whose name
/// collides with a static one is skipped: static tools are the baseline
/// contract, discovery only adds coverage. Returns the number of tools
/// actually added.
fn merge_discovered(
    tools: &mut HashMap<String, Arc<dyn Tool>>,
    descriptors: &mut Vec<ToolDescriptor>,
    discovered: Vec<Arc<dyn Tool>>,
) -> usize {
    let mut added = 0;
    for tool in discovered {
        let name = tool.name().to_string();
        if tools.contains_key(&name) {
            warn!(tool = %name, "discovered tool collides with an existing tool, skipping");
            continue;
        }
        descriptors.push(ToolDescriptor {
            name: name.clone(),
            origin: ToolOrigin::Discovered,
            description: tool.description().to_string(),
            parameters: tool.parameters(),
            available: true,
        });
        tools.insert(name, tool);
        added += 1;
    }
    added
}
