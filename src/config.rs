//! Environment-driven configuration
//!
//! Every component receives its configuration explicitly at construction;
//! there is no process-wide lookup. `validate` runs before any session is
//! created and turns inconsistent settings into `Configuration` errors.

use crate::error::{CouncilError, Result};
use crate::models::{MemoryCollection, ModelSelection, RoundLimits};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub reasoning: ReasoningConfig,
    pub memory: MemoryConfig,
    pub data: DataServiceConfig,
    pub discovery: DiscoveryConfig,
    pub rounds: RoundLimits,
    pub models: ModelSelection,
    pub analysts: AnalystConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Embedded mode uses the deterministic local embedder; otherwise the
    /// HTTP embedding backend at `embedding_url` is used.
    pub embedded: bool,
    pub embedding_url: String,
    pub embedding_model: String,
    pub default_alpha: f32,
    pub default_limit: usize,
    /// Per-collection overrides of the hybrid balance.
    #[serde(default)]
    pub alpha_overrides: HashMap<MemoryCollection, f32>,
}

impl MemoryConfig {
    pub fn alpha_for(&self, collection: MemoryCollection) -> f32 {
        self.alpha_overrides
            .get(&collection)
            .copied()
            .unwrap_or(self.default_alpha)
    }
}

/// Market-data service the static tools call into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataServiceConfig {
    pub base_url: Option<String>,
    pub timeout_seconds: u64,
}

//
// ================= Tool Discovery =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    StreamableHttp,
    Stdio,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub url: String,
    #[serde(default = "default_transport")]
    pub transport: TransportKind,
}

fn default_transport() -> TransportKind {
    TransportKind::StreamableHttp
}

/// Discovery policy for one role. Absent or disabled means static tools
/// only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub servers: HashMap<String, ServerConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Role name → discovery policy, matching the on-disk discovery file.
    #[serde(default)]
    pub roles: HashMap<String, DiscoveryPolicy>,
    pub timeout_seconds: Option<u64>,
}

impl DiscoveryConfig {
    pub fn policy_for(&self, role: &str) -> Option<&DiscoveryPolicy> {
        self.roles.get(role)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalystConfig {
    pub market: bool,
    pub social: bool,
    pub news: bool,
    pub fundamentals: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let discovery = match env::var("DISCOVERY_CONFIG_PATH") {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path)?;
                serde_json::from_str(&raw)?
            }
            Err(_) => DiscoveryConfig::default(),
        };

        let config = Config {
            reasoning: ReasoningConfig {
                base_url: env::var("REASONING_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
                api_key: env::var("REASONING_API_KEY").ok(),
                timeout_seconds: parse_env("REASONING_TIMEOUT_SECONDS", 60)?,
            },
            memory: MemoryConfig {
                embedded: parse_env("MEMORY_EMBEDDED", true)?,
                embedding_url: env::var("EMBEDDING_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
                embedding_model: env::var("EMBEDDING_MODEL")
                    .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
                default_alpha: parse_env("MEMORY_ALPHA", 0.5f32)?,
                default_limit: parse_env("MEMORY_LIMIT", 2usize)?,
                alpha_overrides: HashMap::new(),
            },
            data: DataServiceConfig {
                base_url: env::var("MARKET_DATA_BASE_URL")
                    .ok()
                    .map(|u| u.trim_end_matches('/').to_string()),
                timeout_seconds: parse_env("MARKET_DATA_TIMEOUT_SECONDS", 30)?,
            },
            discovery,
            rounds: RoundLimits {
                researcher: parse_env("MAX_DEBATE_ROUNDS", 1u32)?,
                risk: parse_env("MAX_RISK_ROUNDS", 1u32)?,
            },
            models: ModelSelection {
                deep_think: env::var("DEEP_THINK_MODEL").unwrap_or_else(|_| "o4-mini".to_string()),
                quick_think: env::var("QUICK_THINK_MODEL")
                    .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            },
            analysts: AnalystConfig {
                market: parse_env("ANALYST_MARKET", true)?,
                social: parse_env("ANALYST_SOCIAL", true)?,
                news: parse_env("ANALYST_NEWS", true)?,
                fundamentals: parse_env("ANALYST_FUNDAMENTALS", true)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Fail-fast consistency check. Runs once at load and again at session
    /// creation for request-supplied round limits.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.memory.default_alpha) {
            return Err(CouncilError::Configuration(format!(
                "memory alpha must be in [0, 1], got {}",
                self.memory.default_alpha
            )));
        }
        for (collection, alpha) in &self.memory.alpha_overrides {
            if !(0.0..=1.0).contains(alpha) {
                return Err(CouncilError::Configuration(format!(
                    "alpha override for {} must be in [0, 1], got {}",
                    collection, alpha
                )));
            }
        }
        if self.memory.default_limit == 0 {
            return Err(CouncilError::Configuration(
                "memory limit must be at least 1".to_string(),
            ));
        }
        validate_rounds(&self.rounds)?;
        if self.reasoning.timeout_seconds == 0 {
            return Err(CouncilError::Configuration(
                "reasoning timeout must be positive".to_string(),
            ));
        }
        if !self.analysts.market
            && !self.analysts.social
            && !self.analysts.news
            && !self.analysts.fundamentals
        {
            return Err(CouncilError::Configuration(
                "at least one analyst role must be enabled".to_string(),
            ));
        }
        Ok(())
    }
}

/// Round limits must allow at least one round per debate.
pub fn validate_rounds(rounds: &RoundLimits) -> Result<()> {
    if rounds.researcher == 0 || rounds.risk == 0 {
        return Err(CouncilError::Configuration(format!(
            "round limits must be at least 1 (researcher={}, risk={})",
            rounds.researcher, rounds.risk
        )));
    }
    Ok(())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| CouncilError::Configuration(format!("invalid {} value: {}", key, e))),
        Err(_) => Ok(default),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reasoning: ReasoningConfig {
                base_url: "https://api.openai.com/v1".to_string(),
                api_key: None,
                timeout_seconds: 60,
            },
            memory: MemoryConfig {
                embedded: true,
                embedding_url: "https://api.openai.com/v1".to_string(),
                embedding_model: "text-embedding-3-small".to_string(),
                default_alpha: 0.5,
                default_limit: 2,
                alpha_overrides: HashMap::new(),
            },
            data: DataServiceConfig {
                base_url: None,
                timeout_seconds: 30,
            },
            discovery: DiscoveryConfig::default(),
            rounds: RoundLimits {
                researcher: 1,
                risk: 1,
            },
            models: ModelSelection {
                deep_think: "o4-mini".to_string(),
                quick_think: "gpt-4o-mini".to_string(),
            },
            analysts: AnalystConfig {
                market: true,
                social: true,
                news: true,
                fundamentals: true,
            },
        }
    }
}
