//! Immutable configuration snapshot for the engine.
//!
//! Built once at construction from environment-variable overrides layered
//! over struct defaults — no ambient singletons, no reload except process
//! restart (spec §9 Design Notes).

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::router::{ProviderModel, Tier};

const ENV_DB_PATH: &str = "CHARTER_DB_PATH";
const ENV_QUALITY_THRESHOLD: &str = "CHARTER_QUALITY_THRESHOLD";
const ENV_MAX_ATTEMPTS: &str = "CHARTER_MAX_ATTEMPTS";
const ENV_COST_OPTIMIZE: &str = "CHARTER_COST_OPTIMIZE";
const ENV_RETRY_ATTEMPTS: &str = "CHARTER_RETRY_ATTEMPTS";

/// Retry/backoff knobs for the LLM Router (spec §4.B).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per (provider, model) pair before falling back.
    pub attempts: u32,
    pub base_backoff: Duration,
    pub backoff_factor: f64,
    pub jitter_fraction: f64,
    pub backoff_cap: Duration,
    /// Per-attempt timeout (tier-specific overrides permitted via `tier_timeouts`).
    pub timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: env::var(ENV_RETRY_ATTEMPTS)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            base_backoff: Duration::from_millis(500),
            backoff_factor: 2.0,
            jitter_fraction: 0.2,
            backoff_cap: Duration::from_secs(8),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Per-tier fallback chains, grounded on the teacher's per-role model config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub fast: Vec<ProviderModel>,
    pub balanced: Vec<ProviderModel>,
    pub powerful: Vec<ProviderModel>,
    pub local: Vec<ProviderModel>,
    pub cost_optimize: bool,
    pub retry: RetryConfig,
    pub circuit_failure_threshold: u32,
    pub circuit_cooldown_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            fast: vec![
                ProviderModel::new("local", "fast-small"),
                ProviderModel::new("openai", "gpt-fast"),
            ],
            balanced: vec![
                ProviderModel::new("openai", "gpt-balanced"),
                ProviderModel::new("anthropic", "claude-balanced"),
            ],
            powerful: vec![
                ProviderModel::new("anthropic", "claude-powerful"),
                ProviderModel::new("openai", "gpt-powerful"),
            ],
            local: vec![ProviderModel::new("local", "local-model")],
            cost_optimize: env::var(ENV_COST_OPTIMIZE)
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            retry: RetryConfig::default(),
            circuit_failure_threshold: 3,
            circuit_cooldown_secs: 60,
        }
    }
}

impl RouterConfig {
    pub fn chain_for(&self, tier: Tier) -> &[ProviderModel] {
        match tier {
            Tier::Fast => &self.fast,
            Tier::Balanced => &self.balanced,
            Tier::Powerful => &self.powerful,
            Tier::Local => &self.local,
        }
    }
}

/// Conversation Loop knobs (spec §4.D).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    pub max_attempts: u32,
    pub quality_threshold: u8,
    pub max_response_chars: usize,
    pub max_question_chars: usize,
    pub max_followup_chars: usize,
    pub evaluation_timeout: Duration,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_attempts: env::var(ENV_MAX_ATTEMPTS)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            quality_threshold: env::var(ENV_QUALITY_THRESHOLD)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(7),
            max_response_chars: 10_000,
            max_question_chars: 500,
            max_followup_chars: 2_000,
            evaluation_timeout: Duration::from_secs(30),
        }
    }
}

/// Top-level immutable configuration snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub db_path: String,
    pub router: RouterConfig,
    pub conversation: ConversationConfig,
    pub db_connection_pool_size: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: env::var(ENV_DB_PATH).unwrap_or_else(|_| "./charter-engine.db".to_string()),
            router: RouterConfig::default(),
            conversation: ConversationConfig::default(),
            db_connection_pool_size: 20,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Validate all sub-configs; mirrors the teacher's `ModeRunnerConfig::validate`.
    pub fn validate(&self) -> Result<(), String> {
        if self.conversation.quality_threshold > 10 {
            return Err(format!(
                "quality_threshold must be in [0, 10], got {}",
                self.conversation.quality_threshold
            ));
        }
        if self.conversation.max_attempts == 0 {
            return Err("max_attempts must be > 0".to_string());
        }
        if self.router.retry.attempts == 0 {
            return Err("router retry attempts must be > 0".to_string());
        }
        if self.db_connection_pool_size == 0 {
            return Err("db_connection_pool_size must be > 0".to_string());
        }
        Ok(())
    }
}
