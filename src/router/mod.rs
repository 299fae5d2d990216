//! LLM Router (spec §4.B).
//!
//! Routes a completion request to the first available provider/model in a
//! tier's fallback chain, retrying with exponential backoff before moving to
//! the next chain entry, and tripping a per-pair circuit breaker on
//! repeated failure.

pub mod circuit_breaker;

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};

pub use circuit_breaker::{CircuitBreaker, CircuitState, FallbackLadder};

use crate::config::RouterConfig;

/// Routing tier, matching spec §4.B's FAST/BALANCED/POWERFUL/LOCAL ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Fast,
    Balanced,
    Powerful,
    Local,
}

/// One entry in a tier's fallback chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderModel {
    pub provider: String,
    pub model: String,
}

impl ProviderModel {
    pub fn new(provider: &str, model: &str) -> Self {
        Self {
            provider: provider.to_string(),
            model: model.to_string(),
        }
    }
}

impl std::fmt::Display for ProviderModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// Errors surfaced by the Router.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("http error calling {0}: {1}")]
    Http(ProviderModel, String),

    #[error("rate limited by {0}")]
    RateLimited(ProviderModel),

    #[error("request to {0} timed out")]
    Timeout(ProviderModel),

    #[error("malformed request to {0}: {1}")]
    MalformedRequest(ProviderModel, String),

    #[error("all providers exhausted for tier {0:?}")]
    Exhausted(Tier),
}

pub type RouterResult<T> = Result<T, RouterError>;

/// A single chat-style completion request.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_content: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Usage accounting returned alongside a completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// A completed response from a provider.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub provider_model: ProviderModel,
    pub usage: Usage,
}

/// Abstraction over a single vendor's completion call.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(
        &self,
        provider_model: &ProviderModel,
        request: &CompletionRequest,
    ) -> RouterResult<CompletionResponse>;
}

/// OpenAI-chat-compatible HTTP provider — the one concrete vendor wire
/// protocol this crate implements (additional vendors plug in via
/// [`LlmProvider`] without touching the router).
pub struct HttpProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageOut,
}

#[derive(Deserialize)]
struct ChatMessageOut {
    content: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

impl HttpProvider {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> RouterResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| {
                RouterError::Http(ProviderModel::new("http", "client"), e.to_string())
            })?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key,
        })
    }
}

#[async_trait]
impl LlmProvider for HttpProvider {
    async fn complete(
        &self,
        provider_model: &ProviderModel,
        request: &CompletionRequest,
    ) -> RouterResult<CompletionResponse> {
        let body = ChatRequest {
            model: provider_model.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: request.system_prompt.clone(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: request.user_content.clone(),
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let mut req = self.http.post(&self.base_url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| RouterError::Http(provider_model.clone(), e.to_string()))?;

        if response.status().as_u16() == 429 {
            return Err(RouterError::RateLimited(provider_model.clone()));
        }
        if response.status().is_client_error() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(RouterError::MalformedRequest(
                provider_model.clone(),
                format!("HTTP {}: {}", status, text),
            ));
        }
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(RouterError::Http(
                provider_model.clone(),
                format!("HTTP {}: {}", status, text),
            ));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| RouterError::Http(provider_model.clone(), e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        let usage = parsed
            .usage
            .map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            content,
            provider_model: provider_model.clone(),
            usage,
        })
    }
}

/// Deterministic, no-network provider used for the LOCAL tier and tests.
pub struct EchoProvider;

#[async_trait]
impl LlmProvider for EchoProvider {
    async fn complete(
        &self,
        provider_model: &ProviderModel,
        request: &CompletionRequest,
    ) -> RouterResult<CompletionResponse> {
        Ok(CompletionResponse {
            content: format!("{{\"echo\": {:?}}}", request.user_content),
            provider_model: provider_model.clone(),
            usage: Usage::default(),
        })
    }
}

/// Routes completions across a tier's fallback chain with circuit-breaker
/// backed retry.
pub struct Router {
    config: RouterConfig,
    providers: HashMap<String, Box<dyn LlmProvider>>,
    breaker: RwLock<CircuitBreaker>,
}

impl Router {
    pub fn new(config: RouterConfig, providers: HashMap<String, Box<dyn LlmProvider>>) -> Self {
        let breaker = CircuitBreaker::new(config.circuit_failure_threshold, config.circuit_cooldown_secs);
        Self {
            config,
            providers,
            breaker: RwLock::new(breaker),
        }
    }

    /// Cost-optimized ordering: cheapest (local) first for FAST, most
    /// capable (non-local) first for POWERFUL — the opposite direction.
    /// Pure function of the static chain — no per-session state.
    fn ordered_chain(&self, tier: Tier) -> Vec<ProviderModel> {
        let chain = self.config.chain_for(tier).to_vec();
        if !self.config.cost_optimize {
            return chain;
        }
        match tier {
            Tier::Fast => {
                let mut c = chain;
                c.sort_by_key(|pm| pm.provider != "local");
                c
            }
            Tier::Powerful => {
                let mut c = chain;
                c.sort_by_key(|pm| pm.provider == "local");
                c
            }
            _ => chain,
        }
    }

    pub async fn complete(&self, tier: Tier, request: &CompletionRequest) -> RouterResult<CompletionResponse> {
        let chain = self.ordered_chain(tier);
        if chain.is_empty() {
            return Err(RouterError::Exhausted(tier));
        }

        for provider_model in &chain {
            let available = {
                let breaker = self.breaker.read().unwrap();
                breaker.is_available(provider_model)
            };
            if !available {
                continue;
            }

            let Some(provider) = self.providers.get(&provider_model.provider) else {
                continue;
            };

            match self.call_with_retry(provider.as_ref(), provider_model, request).await {
                Ok(response) => {
                    self.breaker.write().unwrap().record_success(provider_model);
                    return Ok(response);
                }
                Err(e) => {
                    tracing::warn!(provider = %provider_model, error = %e, "provider attempt failed");
                    let mut breaker = self.breaker.write().unwrap();
                    match &e {
                        RouterError::RateLimited(_) => breaker.record_rate_limit(provider_model),
                        _ => breaker.record_failure(provider_model),
                    }
                }
            }
        }

        Err(RouterError::Exhausted(tier))
    }

    async fn call_with_retry(
        &self,
        provider: &dyn LlmProvider,
        provider_model: &ProviderModel,
        request: &CompletionRequest,
    ) -> RouterResult<CompletionResponse> {
        let retry = &self.config.retry;
        let mut last_err = RouterError::Exhausted(Tier::Fast);

        for attempt in 0..retry.attempts {
            let call = provider.complete(provider_model, request);
            match tokio::time::timeout(retry.timeout, call).await {
                Ok(Ok(response)) => return Ok(response),
                // Malformed-request 4xx errors (other than 429) are not
                // retryable — fail over to the next chain entry immediately
                // instead of spending the retry budget (spec §4.B, §7).
                Ok(Err(e @ RouterError::MalformedRequest(..))) => return Err(e),
                Ok(Err(e)) => last_err = e,
                Err(_) => last_err = RouterError::Timeout(provider_model.clone()),
            }

            if attempt + 1 < retry.attempts {
                let backoff = retry.base_backoff.mul_f64(retry.backoff_factor.powi(attempt as i32));
                let backoff = backoff.min(retry.backoff_cap);
                let jitter = 1.0 + rand::thread_rng().gen_range(-retry.jitter_fraction..=retry.jitter_fraction);
                let sleep_for = Duration::from_secs_f64((backoff.as_secs_f64() * jitter).max(0.0));
                tokio::time::sleep(sleep_for).await;
            }
        }

        Err(last_err)
    }
}
