//! Circuit breaker and fallback ladder for LLM routing.
//!
//! Generalized from tracking failures per single model id to tracking
//! failures per `(provider, model)` pair, since a tier's fallback chain can
//! mix vendors.

use std::collections::HashMap;

use super::ProviderModel;

/// Circuit breaker state for a single provider/model pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Per-(provider, model) circuit breaker tracking consecutive failures.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    consecutive_failures: HashMap<ProviderModel, u32>,
    last_failure_secs: HashMap<ProviderModel, u64>,
    rate_limit_hits: HashMap<ProviderModel, u32>,
    rate_limit_until: HashMap<ProviderModel, u64>,
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown_secs: u64) -> Self {
        Self {
            consecutive_failures: HashMap::new(),
            last_failure_secs: HashMap::new(),
            rate_limit_hits: HashMap::new(),
            rate_limit_until: HashMap::new(),
            failure_threshold,
            cooldown_secs,
        }
    }

    pub fn record_success(&mut self, pm: &ProviderModel) {
        self.consecutive_failures.remove(pm);
        self.last_failure_secs.remove(pm);
        self.rate_limit_hits.remove(pm);
        self.rate_limit_until.remove(pm);
    }

    pub fn record_failure(&mut self, pm: &ProviderModel) {
        let count = self.consecutive_failures.entry(pm.clone()).or_insert(0);
        *count += 1;
        self.last_failure_secs.insert(pm.clone(), unix_now());
    }

    /// Record a 429 with exponential backoff: 2s, 4s, 8s, ... capped at 120s.
    pub fn record_rate_limit(&mut self, pm: &ProviderModel) {
        let hits = self.rate_limit_hits.entry(pm.clone()).or_insert(0);
        *hits += 1;
        let cooldown = 2u64
            .saturating_mul(2u64.saturating_pow((*hits).saturating_sub(1)))
            .min(120);
        self.rate_limit_until.insert(pm.clone(), unix_now() + cooldown);
        self.record_failure(pm);
    }

    pub fn rate_limit_cooldown(&self, pm: &ProviderModel) -> Option<u64> {
        let &until = self.rate_limit_until.get(pm)?;
        let now = unix_now();
        if now < until {
            Some(until - now)
        } else {
            None
        }
    }

    pub fn state(&self, pm: &ProviderModel) -> CircuitState {
        if self.rate_limit_cooldown(pm).is_some() {
            return CircuitState::Open;
        }
        let failures = self.consecutive_failures.get(pm).copied().unwrap_or(0);
        if failures < self.failure_threshold {
            return CircuitState::Closed;
        }
        let last = self.last_failure_secs.get(pm).copied().unwrap_or(0);
        if unix_now().saturating_sub(last) >= self.cooldown_secs {
            CircuitState::HalfOpen
        } else {
            CircuitState::Open
        }
    }

    pub fn is_available(&self, pm: &ProviderModel) -> bool {
        !matches!(self.state(pm), CircuitState::Open)
    }

    pub fn failure_count(&self, pm: &ProviderModel) -> u32 {
        self.consecutive_failures.get(pm).copied().unwrap_or(0)
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(3, 60)
    }
}

/// Ordered fallback ladder over a tier's provider/model chain.
#[derive(Debug, Clone)]
pub struct FallbackLadder {
    models: Vec<ProviderModel>,
}

impl FallbackLadder {
    pub fn new(models: Vec<ProviderModel>) -> Self {
        Self { models }
    }

    /// Every entry in the ladder whose circuit is not open, in order.
    pub fn available(&self, breaker: &CircuitBreaker) -> Vec<ProviderModel> {
        self.models
            .iter()
            .filter(|pm| breaker.is_available(pm))
            .cloned()
            .collect()
    }

    pub fn models(&self) -> &[ProviderModel] {
        &self.models
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pm(p: &str, m: &str) -> ProviderModel {
        ProviderModel::new(p, m)
    }

    #[test]
    fn circuit_starts_closed() {
        let cb = CircuitBreaker::default();
        let model = pm("openai", "gpt-fast");
        assert_eq!(cb.state(&model), CircuitState::Closed);
        assert!(cb.is_available(&model));
    }

    #[test]
    fn circuit_opens_after_threshold() {
        let mut cb = CircuitBreaker::new(2, 9999);
        let model = pm("openai", "gpt-fast");
        cb.record_failure(&model);
        assert_eq!(cb.state(&model), CircuitState::Closed);
        cb.record_failure(&model);
        assert_eq!(cb.state(&model), CircuitState::Open);
        assert!(!cb.is_available(&model));
    }

    #[test]
    fn success_resets_circuit() {
        let mut cb = CircuitBreaker::new(2, 9999);
        let model = pm("anthropic", "claude-balanced");
        cb.record_failure(&model);
        cb.record_failure(&model);
        assert_eq!(cb.state(&model), CircuitState::Open);
        cb.record_success(&model);
        assert_eq!(cb.state(&model), CircuitState::Closed);
    }

    #[test]
    fn rate_limit_backoff_doubles() {
        let mut cb = CircuitBreaker::new(99, 60);
        let model = pm("openai", "gpt-fast");
        cb.record_rate_limit(&model);
        let first = cb.rate_limit_cooldown(&model).unwrap();
        assert!(first <= 2);
        cb.record_rate_limit(&model);
        let second = cb.rate_limit_cooldown(&model).unwrap();
        assert!(second <= 4);
    }

    #[test]
    fn fallback_ladder_skips_open_circuits() {
        let mut cb = CircuitBreaker::new(1, 9999);
        let a = pm("local", "fast-small");
        let b = pm("openai", "gpt-fast");
        cb.record_failure(&a);
        let ladder = FallbackLadder::new(vec![a.clone(), b.clone()]);
        let available = ladder.available(&cb);
        assert_eq!(available, vec![b]);
    }
}
