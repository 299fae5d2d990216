//! Gate-failure and provider-failover scenarios (spec §8).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use charter_engine::config::EngineConfig;
use charter_engine::conversation::ResponseSource;
use charter_engine::orchestrator::Orchestrator;
use charter_engine::router::{
    CompletionRequest, CompletionResponse, LlmProvider, ProviderModel, Router, RouterError, RouterResult, Tier,
};
use charter_engine::store::StateStore;

struct FixedSource;

#[async_trait::async_trait]
impl ResponseSource for FixedSource {
    async fn next_response(&mut self, _question: &str) -> String {
        "a thorough, specific answer".to_string()
    }
}

/// Always scores well but synthesizes a ProblemStatement missing its
/// mandatory business_objective field — exercises the stage-gate block.
struct IncompleteSynthesisProvider;

#[async_trait::async_trait]
impl LlmProvider for IncompleteSynthesisProvider {
    async fn complete(
        &self,
        provider_model: &ProviderModel,
        request: &CompletionRequest,
    ) -> RouterResult<CompletionResponse> {
        let content = if request.system_prompt.contains("0-10 scale") {
            r#"{"score": 9, "issues": [], "rationale": "fine"}"#.to_string()
        } else {
            // business_objective deliberately left blank.
            r#"{"business_objective": "", "ai_necessity_justification": "rules plateaued",
                "input_features": ["tenure", "usage"], "target_output": "churn_probability",
                "ml_archetype": "classification", "out_of_scope": "pricing", "constraints": "batch"}"#
                .to_string()
        };
        Ok(CompletionResponse { content, provider_model: provider_model.clone(), usage: Default::default() })
    }
}

#[tokio::test]
async fn incomplete_deliverable_blocks_the_stage_gate() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(StateStore::open(dir.path()).unwrap());

    let mut providers: HashMap<String, Box<dyn LlmProvider>> = HashMap::new();
    providers.insert("scripted".to_string(), Box::new(IncompleteSynthesisProvider));

    let mut config = EngineConfig::default();
    let pm = ProviderModel::new("scripted", "test-model");
    config.router.fast = vec![pm.clone()];
    config.router.balanced = vec![pm];

    let router = Arc::new(Router::new(config.router.clone(), providers));
    let orchestrator = Orchestrator::new(store, router, config);

    let session = orchestrator
        .create_session("bob".to_string(), "Fraud Detection".to_string())
        .await
        .unwrap();

    let mut source = FixedSource;
    orchestrator.run_stage(&session.id, &mut source).await.unwrap();
    let validation = orchestrator.advance_stage(&session.id).await.unwrap();
    assert!(!validation.can_proceed);
    assert!(validation.missing_fields.contains(&"business_objective".to_string()));

    // The session must not have advanced past stage 1.
    let reloaded = orchestrator.resume_session(&session.id).await.unwrap();
    assert_eq!(reloaded.current_stage, 1);
}

/// Fails on its first call, then succeeds — exercises the Router's
/// fallback chain moving past a broken primary to a healthy secondary.
struct FlakyThenHealthyProvider {
    call_count: Mutex<u32>,
}

#[async_trait::async_trait]
impl LlmProvider for FlakyThenHealthyProvider {
    async fn complete(
        &self,
        provider_model: &ProviderModel,
        _request: &CompletionRequest,
    ) -> RouterResult<CompletionResponse> {
        let mut count = self.call_count.lock().unwrap();
        *count += 1;
        Err(RouterError::Http(provider_model.clone(), "simulated primary outage".to_string()))
    }
}

struct HealthySecondaryProvider;

#[async_trait::async_trait]
impl LlmProvider for HealthySecondaryProvider {
    async fn complete(
        &self,
        provider_model: &ProviderModel,
        _request: &CompletionRequest,
    ) -> RouterResult<CompletionResponse> {
        Ok(CompletionResponse {
            content: r#"{"score": 8, "issues": [], "rationale": "ok"}"#.to_string(),
            provider_model: provider_model.clone(),
            usage: Default::default(),
        })
    }
}

#[tokio::test]
async fn router_falls_back_to_secondary_after_primary_exhausts_retries() {
    let mut providers: HashMap<String, Box<dyn LlmProvider>> = HashMap::new();
    providers.insert("broken".to_string(), Box::new(FlakyThenHealthyProvider { call_count: Mutex::new(0) }));
    providers.insert("healthy".to_string(), Box::new(HealthySecondaryProvider));

    let mut config = EngineConfig::default();
    config.router.retry.attempts = 1;
    config.router.fast = vec![
        ProviderModel::new("broken", "primary-model"),
        ProviderModel::new("healthy", "secondary-model"),
    ];

    let router = Router::new(config.router, providers);
    let request = CompletionRequest {
        system_prompt: "Score the response to the interview question on a 0-10 scale.".to_string(),
        user_content: "hello".to_string(),
        max_tokens: 100,
        temperature: 0.0,
    };

    let response = router.complete(Tier::Fast, &request).await.unwrap();
    assert_eq!(response.provider_model.provider, "healthy");
}
