//! End-to-end happy path: five stages interviewed and gated, then a charter
//! generated (spec §8 "all gates pass" scenario).

use std::collections::HashMap;
use std::sync::Arc;

use charter_engine::config::EngineConfig;
use charter_engine::conversation::ResponseSource;
use charter_engine::orchestrator::Orchestrator;
use charter_engine::router::{CompletionRequest, CompletionResponse, LlmProvider, ProviderModel, Router, RouterResult};
use charter_engine::store::{GovernanceDecision, StateStore};

/// Returns a score-9 evaluation for every response, and a well-formed
/// synthesis JSON keyed off a keyword in the system prompt.
struct ScriptedProvider;

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(
        &self,
        provider_model: &ProviderModel,
        request: &CompletionRequest,
    ) -> RouterResult<CompletionResponse> {
        let content = if request.system_prompt.contains("0-10 scale") {
            r#"{"score": 9, "issues": [], "rationale": "clear and specific"}"#.to_string()
        } else if request.system_prompt.contains("ProblemStatement") {
            r#"{"business_objective": "reduce churn", "ai_necessity_justification": "rules plateaued",
                "input_features": ["tenure", "usage", "support_tickets"], "target_output": "churn_probability",
                "ml_archetype": "classification", "out_of_scope": "pricing changes", "constraints": "monthly batch"}"#
                .to_string()
        } else if request.system_prompt.contains("MetricAlignment") {
            r#"{"business_kpis": [{"name": "retention_rate", "baseline": "80%", "target": "85%", "cadence": "monthly"}],
                "ml_metrics": [{"name": "auc", "acceptable_range": [0.7, 1.0]}, {"name": "f1", "acceptable_range": [0.6, 1.0]}],
                "alignments": [{"ml_metric": "auc", "kpis": ["retention_rate"]}], "tradeoffs": "precision vs recall"}"#
                .to_string()
        } else if request.system_prompt.contains("DataQualityScorecard") {
            r#"{"availability_report": "data warehouse has 2 years of history",
                "dimension_scores": {"completeness": 0.9, "accuracy": 0.9, "consistency": 0.85,
                "timeliness": 0.8, "validity": 0.9, "uniqueness": 0.95},
                "overall_score": 0.8833333333333333, "gaps": []}"#
                .to_string()
        } else if request.system_prompt.contains("UserContext") {
            r#"{"primary_users": [{"name": "retention team", "description": "marketing ops"}],
                "proficiency": "intermediate", "decision_loop": "human_in_loop",
                "explainability_requirements": "top feature drivers per prediction",
                "unintended_consequences": "over-targeting loyal customers with retention offers"}"#
                .to_string()
        } else {
            r#"{"human_agency": {"initial_risk": 2, "mitigations": "human review of all offers", "residual_risk": 1},
                "technical_robustness": {"initial_risk": 2, "mitigations": "monitoring and rollback plan", "residual_risk": 1},
                "privacy": {"initial_risk": 3, "mitigations": "pseudonymized features", "residual_risk": 2},
                "transparency": {"initial_risk": 2, "mitigations": "model card published", "residual_risk": 1},
                "fairness": {"initial_risk": 3, "mitigations": "per-segment fairness audit", "residual_risk": 2}}"#
                .to_string()
        };

        Ok(CompletionResponse {
            content,
            provider_model: provider_model.clone(),
            usage: Default::default(),
        })
    }
}

struct FixedSource;

#[async_trait::async_trait]
impl ResponseSource for FixedSource {
    async fn next_response(&mut self, _question: &str) -> String {
        "a thorough, specific answer covering every part of the question".to_string()
    }
}

fn test_orchestrator(dir: &tempfile::TempDir) -> Orchestrator {
    let store = Arc::new(StateStore::open(dir.path()).unwrap());
    let mut providers: HashMap<String, Box<dyn LlmProvider>> = HashMap::new();
    providers.insert("scripted".to_string(), Box::new(ScriptedProvider));

    let mut config = EngineConfig::default();
    let pm = ProviderModel::new("scripted", "test-model");
    config.router.fast = vec![pm.clone()];
    config.router.balanced = vec![pm.clone()];
    config.router.powerful = vec![pm];

    let router = Arc::new(Router::new(config.router.clone(), providers));
    Orchestrator::new(store, router, config)
}

#[tokio::test]
async fn full_interview_produces_a_charter() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = test_orchestrator(&dir);

    let session = orchestrator
        .create_session("alice".to_string(), "Churn Reduction".to_string())
        .await
        .unwrap();

    let mut source = FixedSource;
    for expected_stage in 1..=5u8 {
        orchestrator.run_stage(&session.id, &mut source).await.unwrap();
        let validation = orchestrator.advance_stage(&session.id).await.unwrap();
        assert_eq!(validation.stage_number, expected_stage);
        assert!(validation.can_proceed);
    }

    let status = orchestrator.resume_session(&session.id).await.unwrap();
    assert_eq!(status.current_stage, 6);

    let charter = orchestrator.generate_charter(&session.id).await.unwrap();
    assert_eq!(charter.project_name, "Churn Reduction");
    assert!(matches!(
        charter.governance_decision,
        GovernanceDecision::Proceed | GovernanceDecision::ProceedWithMonitoring
    ));
    assert!(!charter.critical_success_factors.is_empty());
}
