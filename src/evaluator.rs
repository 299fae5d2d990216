//! Quality Evaluator (spec §4.C).
//!
//! Scores one user response in isolation. The input type deliberately has
//! no `session_id` field, so the cross-session-context privacy invariant
//! (H-3) is enforced by the type system rather than by caller discipline.

use serde::{Deserialize, Serialize};

use crate::router::{CompletionRequest, Router, RouterError, Tier};

/// Issue tags a low-quality response can be flagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Issue {
    TooVague,
    MissingMetrics,
    OffTopic,
    Ambiguous,
    Unsupported,
    Trivial,
    TooShort,
    Unparseable,
}

/// Context for a single evaluation call — no session id, no conversation
/// history beyond the current question, by design.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationContext {
    pub question: String,
    pub response: String,
    pub stage_number: u8,
}

/// The evaluator's verdict on one response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub score: u8,
    pub issues: Vec<Issue>,
    pub rationale: String,
}

impl QualityAssessment {
    fn unparseable() -> Self {
        Self {
            score: 0,
            issues: vec![Issue::Unparseable],
            rationale: "evaluator output did not parse as the expected JSON shape".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EvaluatorError {
    #[error("router error: {0}")]
    Router(#[from] RouterError),
}

#[derive(Deserialize)]
struct RawAssessment {
    score: u8,
    #[serde(default)]
    issues: Vec<Issue>,
    #[serde(default)]
    rationale: String,
}

/// Scores a response via the Router's FAST tier.
pub struct QualityEvaluator<'a> {
    router: &'a Router,
}

impl<'a> QualityEvaluator<'a> {
    pub fn new(router: &'a Router) -> Self {
        Self { router }
    }

    pub async fn evaluate(&self, ctx: &EvaluationContext) -> Result<QualityAssessment, EvaluatorError> {
        let system_prompt = "Score the response to the interview question on a 0-10 scale. \
            Reply with a JSON object: {\"score\": <0-10>, \"issues\": [...], \"rationale\": \"...\"}. \
            Valid issue tags: too_vague, missing_metrics, off_topic, ambiguous, unsupported, \
            trivial, too_short.";
        let user_content = format!(
            "Question: {}\nResponse: {}",
            ctx.question, ctx.response
        );

        let request = CompletionRequest {
            system_prompt: system_prompt.to_string(),
            user_content,
            max_tokens: 300,
            temperature: 0.0,
        };

        let response = self.router.complete(Tier::Fast, &request).await?;

        Ok(match serde_json::from_str::<RawAssessment>(&response.content) {
            Ok(raw) => QualityAssessment {
                score: raw.score.min(10),
                issues: raw.issues,
                rationale: raw.rationale,
            },
            Err(_) => QualityAssessment::unparseable(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{EchoProvider, LlmProvider};
    use std::collections::HashMap;

    fn router_with_echo() -> Router {
        let mut providers: HashMap<String, Box<dyn LlmProvider>> = HashMap::new();
        providers.insert("local".to_string(), Box::new(EchoProvider));
        let mut cfg = crate::config::RouterConfig::default();
        cfg.fast = vec![crate::router::ProviderModel::new("local", "fast-small")];
        Router::new(cfg, providers)
    }

    #[tokio::test]
    async fn unparseable_echo_response_yields_zero_score() {
        let router = router_with_echo();
        let evaluator = QualityEvaluator::new(&router);
        let ctx = EvaluationContext {
            question: "What is the business objective?".to_string(),
            response: "We want to reduce churn".to_string(),
            stage_number: 1,
        };
        let assessment = evaluator.evaluate(&ctx).await.unwrap();
        assert_eq!(assessment.score, 0);
        assert!(assessment.issues.contains(&Issue::Unparseable));
    }

    #[test]
    fn evaluation_context_has_no_session_id_field() {
        // compile-time privacy invariant: there is no field to grep for here.
        let ctx = EvaluationContext {
            question: "q".into(),
            response: "r".into(),
            stage_number: 1,
        };
        let _ = serde_json::to_value(&ctx).unwrap();
    }
}
