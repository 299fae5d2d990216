//! Stage Agents (spec §4.E): five agents, each owning a declarative
//! question plan and a synthesis step that turns a completed interview
//! into its typed deliverable.

use serde::Deserialize;

use crate::consistency::governance_decision;
use crate::conversation::{ConversationError, ConversationLoop, ResponseSource};
use crate::router::{CompletionRequest, Router, RouterError, Tier};
use crate::store::*;

/// One question in a stage's interview, addressed by a stable id so
/// re-asks and audit logs can reference it without string-matching text.
#[derive(Debug, Clone, Copy)]
pub struct QuestionTemplate {
    pub id: &'static str,
    pub text: &'static str,
}

/// An ordered set of question groups for one stage — data, not control flow.
#[derive(Debug, Clone, Copy)]
pub struct QuestionPlan {
    pub stage_number: u8,
    pub groups: &'static [&'static [QuestionTemplate]],
}

#[derive(Debug, thiserror::Error)]
pub enum StageAgentError {
    #[error("conversation error: {0}")]
    Conversation(#[from] ConversationError),

    #[error("router error: {0}")]
    Router(#[from] RouterError),

    #[error("stage synthesis failed after retry: {0}")]
    SynthesisFailed(String),
}

/// Transcript accumulated while conducting a stage's interview, fed to the
/// stage's synthesis call.
pub struct InterviewTranscript {
    pub qa_pairs: Vec<(String, String)>,
    pub turns: Vec<ConversationTurn>,
}

impl InterviewTranscript {
    fn render(&self) -> String {
        self.qa_pairs
            .iter()
            .map(|(q, a)| format!("Q: {}\nA: {}", q, a))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Drives every question in `plan` through the Conversation Loop, in order.
pub async fn conduct_interview<'a>(
    plan: &QuestionPlan,
    conversation: &ConversationLoop<'a>,
    source: &mut dyn ResponseSource,
    session_id: &str,
) -> Result<InterviewTranscript, StageAgentError> {
    let mut qa_pairs = Vec::new();
    let mut all_turns = Vec::new();
    let mut seq = 0u64;

    for group in plan.groups {
        for question in *group {
            let result = conversation
                .ask(source, session_id, question.text, plan.stage_number, seq)
                .await?;
            seq += result.turns.len() as u64;
            qa_pairs.push((question.text.to_string(), result.final_response));
            all_turns.extend(result.turns);
        }
    }

    Ok(InterviewTranscript { qa_pairs, turns: all_turns })
}

async fn synthesize_typed<T: for<'de> Deserialize<'de>>(
    router: &Router,
    tier: Tier,
    system_prompt: &str,
    transcript: &InterviewTranscript,
) -> Result<T, StageAgentError> {
    let request = CompletionRequest {
        system_prompt: system_prompt.to_string(),
        user_content: transcript.render(),
        max_tokens: 1200,
        temperature: 0.1,
    };

    let mut last_err = String::new();
    for _ in 0..2 {
        let response = router.complete(tier, &request).await?;
        match serde_json::from_str::<T>(&response.content) {
            Ok(value) => return Ok(value),
            Err(e) => last_err = e.to_string(),
        }
    }
    Err(StageAgentError::SynthesisFailed(last_err))
}

pub const STAGE1_PLAN: QuestionPlan = QuestionPlan {
    stage_number: 1,
    groups: &[&[
        QuestionTemplate { id: "objective", text: "What business objective is this project meant to achieve?" },
        QuestionTemplate { id: "necessity", text: "Why does achieving this require machine learning rather than a simpler rule-based approach?" },
        QuestionTemplate { id: "inputs", text: "What data would be available as model input, and what exact output should it produce?" },
        QuestionTemplate { id: "scope", text: "What is explicitly out of scope, and what constraints (budget, latency, compliance) apply?" },
    ]],
};

pub struct Stage1Agent;

impl Stage1Agent {
    pub fn plan(&self) -> &'static QuestionPlan {
        &STAGE1_PLAN
    }

    pub async fn synthesize(
        &self,
        transcript: &InterviewTranscript,
        router: &Router,
    ) -> Result<StageDeliverable, StageAgentError> {
        let prompt = "From this interview, produce a JSON ProblemStatement: \
            {\"business_objective\": str, \"ai_necessity_justification\": str, \
            \"input_features\": [str, ...] (at least two), \"target_output\": str, \
            \"ml_archetype\": one of classification|regression|timeseries|anomaly|clustering|nlp|vision|recommendation, \
            \"out_of_scope\": str, \"constraints\": str}";
        let statement: ProblemStatement = synthesize_typed(router, Tier::Balanced, prompt, transcript).await?;
        Ok(StageDeliverable::ProblemStatement(statement))
    }
}

pub const STAGE2_PLAN: QuestionPlan = QuestionPlan {
    stage_number: 2,
    groups: &[&[
        QuestionTemplate { id: "kpis", text: "What business KPIs, with baselines and targets, will this project move?" },
        QuestionTemplate { id: "ml_metrics", text: "What ML metrics and acceptable ranges will you track during model development?" },
        QuestionTemplate { id: "alignment", text: "How does each ML metric connect to one or more of the business KPIs above?" },
        QuestionTemplate { id: "tradeoffs", text: "What tradeoffs exist between optimizing the ML metrics and the business KPIs?" },
    ]],
};

pub struct Stage2Agent;

impl Stage2Agent {
    pub fn plan(&self) -> &'static QuestionPlan {
        &STAGE2_PLAN
    }

    pub async fn synthesize(
        &self,
        transcript: &InterviewTranscript,
        router: &Router,
    ) -> Result<StageDeliverable, StageAgentError> {
        let prompt = "From this interview, produce a JSON MetricAlignment: \
            {\"business_kpis\": [{\"name\": str, \"baseline\": str, \"target\": str, \"cadence\": str}, ...], \
            \"ml_metrics\": [{\"name\": str, \"acceptable_range\": [lo, hi]}, ...] (at least two), \
            \"alignments\": [{\"ml_metric\": str, \"kpis\": [str, ...]}, ...], \"tradeoffs\": str}";
        let alignment: MetricAlignment = synthesize_typed(router, Tier::Balanced, prompt, transcript).await?;
        Ok(StageDeliverable::MetricAlignment(alignment))
    }
}

pub const STAGE3_PLAN: QuestionPlan = QuestionPlan {
    stage_number: 3,
    groups: &[&[
        QuestionTemplate { id: "availability", text: "What data sources exist for this project, and are they currently accessible?" },
        QuestionTemplate { id: "dimensions", text: "Rate the data's completeness, accuracy, consistency, timeliness, validity, and uniqueness from 0 to 1, with justification." },
        QuestionTemplate { id: "gaps", text: "What data gaps exist, and how could each be mitigated?" },
    ]],
};

pub struct Stage3Agent;

impl Stage3Agent {
    pub fn plan(&self) -> &'static QuestionPlan {
        &STAGE3_PLAN
    }

    pub async fn synthesize(
        &self,
        transcript: &InterviewTranscript,
        router: &Router,
    ) -> Result<StageDeliverable, StageAgentError> {
        let prompt = "From this interview, produce a JSON DataQualityScorecard: \
            {\"availability_report\": str, \
            \"dimension_scores\": {\"completeness\": 0-1, \"accuracy\": 0-1, \"consistency\": 0-1, \
            \"timeliness\": 0-1, \"validity\": 0-1, \"uniqueness\": 0-1}, \
            \"overall_score\": 0-1 (the mean of the six dimension scores), \
            \"gaps\": [{\"description\": str, \"mitigation\": str}, ...]}";
        let scorecard: DataQualityScorecard = synthesize_typed(router, Tier::Balanced, prompt, transcript).await?;
        Ok(StageDeliverable::DataQualityScorecard(scorecard))
    }
}

pub const STAGE4_PLAN: QuestionPlan = QuestionPlan {
    stage_number: 4,
    groups: &[&[
        QuestionTemplate { id: "users", text: "Who are the primary users of this system's output, and what is their technical proficiency?" },
        QuestionTemplate { id: "decision_loop", text: "Will the model's output be fully automated, require a human in the loop, or be purely advisory?" },
        QuestionTemplate { id: "explainability", text: "What explainability requirements do the users or regulators impose?" },
        QuestionTemplate { id: "consequences", text: "What unintended consequences could this system have for its users?" },
    ]],
};

pub struct Stage4Agent;

impl Stage4Agent {
    pub fn plan(&self) -> &'static QuestionPlan {
        &STAGE4_PLAN
    }

    pub async fn synthesize(
        &self,
        transcript: &InterviewTranscript,
        router: &Router,
    ) -> Result<StageDeliverable, StageAgentError> {
        let prompt = "From this interview, produce a JSON UserContext: \
            {\"primary_users\": [{\"name\": str, \"description\": str}, ...], \"proficiency\": str, \
            \"decision_loop\": one of automated|human_in_loop|advisory, \
            \"explainability_requirements\": str, \"unintended_consequences\": str}";
        let context: UserContext = synthesize_typed(router, Tier::Balanced, prompt, transcript).await?;
        Ok(StageDeliverable::UserContext(context))
    }
}

pub const STAGE5_PLAN: QuestionPlan = QuestionPlan {
    stage_number: 5,
    groups: &[&[
        QuestionTemplate { id: "agency", text: "How does this system preserve human agency and oversight?" },
        QuestionTemplate { id: "robustness", text: "What technical robustness and safety measures are in place?" },
        QuestionTemplate { id: "privacy", text: "What privacy and data-governance risks does this system carry?" },
        QuestionTemplate { id: "transparency", text: "How transparent is the system's behavior to the people affected by it?" },
        QuestionTemplate { id: "fairness", text: "What fairness risks could arise across different user groups?" },
    ]],
};

#[derive(Deserialize)]
struct RawPrincipleAssessment {
    initial_risk: u8,
    mitigations: String,
    residual_risk: u8,
}

#[derive(Deserialize)]
struct RawEthicalRiskReport {
    human_agency: RawPrincipleAssessment,
    technical_robustness: RawPrincipleAssessment,
    privacy: RawPrincipleAssessment,
    transparency: RawPrincipleAssessment,
    fairness: RawPrincipleAssessment,
}

pub struct Stage5Agent;

impl Stage5Agent {
    pub fn plan(&self) -> &'static QuestionPlan {
        &STAGE5_PLAN
    }

    pub async fn synthesize(
        &self,
        transcript: &InterviewTranscript,
        router: &Router,
    ) -> Result<StageDeliverable, StageAgentError> {
        let prompt = "From this interview, produce a JSON risk assessment across the five AI \
            ethics principles, each with an initial_risk (1-5), mitigations, and residual_risk \
            (1-5, must not exceed initial_risk): {\"human_agency\": {...}, \
            \"technical_robustness\": {...}, \"privacy\": {...}, \"transparency\": {...}, \
            \"fairness\": {...}}";
        let raw: RawEthicalRiskReport = synthesize_typed(router, Tier::Powerful, prompt, transcript).await?;

        let mut principles = std::collections::HashMap::new();
        principles.insert(Principle::HumanAgency, PrincipleAssessment {
            initial_risk: raw.human_agency.initial_risk,
            mitigations: raw.human_agency.mitigations,
            residual_risk: raw.human_agency.residual_risk,
        });
        principles.insert(Principle::TechnicalRobustness, PrincipleAssessment {
            initial_risk: raw.technical_robustness.initial_risk,
            mitigations: raw.technical_robustness.mitigations,
            residual_risk: raw.technical_robustness.residual_risk,
        });
        principles.insert(Principle::Privacy, PrincipleAssessment {
            initial_risk: raw.privacy.initial_risk,
            mitigations: raw.privacy.mitigations,
            residual_risk: raw.privacy.residual_risk,
        });
        principles.insert(Principle::Transparency, PrincipleAssessment {
            initial_risk: raw.transparency.initial_risk,
            mitigations: raw.transparency.mitigations,
            residual_risk: raw.transparency.residual_risk,
        });
        principles.insert(Principle::Fairness, PrincipleAssessment {
            initial_risk: raw.fairness.initial_risk,
            mitigations: raw.fairness.mitigations,
            residual_risk: raw.fairness.residual_risk,
        });

        let mut report = EthicalRiskReport {
            principles,
            governance_decision: GovernanceDecision::Proceed,
        };
        report.governance_decision = governance_decision(&report);
        Ok(StageDeliverable::EthicalRiskReport(report))
    }
}

/// Returns the question plan for a given stage number, 1..=5.
pub fn plan_for_stage(stage: u8) -> Option<&'static QuestionPlan> {
    match stage {
        1 => Some(&STAGE1_PLAN),
        2 => Some(&STAGE2_PLAN),
        3 => Some(&STAGE3_PLAN),
        4 => Some(&STAGE4_PLAN),
        5 => Some(&STAGE5_PLAN),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_stage_has_a_registered_plan() {
        for stage in 1..=5u8 {
            assert!(plan_for_stage(stage).is_some());
        }
        assert!(plan_for_stage(6).is_none());
    }

    #[test]
    fn stage_plans_are_non_empty() {
        for stage in 1..=5u8 {
            let plan = plan_for_stage(stage).unwrap();
            let total: usize = plan.groups.iter().map(|g| g.len()).sum();
            assert!(total > 0);
        }
    }
}
