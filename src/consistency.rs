//! Consistency Checker (spec §4.G).
//!
//! Runs deterministic local rules against the full set of stage
//! deliverables, then one Balanced-tier LLM call to surface contradictions
//! the local rules can't express, merging both lists before deriving an
//! overall feasibility rating.

use serde::{Deserialize, Serialize};

use crate::router::{CompletionRequest, Router, RouterError, Tier};
use crate::store::{DecisionLoop, GovernanceDecision, StageDeliverable};

/// One detected contradiction between stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contradiction {
    pub description: String,
    pub stages: Vec<u8>,
    /// A critical contradiction alone forces INFEASIBLE (spec §4.G); a
    /// non-critical one only counts toward the LOW/MEDIUM thresholds.
    #[serde(default)]
    pub critical: bool,
}

/// Coarse project feasibility, derived from data quality and contradictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feasibility {
    Infeasible,
    Low,
    Medium,
    High,
}

/// Result of a full consistency pass across all five deliverables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub contradictions: Vec<Contradiction>,
    pub feasibility: Feasibility,
}

#[derive(Debug, thiserror::Error)]
pub enum ConsistencyError {
    #[error("router error: {0}")]
    Router(#[from] RouterError),

    #[error("missing deliverable for stage {0}")]
    MissingStage(u8),
}

#[derive(Deserialize)]
struct RawContradictions {
    #[serde(default)]
    contradictions: Vec<Contradiction>,
}

fn find_stage(deliverables: &[StageDeliverable], stage: u8) -> Option<&StageDeliverable> {
    deliverables.iter().find(|d| d.stage_number() == stage)
}

/// Rules that need no LLM call: structural contradictions between two
/// stages' already-typed fields.
fn local_rules(deliverables: &[StageDeliverable]) -> Vec<Contradiction> {
    let mut out = Vec::new();

    let stage3 = find_stage(deliverables, 3);
    let stage1 = find_stage(deliverables, 1);
    if let (Some(StageDeliverable::DataQualityScorecard(d)), Some(StageDeliverable::ProblemStatement(_))) =
        (stage3, stage1)
    {
        if d.overall_score < 0.3 {
            out.push(Contradiction {
                description: "data quality is too low to support the proposed model".to_string(),
                stages: vec![1, 3],
                critical: true,
            });
        }
    }

    let stage4 = find_stage(deliverables, 4);
    let stage5 = find_stage(deliverables, 5);
    if let (Some(StageDeliverable::UserContext(u)), Some(StageDeliverable::EthicalRiskReport(e))) =
        (stage4, stage5)
    {
        let high_residual = e
            .principles
            .values()
            .any(|assessment| assessment.residual_risk >= 4);
        if u.decision_loop == DecisionLoop::Automated && high_residual {
            out.push(Contradiction {
                description: "fully automated decision loop conflicts with unresolved high residual risk".to_string(),
                stages: vec![4, 5],
                critical: true,
            });
        }
    }

    out
}

/// Spec §4.G's feasibility rule: INFEASIBLE if any contradiction is
/// critical; LOW if three or more non-critical contradictions; MEDIUM if
/// one or two; HIGH if none. Not a scoring heuristic — a direct count over
/// the merged contradiction list.
fn derive_feasibility(contradictions: &[Contradiction]) -> Feasibility {
    if contradictions.iter().any(|c| c.critical) {
        return Feasibility::Infeasible;
    }
    match contradictions.len() {
        0 => Feasibility::High,
        1 | 2 => Feasibility::Medium,
        _ => Feasibility::Low,
    }
}

/// Runs local rules, then merges an LLM-surfaced pass over all deliverables.
pub async fn check(
    deliverables: &[StageDeliverable],
    router: &Router,
) -> Result<ConsistencyReport, ConsistencyError> {
    let mut contradictions = local_rules(deliverables);

    let summary = serde_json::to_string(deliverables).unwrap_or_default();
    let request = CompletionRequest {
        system_prompt: "Given the five stage deliverables of a project charter, list any \
            contradictions between them as JSON: {\"contradictions\": [{\"description\": \
            \"...\", \"stages\": [1,2], \"critical\": true}]}. Mark critical=true only for a \
            contradiction that makes the project infeasible on its own; otherwise false. An \
            empty list means none found."
            .to_string(),
        user_content: summary,
        max_tokens: 800,
        temperature: 0.0,
    };

    let response = router.complete(Tier::Balanced, &request).await?;
    if let Ok(raw) = serde_json::from_str::<RawContradictions>(&response.content) {
        contradictions.extend(raw.contradictions);
    }

    let feasibility = derive_feasibility(&contradictions);

    Ok(ConsistencyReport {
        contradictions,
        feasibility,
    })
}

/// The Stage 5 governance decision rule (spec §6): a pure function of
/// residual risk across the five ethical principles.
pub fn governance_decision(report: &crate::store::EthicalRiskReport) -> GovernanceDecision {
    let residuals: Vec<u8> = report.principles.values().map(|a| a.residual_risk).collect();
    let max_residual = residuals.iter().copied().max().unwrap_or(0);
    let high_count = residuals.iter().filter(|&&r| r >= 4).count();

    if max_residual >= 5 {
        GovernanceDecision::Halt
    } else if high_count >= 2 {
        GovernanceDecision::SubmitToCommittee
    } else if high_count == 1 {
        GovernanceDecision::Revise
    } else if max_residual == 3 {
        GovernanceDecision::ProceedWithMonitoring
    } else {
        GovernanceDecision::Proceed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Persona, PrincipleAssessment, Principle, ProblemStatement, UserContext};
    use std::collections::HashMap;

    fn data_quality(score: f64) -> StageDeliverable {
        StageDeliverable::DataQualityScorecard(crate::store::DataQualityScorecard {
            availability_report: "available".into(),
            dimension_scores: crate::store::DimensionScores {
                completeness: score,
                accuracy: score,
                consistency: score,
                timeliness: score,
                validity: score,
                uniqueness: score,
            },
            overall_score: score,
            gaps: vec![],
        })
    }

    fn problem_statement() -> StageDeliverable {
        StageDeliverable::ProblemStatement(ProblemStatement {
            business_objective: "x".into(),
            ai_necessity_justification: "y".into(),
            input_features: vec!["a".into(), "b".into()],
            target_output: "z".into(),
            ml_archetype: crate::store::MlArchetype::Classification,
            out_of_scope: "n".into(),
            constraints: "c".into(),
        })
    }

    #[test]
    fn low_data_quality_flags_contradiction_with_problem_statement() {
        let deliverables = vec![problem_statement(), data_quality(0.1)];
        let found = local_rules(&deliverables);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].stages, vec![1, 3]);
    }

    #[test]
    fn automated_loop_with_high_residual_risk_flags_contradiction() {
        let mut principles = HashMap::new();
        principles.insert(
            Principle::Privacy,
            PrincipleAssessment {
                initial_risk: 5,
                mitigations: "none yet".into(),
                residual_risk: 4,
            },
        );
        let user_context = StageDeliverable::UserContext(UserContext {
            primary_users: vec![Persona { name: "ops".into(), description: "operators".into() }],
            proficiency: "expert".into(),
            decision_loop: DecisionLoop::Automated,
            explainability_requirements: "none".into(),
            unintended_consequences: "unknown".into(),
        });
        let ethical = StageDeliverable::EthicalRiskReport(crate::store::EthicalRiskReport {
            principles,
            governance_decision: GovernanceDecision::Revise,
        });
        let found = local_rules(&[user_context, ethical]);
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn governance_decision_escalates_with_two_high_residuals() {
        let mut principles = HashMap::new();
        principles.insert(
            Principle::Privacy,
            PrincipleAssessment { initial_risk: 5, mitigations: "m".into(), residual_risk: 4 },
        );
        principles.insert(
            Principle::Fairness,
            PrincipleAssessment { initial_risk: 4, mitigations: "m".into(), residual_risk: 4 },
        );
        let report = crate::store::EthicalRiskReport {
            principles,
            governance_decision: GovernanceDecision::Proceed,
        };
        assert_eq!(governance_decision(&report), GovernanceDecision::SubmitToCommittee);
    }

    #[test]
    fn feasibility_infeasible_with_any_critical_contradiction() {
        let contradictions = vec![Contradiction {
            description: "data quality is too low to support the proposed model".into(),
            stages: vec![1, 3],
            critical: true,
        }];
        assert_eq!(derive_feasibility(&contradictions), Feasibility::Infeasible);
    }

    #[test]
    fn feasibility_high_with_no_contradictions() {
        assert_eq!(derive_feasibility(&[]), Feasibility::High);
    }

    #[test]
    fn feasibility_medium_with_one_or_two_non_critical_contradictions() {
        let one = vec![Contradiction { description: "a".into(), stages: vec![1, 2], critical: false }];
        assert_eq!(derive_feasibility(&one), Feasibility::Medium);

        let two = vec![
            Contradiction { description: "a".into(), stages: vec![1, 2], critical: false },
            Contradiction { description: "b".into(), stages: vec![2, 3], critical: false },
        ];
        assert_eq!(derive_feasibility(&two), Feasibility::Medium);
    }

    #[test]
    fn feasibility_low_with_three_or_more_non_critical_contradictions() {
        let three: Vec<Contradiction> = (0..3)
            .map(|i| Contradiction { description: format!("c{}", i), stages: vec![1, 2], critical: false })
            .collect();
        assert_eq!(derive_feasibility(&three), Feasibility::Low);
    }
}
