//! Stage-Gate Validator (spec §4.F).
//!
//! Pure, deterministic, no I/O: a static per-stage mandatory-field list plus
//! a handful of cross-field rules, producing a completeness ratio and a
//! proceed/block verdict.

use serde::{Deserialize, Serialize};

use crate::store::{Principle, StageDeliverable};

/// Result of validating one stage's deliverable against its gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageValidation {
    pub stage_number: u8,
    pub mandatory_fields: u32,
    pub missing_fields: Vec<String>,
    pub rule_violations: Vec<String>,
    pub completeness: f64,
    pub can_proceed: bool,
}

fn blank(s: &str) -> bool {
    s.trim().is_empty()
}

/// Runs the stage gate for `deliverable`, returning the verdict.
pub fn validate(deliverable: &StageDeliverable) -> StageValidation {
    let mut missing = Vec::new();
    let mut violations = Vec::new();
    let mandatory: u32;

    match deliverable {
        StageDeliverable::ProblemStatement(p) => {
            mandatory = 6;
            if blank(&p.business_objective) {
                missing.push("business_objective".to_string());
            }
            if blank(&p.ai_necessity_justification) {
                missing.push("ai_necessity_justification".to_string());
            }
            if blank(&p.target_output) {
                missing.push("target_output".to_string());
            }
            if blank(&p.out_of_scope) {
                missing.push("out_of_scope".to_string());
            }
            if blank(&p.constraints) {
                missing.push("constraints".to_string());
            }
            if p.input_features.is_empty() {
                missing.push("input_features".to_string());
            } else if p.input_features.len() < 2 {
                violations.push("input_features must name at least two candidate features".to_string());
            }
        }
        StageDeliverable::MetricAlignment(m) => {
            mandatory = 4;
            if m.business_kpis.is_empty() {
                missing.push("business_kpis".to_string());
            }
            if m.ml_metrics.len() < 2 {
                missing.push("ml_metrics".to_string());
            }
            if m.alignments.is_empty() {
                missing.push("alignments".to_string());
            }
            if blank(&m.tradeoffs) {
                missing.push("tradeoffs".to_string());
            }
            let kpi_names: Vec<&str> = m.business_kpis.iter().map(|k| k.name.as_str()).collect();
            for alignment in &m.alignments {
                if alignment.kpis.is_empty() {
                    violations.push(format!(
                        "ml_metric '{}' is not aligned to any business KPI",
                        alignment.ml_metric
                    ));
                }
                for kpi in &alignment.kpis {
                    if !kpi_names.contains(&kpi.as_str()) {
                        violations.push(format!(
                            "alignment references unknown KPI '{}'",
                            kpi
                        ));
                    }
                }
            }
        }
        StageDeliverable::DataQualityScorecard(d) => {
            mandatory = 3;
            if blank(&d.availability_report) {
                missing.push("availability_report".to_string());
            }
            let scores = [
                d.dimension_scores.completeness,
                d.dimension_scores.accuracy,
                d.dimension_scores.consistency,
                d.dimension_scores.timeliness,
                d.dimension_scores.validity,
                d.dimension_scores.uniqueness,
            ];
            if scores.iter().any(|s| !(0.0..=1.0).contains(s)) {
                violations.push("all six dimension scores must be in [0, 1]".to_string());
            }
            if (d.overall_score - d.dimension_scores.mean()).abs() > 0.01 {
                violations.push("overall_score must equal the mean of the six dimension scores".to_string());
            }
            if d.overall_score < 0.5 && d.gaps.is_empty() {
                violations.push("overall_score below 0.5 requires at least one documented gap".to_string());
            }
        }
        StageDeliverable::UserContext(u) => {
            mandatory = 4;
            if u.primary_users.is_empty() {
                missing.push("primary_users".to_string());
            }
            if blank(&u.proficiency) {
                missing.push("proficiency".to_string());
            }
            if blank(&u.explainability_requirements) {
                missing.push("explainability_requirements".to_string());
            }
            if blank(&u.unintended_consequences) {
                missing.push("unintended_consequences".to_string());
            }
        }
        StageDeliverable::EthicalRiskReport(e) => {
            mandatory = Principle::all().len() as u32;
            for principle in Principle::all() {
                match e.principles.get(principle) {
                    None => missing.push(format!("principles.{:?}", principle)),
                    Some(assessment) => {
                        if !(1..=5).contains(&assessment.initial_risk)
                            || !(1..=5).contains(&assessment.residual_risk)
                        {
                            violations.push(format!(
                                "{:?} risk scores must be in 1..=5",
                                principle
                            ));
                        }
                        if assessment.residual_risk > assessment.initial_risk {
                            violations.push(format!(
                                "{:?} residual risk cannot exceed initial risk",
                                principle
                            ));
                        }
                    }
                }
            }
        }
    }

    let missing_count = missing.len() as u32;
    let completeness = if mandatory == 0 {
        1.0
    } else {
        1.0 - (missing_count as f64 / mandatory as f64)
    };

    StageValidation {
        stage_number: deliverable.stage_number(),
        mandatory_fields: mandatory,
        missing_fields: missing,
        rule_violations: violations.clone(),
        completeness,
        can_proceed: completeness >= 0.9 && violations.is_empty(),
    }
}
