//! Core types for the interview session aggregate (spec §3).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque session identifier, stable across resumes.
pub type SessionId = String;

/// Stage number: 1..=5 are interview stages, 6 means completed.
pub type StageNumber = u8;

/// Lifecycle state of a session (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    InProgress,
    Paused,
    Completed,
    Abandoned,
    Failed,
}

/// The root aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub owner: String,
    pub project_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub current_stage: StageNumber,
    pub status: LifecycleState,
}

impl Session {
    pub fn new(owner: String, project_name: String) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner,
            project_name,
            created_at: now,
            updated_at: now,
            current_stage: 1,
            status: LifecycleState::InProgress,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Role of a conversation turn (spec §3, §4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Assistant,
    User,
    System,
}

/// Metadata attached to a conversation turn (spec §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnMetadata {
    pub quality_score: Option<u8>,
    pub attempt_index: Option<u32>,
    pub issues: Vec<String>,
}

/// Append-only audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub session_id: SessionId,
    pub seq: u64,
    pub role: Role,
    pub content: String,
    pub stage_number: StageNumber,
    pub timestamp: DateTime<Utc>,
    pub metadata: TurnMetadata,
}

/// Snapshot enabling resume (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub session_id: SessionId,
    pub stage_number: StageNumber,
    pub created_at: DateTime<Utc>,
    pub deliverables_snapshot: Vec<StageDeliverable>,
    pub conversation_length_at_checkpoint: u64,
    pub validation_passed: bool,
    pub feedback: Vec<String>,
}

/// ML problem archetype (Stage 1 field catalogue).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MlArchetype {
    Classification,
    Regression,
    Timeseries,
    Anomaly,
    Clustering,
    Nlp,
    Vision,
    Recommendation,
}

/// Stage 1 deliverable: ProblemStatement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemStatement {
    pub business_objective: String,
    pub ai_necessity_justification: String,
    pub input_features: Vec<String>,
    pub target_output: String,
    pub ml_archetype: MlArchetype,
    pub out_of_scope: String,
    pub constraints: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessKpi {
    pub name: String,
    pub baseline: String,
    pub target: String,
    pub cadence: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlMetric {
    pub name: String,
    pub acceptable_range: (f64, f64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricAlignmentEntry {
    pub ml_metric: String,
    pub kpis: Vec<String>,
}

/// Stage 2 deliverable: MetricAlignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricAlignment {
    pub business_kpis: Vec<BusinessKpi>,
    pub ml_metrics: Vec<MlMetric>,
    pub alignments: Vec<MetricAlignmentEntry>,
    pub tradeoffs: String,
}

/// The six data-quality dimensions (Stage 3 field catalogue).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionScores {
    pub completeness: f64,
    pub accuracy: f64,
    pub consistency: f64,
    pub timeliness: f64,
    pub validity: f64,
    pub uniqueness: f64,
}

impl DimensionScores {
    pub fn mean(&self) -> f64 {
        (self.completeness
            + self.accuracy
            + self.consistency
            + self.timeliness
            + self.validity
            + self.uniqueness)
            / 6.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataGap {
    pub description: String,
    pub mitigation: String,
}

/// Stage 3 deliverable: DataQualityScorecard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataQualityScorecard {
    pub availability_report: String,
    pub dimension_scores: DimensionScores,
    pub overall_score: f64,
    pub gaps: Vec<DataGap>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,
    pub description: String,
}

/// Decision-loop enum (Stage 4 field catalogue).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionLoop {
    Automated,
    HumanInLoop,
    Advisory,
}

/// Stage 4 deliverable: UserContext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserContext {
    pub primary_users: Vec<Persona>,
    pub proficiency: String,
    pub decision_loop: DecisionLoop,
    pub explainability_requirements: String,
    pub unintended_consequences: String,
}

/// The five ethical principles (Stage 5 field catalogue).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Principle {
    HumanAgency,
    TechnicalRobustness,
    Privacy,
    Transparency,
    Fairness,
}

impl Principle {
    pub fn all() -> &'static [Principle] {
        &[
            Principle::HumanAgency,
            Principle::TechnicalRobustness,
            Principle::Privacy,
            Principle::Transparency,
            Principle::Fairness,
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrincipleAssessment {
    pub initial_risk: u8,
    pub mitigations: String,
    pub residual_risk: u8,
}

/// Deterministic governance verdict (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernanceDecision {
    Proceed,
    ProceedWithMonitoring,
    Revise,
    SubmitToCommittee,
    Halt,
}

/// Stage 5 deliverable: EthicalRiskReport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EthicalRiskReport {
    pub principles: HashMap<Principle, PrincipleAssessment>,
    pub governance_decision: GovernanceDecision,
}

/// Tagged union over the five stage-specific deliverable shapes
/// (spec §9 "Implicit heterogeneity" re-architecture note).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageDeliverable {
    ProblemStatement(ProblemStatement),
    MetricAlignment(MetricAlignment),
    DataQualityScorecard(DataQualityScorecard),
    UserContext(UserContext),
    EthicalRiskReport(EthicalRiskReport),
}

impl StageDeliverable {
    pub fn stage_number(&self) -> StageNumber {
        match self {
            StageDeliverable::ProblemStatement(_) => 1,
            StageDeliverable::MetricAlignment(_) => 2,
            StageDeliverable::DataQualityScorecard(_) => 3,
            StageDeliverable::UserContext(_) => 4,
            StageDeliverable::EthicalRiskReport(_) => 5,
        }
    }
}

/// Terminal artifact (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Charter {
    pub session_id: SessionId,
    pub project_name: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub deliverables: Vec<StageDeliverable>,
    pub governance_decision: GovernanceDecision,
    pub feasibility: crate::consistency::Feasibility,
    pub critical_success_factors: Vec<String>,
    pub major_risks: Vec<String>,
}
