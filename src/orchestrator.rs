//! Orchestrator (spec §4.H): the public entry point coordinating every
//! other component across a session's lifecycle.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::consistency;
use crate::conversation::{ConversationLoop, ResponseSource};
use crate::error::{EngineError, EngineResult};
use crate::evaluator::QualityEvaluator;
use crate::gate;
use crate::router::Router;
use crate::stage_agents::{self, conduct_interview};
use crate::store::{
    Charter, Checkpoint, LifecycleState, Session, SessionId, StageDeliverable, StateStore,
};

/// Registry of per-session locks, grounded on the teacher's per-resource
/// locking style; chosen over store-side locking so the store itself stays
/// a thin, lock-free-per-call key/value layer.
struct SessionLocks {
    locks: RwLock<HashMap<SessionId, Arc<AsyncMutex<()>>>>,
}

impl SessionLocks {
    fn new() -> Self {
        Self { locks: RwLock::new(HashMap::new()) }
    }

    fn lock_for(&self, session_id: &str) -> Arc<AsyncMutex<()>> {
        if let Some(lock) = self.locks.read().unwrap().get(session_id) {
            return lock.clone();
        }
        let mut locks = self.locks.write().unwrap();
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

/// Coordinates the Session Store, LLM Router, and the five stage agents
/// across a session's full lifecycle.
pub struct Orchestrator {
    store: Arc<StateStore>,
    router: Arc<Router>,
    config: EngineConfig,
    locks: SessionLocks,
}

impl Orchestrator {
    pub fn new(store: Arc<StateStore>, router: Arc<Router>, config: EngineConfig) -> Self {
        Self {
            store,
            router,
            config,
            locks: SessionLocks::new(),
        }
    }

    pub async fn create_session(&self, owner: String, project_name: String) -> EngineResult<Session> {
        let session = Session::new(owner, project_name);
        self.store.put_session(&session)?;
        info!(session_id = %session.id, "created session");
        Ok(session)
    }

    pub async fn resume_session(&self, session_id: &str) -> EngineResult<Session> {
        Ok(self.store.require_session(session_id)?)
    }

    pub async fn abort_session(&self, session_id: &str) -> EngineResult<()> {
        let lock = self.locks.lock_for(session_id);
        let _guard = lock.lock().await;

        let mut session = self.store.require_session(session_id)?;
        session.status = LifecycleState::Abandoned;
        session.touch();
        self.store.put_session(&session)?;
        warn!(session_id, "session aborted");
        Ok(())
    }

    /// Runs the interview for the session's current stage and synthesizes its
    /// deliverable, staging it for `advance_stage` to validate and commit.
    /// Does NOT advance `current_stage` and does NOT gate-validate (spec
    /// §4.H, §5): a session's lock is held only for the duration of this
    /// call, never across the boundary to `advance_stage`.
    pub async fn run_stage(
        &self,
        session_id: &str,
        source: &mut dyn ResponseSource,
    ) -> EngineResult<StageDeliverable> {
        let lock = self.locks.lock_for(session_id);
        let _guard = lock.lock().await;

        let session = self.store.require_session(session_id)?;

        if matches!(session.status, LifecycleState::Abandoned | LifecycleState::Failed) {
            return Err(EngineError::SessionAborted(session_id.to_string()));
        }
        if session.status == LifecycleState::Completed || session.current_stage > 5 {
            return Err(EngineError::StageAlreadyCommitted(session.current_stage));
        }

        let stage = session.current_stage;
        let plan = stage_agents::plan_for_stage(stage)
            .ok_or_else(|| EngineError::Internal(format!("no question plan for stage {}", stage)))?;

        let evaluator = QualityEvaluator::new(&self.router);
        let conversation = ConversationLoop::new(evaluator, &self.config.conversation);

        let transcript = conduct_interview(plan, &conversation, source, session_id)
            .await
            .map_err(|e| EngineError::Internal(e.to_string()))?;

        let deliverable = self.synthesize(stage, &transcript, &session_id.to_string()).await?;

        for turn in &transcript.turns {
            self.store.append_turn(turn)?;
        }

        self.store.put_pending_deliverable(session_id, &deliverable)?;
        info!(session_id, stage, "stage deliverable staged");

        Ok(deliverable)
    }

    /// Validates the staged deliverable from the most recent `run_stage`
    /// call and, if it passes, atomically commits it and advances
    /// `current_stage` (spec §6 transaction discipline). On failure, leaves
    /// all state unchanged and returns the validation verbatim rather than
    /// as an error — the caller re-runs `run_stage` to re-collect (spec §4.H
    /// end-to-end scenario 3).
    pub async fn advance_stage(&self, session_id: &str) -> EngineResult<gate::StageValidation> {
        let lock = self.locks.lock_for(session_id);
        let _guard = lock.lock().await;

        let mut session = self.store.require_session(session_id)?;

        if matches!(session.status, LifecycleState::Abandoned | LifecycleState::Failed) {
            return Err(EngineError::SessionAborted(session_id.to_string()));
        }
        if session.status == LifecycleState::Completed || session.current_stage > 5 {
            return Err(EngineError::StageAlreadyCommitted(session.current_stage));
        }

        let stage = session.current_stage;
        let deliverable = self
            .store
            .get_pending_deliverable(session_id, stage)?
            .ok_or_else(|| EngineError::NoStagedDeliverable(session_id.to_string(), stage))?;

        let validation = gate::validate(&deliverable);
        if !validation.can_proceed {
            info!(session_id, stage, completeness = validation.completeness, "stage gate failed");
            return Ok(validation);
        }

        let checkpoint = Checkpoint {
            session_id: session_id.to_string(),
            stage_number: stage,
            created_at: chrono::Utc::now(),
            deliverables_snapshot: self.store.list_deliverables(session_id)?,
            conversation_length_at_checkpoint: self.store.list_turns(session_id)?.len() as u64,
            validation_passed: true,
            feedback: vec![],
        };

        session.current_stage = stage + 1;
        session.touch();

        self.store.advance_stage(&session, &deliverable, &checkpoint)?;
        info!(session_id, stage, next_stage = session.current_stage, "stage advanced");

        Ok(validation)
    }

    async fn synthesize(
        &self,
        stage: u8,
        transcript: &stage_agents::InterviewTranscript,
        _session_id: &str,
    ) -> EngineResult<StageDeliverable> {
        let result = match stage {
            1 => stage_agents::Stage1Agent.synthesize(transcript, &self.router).await,
            2 => stage_agents::Stage2Agent.synthesize(transcript, &self.router).await,
            3 => stage_agents::Stage3Agent.synthesize(transcript, &self.router).await,
            4 => stage_agents::Stage4Agent.synthesize(transcript, &self.router).await,
            5 => stage_agents::Stage5Agent.synthesize(transcript, &self.router).await,
            other => return Err(EngineError::Internal(format!("invalid stage number {}", other))),
        };
        result.map_err(|e| EngineError::SynthesisFailed(e.to_string()))
    }

    /// Runs the Consistency Checker across all five deliverables and
    /// produces the final Charter, blocking if the project is infeasible.
    pub async fn generate_charter(&self, session_id: &str) -> EngineResult<Charter> {
        let lock = self.locks.lock_for(session_id);
        let _guard = lock.lock().await;

        let mut session = self.store.require_session(session_id)?;
        if session.current_stage < 6 {
            return Err(EngineError::NotReadyForCharter(session_id.to_string()));
        }

        let deliverables = self.store.list_deliverables(session_id)?;
        let report = consistency::check(&deliverables, &self.router)
            .await
            .map_err(|e| EngineError::Internal(e.to_string()))?;
        self.store.put_consistency_report(session_id, &report)?;

        if report.feasibility == consistency::Feasibility::Infeasible {
            warn!(session_id, "charter generation blocked: project deemed infeasible");
            return Err(EngineError::CharterBlockedInconsistent);
        }

        let governance_decision = deliverables
            .iter()
            .find_map(|d| match d {
                StageDeliverable::EthicalRiskReport(e) => Some(e.governance_decision),
                _ => None,
            })
            .unwrap_or(crate::store::GovernanceDecision::Proceed);

        let critical_success_factors = deliverables
            .iter()
            .find_map(|d| match d {
                StageDeliverable::MetricAlignment(m) => {
                    Some(m.business_kpis.iter().map(|k| k.name.clone()).collect())
                }
                _ => None,
            })
            .unwrap_or_default();

        let major_risks = deliverables
            .iter()
            .find_map(|d| match d {
                StageDeliverable::EthicalRiskReport(e) => Some(
                    e.principles
                        .iter()
                        .filter(|(_, a)| a.residual_risk >= 4)
                        .map(|(p, _)| format!("{:?}", p))
                        .collect::<Vec<_>>(),
                ),
                _ => None,
            })
            .unwrap_or_default();

        let charter = Charter {
            session_id: session_id.to_string(),
            project_name: session.project_name.clone(),
            created_at: session.created_at,
            completed_at: chrono::Utc::now(),
            deliverables,
            governance_decision,
            feasibility: report.feasibility,
            critical_success_factors,
            major_risks,
        };

        self.store.put_charter(&charter)?;
        session.status = LifecycleState::Completed;
        session.touch();
        self.store.put_session(&session)?;

        info!(session_id, "charter generated");
        Ok(charter)
    }
}
