//! Closed error-kind taxonomy for the engine (spec §7).
//!
//! Each component owns its own `thiserror` enum; this module aggregates the
//! subset that can surface across a component boundary into one type the
//! Orchestrator's public API returns. Internal retry/backoff errors (e.g. a
//! single Router attempt failing) never reach here — only terminal outcomes.

use crate::store::StoreError;

/// Errors the Orchestrator's public operations can return.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("no staged deliverable for session {0} stage {1}; call run_stage first")]
    NoStagedDeliverable(String, u8),

    #[error("charter generation blocked: consistency check found contradictions")]
    CharterBlockedInconsistent,

    #[error("stage {0} is already committed; re-interview is not supported")]
    StageAlreadyCommitted(u8),

    #[error("session {0} is not at stage 6")]
    NotReadyForCharter(String),

    #[error("all providers exhausted for tier {0:?}")]
    ProviderExhausted(crate::router::Tier),

    #[error("stage synthesis failed after retry: {0}")]
    SynthesisFailed(String),

    #[error("session {0} has been aborted")]
    SessionAborted(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
