//! Embedded, RocksDB-backed Session Store (spec §4.A).
//!
//! Stands in for the conceptual relational tables of spec §6: one column
//! family per entity family, keyed by compound string prefixes so that
//! range scans (`list_keys`) recover ordering for free.

pub mod schema;
pub mod types;

use std::path::PathBuf;
use std::sync::RwLock;

use rocksdb::{ColumnFamilyDescriptor, Options, WriteBatch, DB};
use serde::{de::DeserializeOwned, Serialize};

use schema::ALL_CFS;
pub use types::*;

/// Errors raised by the Session Store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("lock poisoned")]
    LockPoisoned,

    #[error("column family not found: {0}")]
    ColumnFamilyNotFound(String),

    #[error("stage field already written: session={session}, stage={stage}, field={field}")]
    DuplicateStageWrite {
        session: String,
        stage: u8,
        field: String,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// RocksDB-backed persistent state store.
pub struct StateStore {
    db: RwLock<DB>,
    path: PathBuf,
}

impl StateStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, &path, cf_descriptors)?;

        Ok(Self {
            db: RwLock::new(db),
            path,
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    // -- generic helpers ----------------------------------------------------

    fn put<T: Serialize>(&self, cf_name: &str, key: &str, value: &T) -> StoreResult<()> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;
        let bytes =
            bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
        db.put_cf(&cf, key.as_bytes(), bytes)?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, cf_name: &str, key: &str) -> StoreResult<Option<T>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;
        match db.get_cf(&cf, key.as_bytes())? {
            Some(bytes) => {
                let value = bincode::deserialize(&bytes)
                    .map_err(|e| StoreError::Deserialization(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list_keys(&self, cf_name: &str, prefix: &str) -> StoreResult<Vec<String>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;

        let mut keys = Vec::new();
        let iter = db.prefix_iterator_cf(&cf, prefix.as_bytes());
        for result in iter {
            let (key, _) = result?;
            if let Ok(key_str) = String::from_utf8(key.to_vec()) {
                if key_str.starts_with(prefix) {
                    keys.push(key_str);
                } else {
                    break;
                }
            }
        }
        Ok(keys)
    }

    // -- session --------------------------------------------------------

    pub fn put_session(&self, session: &Session) -> StoreResult<()> {
        self.put(schema::CF_SESSIONS, &schema::keys::session(&session.id), session)
    }

    pub fn get_session(&self, session_id: &str) -> StoreResult<Option<Session>> {
        self.get(schema::CF_SESSIONS, &schema::keys::session(session_id))
    }

    pub fn require_session(&self, session_id: &str) -> StoreResult<Session> {
        self.get_session(session_id)?
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))
    }

    pub fn list_sessions(&self) -> StoreResult<Vec<Session>> {
        let keys = self.list_keys(schema::CF_SESSIONS, "sess:")?;
        let mut sessions: Vec<Session> = keys
            .iter()
            .filter_map(|k| self.get(schema::CF_SESSIONS, k).ok()?)
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    // -- stage deliverables ----------------------------------------------

    /// Write every field of `deliverable` as an idempotency record, then the
    /// whole deliverable. Rejects a re-write of any already-written field
    /// unless `reset` is set (spec §4.A write-idempotency invariant).
    pub fn put_deliverable(
        &self,
        session_id: &str,
        deliverable: &StageDeliverable,
        reset: bool,
    ) -> StoreResult<()> {
        let stage = deliverable.stage_number();
        let value = serde_json::to_value(deliverable)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        if let Some(obj) = value.as_object() {
            for field in obj.keys() {
                let key = schema::keys::stage_field(session_id, stage, field);
                if !reset {
                    let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
                    let cf = db
                        .cf_handle(schema::CF_STAGE_FIELDS)
                        .ok_or_else(|| {
                            StoreError::ColumnFamilyNotFound(schema::CF_STAGE_FIELDS.to_string())
                        })?;
                    if db.get_cf(&cf, key.as_bytes())?.is_some() {
                        return Err(StoreError::DuplicateStageWrite {
                            session: session_id.to_string(),
                            stage,
                            field: field.clone(),
                        });
                    }
                }
                self.put(schema::CF_STAGE_FIELDS, &key, &true)?;
            }
        }
        self.put(
            schema::CF_DELIVERABLES,
            &schema::keys::deliverable(session_id, stage),
            deliverable,
        )
    }

    pub fn get_deliverable(
        &self,
        session_id: &str,
        stage: u8,
    ) -> StoreResult<Option<StageDeliverable>> {
        self.get(
            schema::CF_DELIVERABLES,
            &schema::keys::deliverable(session_id, stage),
        )
    }

    pub fn list_deliverables(&self, session_id: &str) -> StoreResult<Vec<StageDeliverable>> {
        let prefix = schema::keys::deliverable_session_prefix(session_id);
        let keys = self.list_keys(schema::CF_DELIVERABLES, &prefix)?;
        let mut out: Vec<StageDeliverable> = keys
            .iter()
            .filter_map(|k| self.get(schema::CF_DELIVERABLES, k).ok()?)
            .collect();
        out.sort_by_key(|d| d.stage_number());
        Ok(out)
    }

    // -- conversation -----------------------------------------------------

    pub fn append_turn(&self, turn: &ConversationTurn) -> StoreResult<()> {
        self.put(
            schema::CF_CONVERSATION,
            &schema::keys::turn(&turn.session_id, turn.seq),
            turn,
        )
    }

    pub fn list_turns(&self, session_id: &str) -> StoreResult<Vec<ConversationTurn>> {
        let prefix = schema::keys::turn_session_prefix(session_id);
        let keys = self.list_keys(schema::CF_CONVERSATION, &prefix)?;
        Ok(keys
            .iter()
            .filter_map(|k| self.get(schema::CF_CONVERSATION, k).ok()?)
            .collect())
    }

    pub fn next_turn_seq(&self, session_id: &str) -> StoreResult<u64> {
        Ok(self.list_turns(session_id)?.len() as u64)
    }

    // -- checkpoints --------------------------------------------------------

    /// Appends one stage's checkpoint. Checkpoints are a per-session
    /// collection, one row per completed stage — never overwritten.
    pub fn put_checkpoint(&self, checkpoint: &Checkpoint) -> StoreResult<()> {
        self.put(
            schema::CF_CHECKPOINTS,
            &schema::keys::checkpoint(&checkpoint.session_id, checkpoint.stage_number),
            checkpoint,
        )
    }

    pub fn get_checkpoint(&self, session_id: &str, stage: u8) -> StoreResult<Option<Checkpoint>> {
        self.get(schema::CF_CHECKPOINTS, &schema::keys::checkpoint(session_id, stage))
    }

    /// All checkpoints for a session, ordered by stage number.
    pub fn list_checkpoints(&self, session_id: &str) -> StoreResult<Vec<Checkpoint>> {
        let prefix = schema::keys::checkpoint_session_prefix(session_id);
        let keys = self.list_keys(schema::CF_CHECKPOINTS, &prefix)?;
        let mut out: Vec<Checkpoint> = keys
            .iter()
            .filter_map(|k| self.get(schema::CF_CHECKPOINTS, k).ok()?)
            .collect();
        out.sort_by_key(|c| c.stage_number);
        Ok(out)
    }

    // -- pending (not-yet-committed) deliverables ----------------------------

    /// Stages a deliverable produced by `run_stage` for `advance_stage` to
    /// read back, validate, and either commit or leave in place. Overwritten
    /// freely on re-collection — no idempotency check, since nothing is
    /// committed yet.
    pub fn put_pending_deliverable(
        &self,
        session_id: &str,
        deliverable: &StageDeliverable,
    ) -> StoreResult<()> {
        self.put(
            schema::CF_PENDING_DELIVERABLES,
            &schema::keys::pending_deliverable(session_id, deliverable.stage_number()),
            deliverable,
        )
    }

    pub fn get_pending_deliverable(
        &self,
        session_id: &str,
        stage: u8,
    ) -> StoreResult<Option<StageDeliverable>> {
        self.get(
            schema::CF_PENDING_DELIVERABLES,
            &schema::keys::pending_deliverable(session_id, stage),
        )
    }

    /// Clears a staged deliverable once it has been committed.
    pub fn clear_pending_deliverable(&self, session_id: &str, stage: u8) -> StoreResult<()> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(schema::CF_PENDING_DELIVERABLES)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(schema::CF_PENDING_DELIVERABLES.to_string()))?;
        db.delete_cf(&cf, schema::keys::pending_deliverable(session_id, stage).as_bytes())?;
        Ok(())
    }

    // -- charters / consistency reports --------------------------------------

    pub fn put_charter(&self, charter: &Charter) -> StoreResult<()> {
        self.put(schema::CF_CHARTERS, &schema::keys::charter(&charter.session_id), charter)
    }

    pub fn get_charter(&self, session_id: &str) -> StoreResult<Option<Charter>> {
        self.get(schema::CF_CHARTERS, &schema::keys::charter(session_id))
    }

    pub fn put_consistency_report(
        &self,
        session_id: &str,
        report: &crate::consistency::ConsistencyReport,
    ) -> StoreResult<()> {
        self.put(
            schema::CF_CONSISTENCY,
            &schema::keys::consistency_report(session_id),
            report,
        )
    }

    pub fn get_consistency_report(
        &self,
        session_id: &str,
    ) -> StoreResult<Option<crate::consistency::ConsistencyReport>> {
        self.get(
            schema::CF_CONSISTENCY,
            &schema::keys::consistency_report(session_id),
        )
    }

    // -- atomic stage advancement --------------------------------------------

    /// Commit a stage advancement atomically: the per-field idempotency
    /// records, the whole deliverable, a checkpoint, the cleared pending
    /// slot, and the session's updated `current_stage`, all in a single
    /// `WriteBatch` (spec §6 transaction discipline; testable property 4).
    /// Conversation turns are appended separately and are not part of this
    /// batch.
    pub fn advance_stage(
        &self,
        session: &Session,
        deliverable: &StageDeliverable,
        checkpoint: &Checkpoint,
    ) -> StoreResult<()> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut batch = WriteBatch::default();
        let stage = deliverable.stage_number();

        let cf_stage_fields = db
            .cf_handle(schema::CF_STAGE_FIELDS)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(schema::CF_STAGE_FIELDS.to_string()))?;
        let field_value = serde_json::to_value(deliverable)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        if let Some(obj) = field_value.as_object() {
            let marker = bincode::serialize(&true).map_err(|e| StoreError::Serialization(e.to_string()))?;
            for field in obj.keys() {
                let key = schema::keys::stage_field(&session.id, stage, field);
                batch.put_cf(&cf_stage_fields, key.as_bytes(), marker.clone());
            }
        }

        let cf_deliverables = db
            .cf_handle(schema::CF_DELIVERABLES)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(schema::CF_DELIVERABLES.to_string()))?;
        let deliv_key = schema::keys::deliverable(&session.id, stage);
        let deliv_bytes = bincode::serialize(deliverable)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        batch.put_cf(&cf_deliverables, deliv_key.as_bytes(), deliv_bytes);

        let cf_checkpoints = db
            .cf_handle(schema::CF_CHECKPOINTS)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(schema::CF_CHECKPOINTS.to_string()))?;
        let ckpt_key = schema::keys::checkpoint(&session.id, checkpoint.stage_number);
        let ckpt_bytes = bincode::serialize(checkpoint)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        batch.put_cf(&cf_checkpoints, ckpt_key.as_bytes(), ckpt_bytes);

        let cf_pending = db
            .cf_handle(schema::CF_PENDING_DELIVERABLES)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(schema::CF_PENDING_DELIVERABLES.to_string()))?;
        let pending_key = schema::keys::pending_deliverable(&session.id, stage);
        batch.delete_cf(&cf_pending, pending_key.as_bytes());

        let cf_sessions = db
            .cf_handle(schema::CF_SESSIONS)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(schema::CF_SESSIONS.to_string()))?;
        let sess_key = schema::keys::session(&session.id);
        let sess_bytes =
            bincode::serialize(session).map_err(|e| StoreError::Serialization(e.to_string()))?;
        batch.put_cf(&cf_sessions, sess_key.as_bytes(), sess_bytes);

        db.write(batch)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_tmp() -> (StateStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        (store, dir)
    }

    #[test]
    fn put_get_session_roundtrips() {
        let (store, _dir) = open_tmp();
        let session = Session::new("alice".to_string(), "Churn".to_string());
        store.put_session(&session).unwrap();
        let loaded = store.get_session(&session.id).unwrap().unwrap();
        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.current_stage, 1);
    }

    #[test]
    fn require_session_errors_when_missing() {
        let (store, _dir) = open_tmp();
        let err = store.require_session("does-not-exist").unwrap_err();
        assert!(matches!(err, StoreError::SessionNotFound(_)));
    }

    #[test]
    fn duplicate_stage_field_write_rejected_without_reset() {
        let (store, _dir) = open_tmp();
        let deliverable = StageDeliverable::ProblemStatement(ProblemStatement {
            business_objective: "reduce churn".into(),
            ai_necessity_justification: "manual rules plateaued".into(),
            input_features: vec!["tenure".into(), "usage".into()],
            target_output: "churn_probability".into(),
            ml_archetype: MlArchetype::Classification,
            out_of_scope: "pricing".into(),
            constraints: "batch only".into(),
        });
        store.put_deliverable("s1", &deliverable, false).unwrap();
        let err = store
            .put_deliverable("s1", &deliverable, false)
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateStageWrite { .. }));
        store.put_deliverable("s1", &deliverable, true).unwrap();
    }

    #[test]
    fn list_deliverables_sorted_by_stage() {
        let (store, _dir) = open_tmp();
        let stage3 = StageDeliverable::DataQualityScorecard(DataQualityScorecard {
            availability_report: "ok".into(),
            dimension_scores: DimensionScores {
                completeness: 0.9,
                accuracy: 0.9,
                consistency: 0.9,
                timeliness: 0.9,
                validity: 0.9,
                uniqueness: 0.9,
            },
            overall_score: 0.9,
            gaps: vec![],
        });
        let stage1 = StageDeliverable::ProblemStatement(ProblemStatement {
            business_objective: "x".into(),
            ai_necessity_justification: "y".into(),
            input_features: vec!["a".into(), "b".into()],
            target_output: "z".into(),
            ml_archetype: MlArchetype::Regression,
            out_of_scope: "n".into(),
            constraints: "c".into(),
        });
        store.put_deliverable("s1", &stage3, false).unwrap();
        store.put_deliverable("s1", &stage1, false).unwrap();
        let all = store.list_deliverables("s1").unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].stage_number(), 1);
        assert_eq!(all[1].stage_number(), 3);
    }

    #[test]
    fn checkpoints_accumulate_one_per_stage() {
        let (store, _dir) = open_tmp();
        for stage in 1..=3u8 {
            let checkpoint = Checkpoint {
                session_id: "s1".into(),
                stage_number: stage,
                created_at: chrono::Utc::now(),
                deliverables_snapshot: vec![],
                conversation_length_at_checkpoint: 0,
                validation_passed: true,
                feedback: vec![],
            };
            store.put_checkpoint(&checkpoint).unwrap();
        }
        let all = store.list_checkpoints("s1").unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].stage_number, 1);
        assert_eq!(all[2].stage_number, 3);
    }

    #[test]
    fn pending_deliverable_round_trips_then_clears() {
        let (store, _dir) = open_tmp();
        let deliverable = StageDeliverable::ProblemStatement(ProblemStatement {
            business_objective: "reduce churn".into(),
            ai_necessity_justification: "manual rules plateaued".into(),
            input_features: vec!["tenure".into()],
            target_output: "churn_probability".into(),
            ml_archetype: MlArchetype::Classification,
            out_of_scope: "pricing".into(),
            constraints: "batch only".into(),
        });
        store.put_pending_deliverable("s1", &deliverable).unwrap();
        let loaded = store.get_pending_deliverable("s1", 1).unwrap();
        assert!(loaded.is_some());
        store.clear_pending_deliverable("s1", 1).unwrap();
        assert!(store.get_pending_deliverable("s1", 1).unwrap().is_none());
    }
}
