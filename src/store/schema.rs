//! Column family definitions for the RocksDB state store.
//!
//! Each column family gives one entity family its own keyspace while sharing
//! a single RocksDB instance (spec §6 conceptual tables map onto these).

/// Column family for `Session` rows.
pub const CF_SESSIONS: &str = "sessions";

/// Column family for per-(session, stage, field) deliverable field records,
/// used for write idempotency (spec §4.A, §6 `stage_data` UNIQUE constraint).
pub const CF_STAGE_FIELDS: &str = "stage_fields";

/// Column family for the whole synthesized `StageDeliverable` per
/// (session, stage), used for typed retrieval.
pub const CF_DELIVERABLES: &str = "deliverables";

/// Column family for append-only `ConversationTurn` rows.
pub const CF_CONVERSATION: &str = "conversation";

/// Column family for `Checkpoint` rows — one per (session, stage), an
/// append-only collection rather than a single overwritten row.
pub const CF_CHECKPOINTS: &str = "checkpoints";

/// Column family for the not-yet-committed deliverable produced by
/// `run_stage`, read back by `advance_stage` to validate and commit.
pub const CF_PENDING_DELIVERABLES: &str = "pending_deliverables";

/// Column family for completed `Charter` rows.
pub const CF_CHARTERS: &str = "charters";

/// Column family for `ConsistencyReport` rows.
pub const CF_CONSISTENCY: &str = "consistency_reports";

/// All column family names.
pub const ALL_CFS: &[&str] = &[
    CF_SESSIONS,
    CF_STAGE_FIELDS,
    CF_DELIVERABLES,
    CF_CONVERSATION,
    CF_CHECKPOINTS,
    CF_PENDING_DELIVERABLES,
    CF_CHARTERS,
    CF_CONSISTENCY,
];

/// Key-prefix helpers for compound keys.
pub mod keys {
    /// Key for a `Session` row.
    pub fn session(session_id: &str) -> String {
        format!("sess:{}", session_id)
    }

    /// Key for a single stage-field idempotency record.
    pub fn stage_field(session_id: &str, stage: u8, field: &str) -> String {
        format!("field:{}:{}:{}", session_id, stage, field)
    }

    /// Prefix matching every field record for one (session, stage).
    pub fn stage_field_prefix(session_id: &str, stage: u8) -> String {
        format!("field:{}:{}:", session_id, stage)
    }

    /// Key for a synthesized deliverable.
    pub fn deliverable(session_id: &str, stage: u8) -> String {
        format!("deliv:{}:{}", session_id, stage)
    }

    /// Prefix matching every deliverable for one session.
    pub fn deliverable_session_prefix(session_id: &str) -> String {
        format!("deliv:{}:", session_id)
    }

    /// Key for one conversation turn, ordered by sequence number.
    pub fn turn(session_id: &str, seq: u64) -> String {
        format!("turn:{}:{:020}", session_id, seq)
    }

    /// Prefix matching every turn for one session.
    pub fn turn_session_prefix(session_id: &str) -> String {
        format!("turn:{}:", session_id)
    }

    /// Key for one stage's checkpoint — checkpoints accumulate one per
    /// completed stage, they are never overwritten.
    pub fn checkpoint(session_id: &str, stage: u8) -> String {
        format!("ckpt:{}:{:02}", session_id, stage)
    }

    /// Prefix matching every checkpoint for one session.
    pub fn checkpoint_session_prefix(session_id: &str) -> String {
        format!("ckpt:{}:", session_id)
    }

    /// Key for the pending (not-yet-committed) deliverable of one stage.
    pub fn pending_deliverable(session_id: &str, stage: u8) -> String {
        format!("pending:{}:{}", session_id, stage)
    }

    /// Key for a completed charter.
    pub fn charter(session_id: &str) -> String {
        format!("chart:{}", session_id)
    }

    /// Key for a session's consistency report.
    pub fn consistency_report(session_id: &str) -> String {
        format!("cons:{}", session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_generation() {
        assert_eq!(keys::session("s1"), "sess:s1");
        assert_eq!(keys::stage_field("s1", 2, "tradeoffs"), "field:s1:2:tradeoffs");
        assert_eq!(keys::deliverable("s1", 3), "deliv:s1:3");
        assert_eq!(keys::checkpoint("s1", 2), "ckpt:s1:02");
    }

    #[test]
    fn checkpoint_keys_sort_in_stage_order() {
        let k1 = keys::checkpoint("s1", 1);
        let k2 = keys::checkpoint("s1", 2);
        let k10 = keys::checkpoint("s1", 10);
        assert!(k1 < k2);
        assert!(k2 < k10);
    }

    #[test]
    fn turn_keys_sort_in_sequence_order() {
        let k1 = keys::turn("s1", 1);
        let k2 = keys::turn("s1", 2);
        let k10 = keys::turn("s1", 10);
        assert!(k1 < k2);
        assert!(k2 < k10);
    }
}
