//! Error types for herb-ledger

use thiserror::Error;

use crate::record::StageKind;
use crate::validator::RejectReason;

#[derive(Error, Debug)]
pub enum LedgerError {
    /// Admission rejected by permit rules; carries the specific reason
    #[error("admission rejected: {0}")]
    Rejected(RejectReason),

    #[error("duplicate record id: {0}")]
    DuplicateRecord(String),

    #[error("unknown predecessor: {0}")]
    UnknownPredecessor(String),

    #[error("{stage} records take {expected} predecessor(s), got {actual}")]
    PredecessorArity {
        stage: StageKind,
        expected: &'static str,
        actual: usize,
    },

    #[error("{stage} record may not reference {found} record {id}")]
    StageMismatch {
        stage: StageKind,
        found: StageKind,
        id: String,
    },

    #[error("empty payload for {0} record")]
    EmptyPayload(StageKind),

    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("broken chain: {child} references missing record {missing}")]
    BrokenChain { child: String, missing: String },

    #[error("fingerprint mismatch for {id}: expected {expected}, got {actual}")]
    FingerprintMismatch {
        id: String,
        expected: String,
        actual: String,
    },

    #[error("zone not found: {0}")]
    ZoneNotFound(String),

    #[error("permit not found: {0}")]
    PermitNotFound(String),

    #[error("invalid zone bounds: {0}")]
    InvalidBounds(String),

    #[error("store unavailable: {0}")]
    Database(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}
