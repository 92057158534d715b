//! Scannable token payload
//!
//! The ledger hands a record's id and fingerprint to an external encoder
//! that renders the scannable token (QR or otherwise). This module only
//! defines the data the token must carry; the visual/binary format is the
//! encoder's concern. A scanner decodes the payload and resolves the
//! embedded record id back through the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::record::{ChainRecord, StageKind};

/// Current token payload format version
pub const TOKEN_VERSION: u8 = 1;

/// Data carried by a scannable provenance token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPayload {
    pub version: u8,
    pub record_id: String,
    pub fingerprint: String,
    pub stage: StageKind,
    pub issued_at: DateTime<Utc>,
}

impl TokenPayload {
    pub fn for_record(record: &ChainRecord) -> Self {
        Self {
            version: TOKEN_VERSION,
            record_id: record.id.clone(),
            fingerprint: record.fingerprint.clone(),
            stage: record.stage,
            issued_at: Utc::now(),
        }
    }

    /// Serialize for the external encoder
    pub fn to_json(&self) -> Result<String, LedgerError> {
        serde_json::to_string(self).map_err(|e| LedgerError::Serialization(e.to_string()))
    }

    /// Decode a scanned payload
    pub fn from_json(json: &str) -> Result<Self, LedgerError> {
        serde_json::from_str(json).map_err(|e| LedgerError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn test_token_round_trip() {
        let payload: Map<String, serde_json::Value> =
            [("product".to_string(), "powder".into())].into_iter().collect();
        let created_at = Utc::now();
        let fingerprint =
            ChainRecord::compute_fingerprint(StageKind::Batch, &payload, &[], created_at);
        let record = ChainRecord {
            id: ChainRecord::fresh_id(StageKind::Batch),
            stage: StageKind::Batch,
            payload,
            predecessors: vec![],
            fingerprint,
            created_at,
        };

        let token = TokenPayload::for_record(&record);
        let decoded = TokenPayload::from_json(&token.to_json().unwrap()).unwrap();

        assert_eq!(decoded.record_id, record.id);
        assert_eq!(decoded.fingerprint, record.fingerprint);
        assert_eq!(decoded.stage, StageKind::Batch);
        assert_eq!(decoded.version, TOKEN_VERSION);
    }

    #[test]
    fn test_malformed_token_rejected() {
        assert!(TokenPayload::from_json("not json").is_err());
    }
}
