//! Chain record data model and fingerprinting
//!
//! A [`ChainRecord`] is one immutable stage event in the provenance DAG.
//! Records reference their predecessors by id plus the predecessor's
//! fingerprint as observed at append time, so any later alteration of an
//! ancestor is detectable without trusting the store.
//!
//! The fingerprint is a SHA-256 digest over the canonical JSON serialization
//! of `{stage, payload, sorted predecessor fingerprints, created_at}`.
//! `serde_json` maps are BTree-backed, so key order is stable and the digest
//! is recomputable by any party holding the record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Custody stage of a chain record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Collection,
    Quality,
    Processing,
    Batch,
}

impl StageKind {
    /// Precedence used to order a reconstructed journey
    /// (collection < quality < processing < batch)
    pub fn precedence(self) -> u8 {
        match self {
            StageKind::Collection => 0,
            StageKind::Quality => 1,
            StageKind::Processing => 2,
            StageKind::Batch => 3,
        }
    }

    /// Record id prefix for this stage
    pub fn id_prefix(self) -> &'static str {
        match self {
            StageKind::Collection => "EVT",
            StageKind::Quality => "TEST",
            StageKind::Processing => "PROC",
            StageKind::Batch => "BATCH",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Collection => "collection",
            StageKind::Quality => "quality",
            StageKind::Processing => "processing",
            StageKind::Batch => "batch",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a predecessor record, capturing its fingerprint at link time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredecessorLink {
    pub id: String,
    pub fingerprint: String,
}

/// One immutable stage event in the provenance DAG
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainRecord {
    /// Stage-prefixed unique id (e.g. `EVT_<uuid>`)
    pub id: String,
    pub stage: StageKind,
    /// Stage-specific structured data; never empty
    pub payload: Map<String, Value>,
    /// Ordered predecessor links; empty only for collection records
    pub predecessors: Vec<PredecessorLink>,
    /// `sha256-<hex>` digest over the canonical record content
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
}

impl ChainRecord {
    /// Generate a fresh stage-prefixed record id
    pub fn fresh_id(stage: StageKind) -> String {
        format!("{}_{}", stage.id_prefix(), Uuid::new_v4().simple())
    }

    /// Compute the canonical fingerprint for the given record content.
    ///
    /// Predecessor fingerprints are sorted before hashing so the digest does
    /// not depend on the order references were supplied in.
    pub fn compute_fingerprint(
        stage: StageKind,
        payload: &Map<String, Value>,
        predecessor_fingerprints: &[String],
        created_at: DateTime<Utc>,
    ) -> String {
        let mut fingerprints = predecessor_fingerprints.to_vec();
        fingerprints.sort();

        let canonical = serde_json::json!({
            "stage": stage.as_str(),
            "payload": payload,
            "predecessors": fingerprints,
            "created_at": created_at.timestamp_millis(),
        });

        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        format!("sha256-{}", hex::encode(hasher.finalize()))
    }

    /// Recompute this record's fingerprint from its stored fields
    pub fn recompute_fingerprint(&self) -> String {
        let fingerprints: Vec<String> = self
            .predecessors
            .iter()
            .map(|link| link.fingerprint.clone())
            .collect();
        Self::compute_fingerprint(self.stage, &self.payload, &fingerprints, self.created_at)
    }

    /// True when the stored fingerprint matches a fresh recomputation
    pub fn fingerprint_valid(&self) -> bool {
        self.recompute_fingerprint() == self.fingerprint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let now = Utc::now();
        let p = payload(&[("species", "Ashwagandha".into()), ("weight_kg", 25.5.into())]);

        let a = ChainRecord::compute_fingerprint(StageKind::Collection, &p, &[], now);
        let b = ChainRecord::compute_fingerprint(StageKind::Collection, &p, &[], now);

        assert_eq!(a, b);
        assert!(a.starts_with("sha256-"));
        assert_eq!(a.len(), 7 + 64);
    }

    #[test]
    fn test_fingerprint_ignores_predecessor_order() {
        let now = Utc::now();
        let p = payload(&[("process_type", "drying".into())]);
        let fp1 = "sha256-aaaa".to_string();
        let fp2 = "sha256-bbbb".to_string();

        let a = ChainRecord::compute_fingerprint(
            StageKind::Processing,
            &p,
            &[fp1.clone(), fp2.clone()],
            now,
        );
        let b = ChainRecord::compute_fingerprint(StageKind::Processing, &p, &[fp2, fp1], now);

        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_changes_with_payload() {
        let now = Utc::now();
        let a = ChainRecord::compute_fingerprint(
            StageKind::Quality,
            &payload(&[("moisture", 8.5.into())]),
            &[],
            now,
        );
        let b = ChainRecord::compute_fingerprint(
            StageKind::Quality,
            &payload(&[("moisture", 9.5.into())]),
            &[],
            now,
        );

        assert_ne!(a, b);
    }

    #[test]
    fn test_recompute_detects_mutation() {
        let now = Utc::now();
        let p = payload(&[("species", "Turmeric".into())]);
        let fingerprint = ChainRecord::compute_fingerprint(StageKind::Collection, &p, &[], now);

        let mut record = ChainRecord {
            id: ChainRecord::fresh_id(StageKind::Collection),
            stage: StageKind::Collection,
            payload: p,
            predecessors: vec![],
            fingerprint,
            created_at: now,
        };
        assert!(record.fingerprint_valid());

        record
            .payload
            .insert("species".to_string(), "Ashwagandha".into());
        assert!(!record.fingerprint_valid());
    }

    #[test]
    fn test_fresh_id_prefixes() {
        assert!(ChainRecord::fresh_id(StageKind::Collection).starts_with("EVT_"));
        assert!(ChainRecord::fresh_id(StageKind::Quality).starts_with("TEST_"));
        assert!(ChainRecord::fresh_id(StageKind::Processing).starts_with("PROC_"));
        assert!(ChainRecord::fresh_id(StageKind::Batch).starts_with("BATCH_"));
    }
}
