//! Chain record construction
//!
//! Builds a new [`ChainRecord`] from stage data plus predecessor references:
//! structural admission, predecessor resolution, fingerprint computation,
//! then a single `put` into the store. Every predecessor id must already be
//! committed; the link captures the predecessor's fingerprint as stored, so
//! the new record pins the exact content it chained onto.

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::info;

use crate::chain_store::ChainStore;
use crate::error::LedgerError;
use crate::record::{ChainRecord, PredecessorLink, StageKind};
use crate::validator;

/// Builds and persists chain records
#[derive(Clone)]
pub struct ChainBuilder {
    store: ChainStore,
}

impl ChainBuilder {
    pub fn new(store: ChainStore) -> Self {
        Self { store }
    }

    /// Append a new record for `stage` referencing `predecessor_ids`.
    ///
    /// Preconditions: predecessor arity matches the stage (none for
    /// collection, exactly one for quality, at least one for
    /// processing/batch), the payload is non-empty, and every predecessor
    /// resolves to a committed record. Returns the persisted record.
    pub fn append(
        &self,
        stage: StageKind,
        payload: Map<String, Value>,
        predecessor_ids: &[String],
    ) -> Result<ChainRecord, LedgerError> {
        validator::admit_structural(stage, &payload, predecessor_ids.len())?;

        let mut predecessors = Vec::with_capacity(predecessor_ids.len());
        for id in predecessor_ids {
            let record = self
                .store
                .get(id)?
                .ok_or_else(|| LedgerError::UnknownPredecessor(id.clone()))?;
            predecessors.push(PredecessorLink {
                id: record.id,
                fingerprint: record.fingerprint,
            });
        }

        let created_at = Utc::now();
        let fingerprints: Vec<String> = predecessors
            .iter()
            .map(|link| link.fingerprint.clone())
            .collect();
        let fingerprint =
            ChainRecord::compute_fingerprint(stage, &payload, &fingerprints, created_at);

        let record = ChainRecord {
            id: ChainRecord::fresh_id(stage),
            stage,
            payload,
            predecessors,
            fingerprint,
            created_at,
        };

        self.store.put(&record)?;
        info!(
            record_id = %record.id,
            stage = %stage,
            predecessors = predecessor_ids.len(),
            "Appended chain record"
        );
        Ok(record)
    }
}
