//! Ledger facade: the inbound boundary of the custody chain
//!
//! Wires the permit registry, chain store, builder and verifier behind one
//! handle and exposes the stage operations a transport layer would call:
//! validate a candidate event, record each custody stage, reconstruct
//! provenance, and issue token payloads for the external encoder.
//!
//! The facade is where admission meets the chain: `record_collection` and
//! `record_quality` gate on permit rules before appending, while
//! `record_processing` and `record_batch` are structural only - downstream
//! stages trust the validation already embedded in the records they
//! reference.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::{Map, Value};
use tracing::info;

use crate::builder::ChainBuilder;
use crate::chain_store::ChainStore;
use crate::config::Config;
use crate::error::LedgerError;
use crate::record::{ChainRecord, StageKind};
use crate::registry::PermitRegistry;
use crate::token::TokenPayload;
use crate::validator::{self, Admission, CollectionCandidate, RejectReason};
use crate::verifier::{ChainVerifier, Provenance, RecordStatus};

/// The chain-of-custody ledger
pub struct HerbLedger {
    registry: PermitRegistry,
    store: ChainStore,
    builder: ChainBuilder,
    verifier: ChainVerifier,
}

impl HerbLedger {
    /// Open the ledger per configuration, seeding the default registry
    /// entries on first open if configured.
    pub fn open(config: &Config) -> Result<Self, LedgerError> {
        std::fs::create_dir_all(&config.storage_dir)?;
        let db = sled::open(config.ledger_db_path())?;
        let ledger = Self::with_db(&db)?;
        if config.seed_defaults {
            ledger.registry.seed_defaults()?;
        }
        info!(path = %config.ledger_db_path().display(), "Opened herb ledger");
        Ok(ledger)
    }

    /// Open the ledger on an existing database directory (no seeding)
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        let db = sled::open(path.as_ref())?;
        Self::with_db(&db)
    }

    /// In-memory ledger with seeded defaults (for tests and demos)
    pub fn temporary() -> Result<Self, LedgerError> {
        let db = sled::Config::new().temporary(true).open()?;
        let ledger = Self::with_db(&db)?;
        ledger.registry.seed_defaults()?;
        Ok(ledger)
    }

    fn with_db(db: &sled::Db) -> Result<Self, LedgerError> {
        let registry = PermitRegistry::open(db)?;
        let store = ChainStore::open(db)?;
        let builder = ChainBuilder::new(store.clone());
        let verifier = ChainVerifier::new(store.clone());
        Ok(Self {
            registry,
            store,
            builder,
            verifier,
        })
    }

    pub fn registry(&self) -> &PermitRegistry {
        &self.registry
    }

    pub fn store(&self) -> &ChainStore {
        &self.store
    }

    // --- Validation (no chain writes) ---

    /// Admission decision for a candidate collection event
    pub fn validate_collection(
        &self,
        candidate: &CollectionCandidate,
    ) -> Result<Admission, LedgerError> {
        let permits = self.registry.list_active_permits()?;
        let zones = self.registry.list_active_zones()?;
        Ok(validator::admit_collection(&permits, &zones, candidate))
    }

    /// Admission decision for quality measurements against a species' permit
    pub fn validate_quality(
        &self,
        species: &str,
        measurements: &BTreeMap<String, f64>,
    ) -> Result<Admission, LedgerError> {
        match self.registry.find_active_permit(species)? {
            Some(permit) => Ok(validator::admit_quality(&permit, measurements)),
            None => Ok(Admission::Rejected(RejectReason::UnknownSpecies {
                species: species.to_string(),
            })),
        }
    }

    // --- Stage operations ---

    /// Record a collection event: the chain root. Gated on permit rules;
    /// a rejection carries the specific reason and writes nothing.
    pub fn record_collection(
        &self,
        candidate: &CollectionCandidate,
    ) -> Result<ChainRecord, LedgerError> {
        let (permit_id, zone_id) = match self.validate_collection(candidate)? {
            Admission::Accepted { permit_id, zone_id } => (permit_id, zone_id),
            Admission::Rejected(reason) => return Err(LedgerError::Rejected(reason)),
        };

        let mut payload = Map::new();
        payload.insert("species".into(), candidate.species.clone().into());
        payload.insert("weight_kg".into(), candidate.weight_kg.into());
        payload.insert("lat".into(), candidate.lat.into());
        payload.insert("lng".into(), candidate.lng.into());
        payload.insert("month".into(), candidate.month.name().into());
        payload.insert("permit_id".into(), permit_id.into());
        if let Some(zone_id) = zone_id {
            payload.insert("zone_id".into(), zone_id.into());
        }

        self.builder.append(StageKind::Collection, payload, &[])
    }

    /// Record a quality attestation referencing one collection record.
    ///
    /// Incomplete measurements reject without producing a record.
    /// Non-compliant measurements still produce a record, tagged `failed`,
    /// to preserve the audit trail; failed records remain linkable
    /// downstream.
    pub fn record_quality(
        &self,
        collection_id: &str,
        measurements: &BTreeMap<String, f64>,
    ) -> Result<ChainRecord, LedgerError> {
        let collection = self
            .store
            .get(collection_id)?
            .ok_or_else(|| LedgerError::UnknownPredecessor(collection_id.to_string()))?;
        if collection.stage != StageKind::Collection {
            return Err(LedgerError::StageMismatch {
                stage: StageKind::Quality,
                found: collection.stage,
                id: collection.id,
            });
        }

        let species = collection
            .payload
            .get("species")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                LedgerError::Serialization(format!(
                    "collection record {} has no species field",
                    collection.id
                ))
            })?
            .to_string();

        let (status, failure) = match self.validate_quality(&species, measurements)? {
            Admission::Accepted { .. } => ("passed", None),
            Admission::Rejected(reason @ RejectReason::MetricExceeded { .. }) => {
                ("failed", Some(reason))
            }
            Admission::Rejected(reason) => return Err(LedgerError::Rejected(reason)),
        };

        let mut payload = Map::new();
        payload.insert("species".into(), species.into());
        payload.insert("status".into(), status.into());
        let measured: Map<String, Value> = measurements
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(*v)))
            .collect();
        payload.insert("measurements".into(), Value::Object(measured));
        if let Some(reason) = failure {
            payload.insert("failure_reason".into(), reason.to_string().into());
        }

        self.builder
            .append(StageKind::Quality, payload, &[collection_id.to_string()])
    }

    /// Record a processing step referencing one or more prior records
    /// (merging multiple lots is allowed). Structural gating only.
    pub fn record_processing(
        &self,
        payload: Map<String, Value>,
        predecessor_ids: &[String],
    ) -> Result<ChainRecord, LedgerError> {
        self.builder
            .append(StageKind::Processing, payload, predecessor_ids)
    }

    /// Record a manufactured batch referencing one or more processing records
    pub fn record_batch(
        &self,
        payload: Map<String, Value>,
        predecessor_ids: &[String],
    ) -> Result<ChainRecord, LedgerError> {
        for id in predecessor_ids {
            if let Some(record) = self.store.get(id)? {
                if record.stage != StageKind::Processing {
                    return Err(LedgerError::StageMismatch {
                        stage: StageKind::Batch,
                        found: record.stage,
                        id: record.id,
                    });
                }
            }
            // Missing ids fall through to the builder's resolution error
        }
        self.builder.append(StageKind::Batch, payload, predecessor_ids)
    }

    /// Raw append for callers that assemble their own stage payloads
    pub fn append_record(
        &self,
        stage: StageKind,
        payload: Map<String, Value>,
        predecessor_ids: &[String],
    ) -> Result<ChainRecord, LedgerError> {
        self.builder.append(stage, payload, predecessor_ids)
    }

    // --- Provenance ---

    /// Reconstruct and verify the full journey behind a terminal record
    pub fn get_provenance(&self, terminal_id: &str) -> Result<Provenance, LedgerError> {
        self.verifier.reconstruct(terminal_id)
    }

    /// Derived status of a record (linked / verified / tamper-suspected)
    pub fn record_status(&self, id: &str) -> Result<RecordStatus, LedgerError> {
        self.verifier.record_status(id)
    }

    /// Token payload for the external scannable-token encoder
    pub fn token_for(&self, record_id: &str) -> Result<TokenPayload, LedgerError> {
        let record = self
            .store
            .get(record_id)?
            .ok_or_else(|| LedgerError::RecordNotFound(record_id.to_string()))?;
        Ok(TokenPayload::for_record(&record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Month;

    fn ashwagandha_candidate() -> CollectionCandidate {
        // Inside Rajasthan Zone 1, in the October-March window
        CollectionCandidate::new("Ashwagandha", 27.0, 75.9, 25.5, Month::January)
    }

    fn passing_measurements() -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("moisture".to_string(), 8.5),
            ("pesticides".to_string(), 0.005),
            ("heavyMetals".to_string(), 2.1),
        ])
    }

    #[test]
    fn test_record_collection_gated() {
        let ledger = HerbLedger::temporary().unwrap();

        let record = ledger.record_collection(&ashwagandha_candidate()).unwrap();
        assert_eq!(record.stage, StageKind::Collection);
        assert_eq!(record.payload["zone_id"], "zone_1");

        let mut out_of_zone = ashwagandha_candidate();
        out_of_zone.lat = 10.0;
        let result = ledger.record_collection(&out_of_zone);
        assert!(matches!(
            result,
            Err(LedgerError::Rejected(RejectReason::OutOfZone { .. }))
        ));
    }

    #[test]
    fn test_record_quality_passed() {
        let ledger = HerbLedger::temporary().unwrap();
        let collection = ledger.record_collection(&ashwagandha_candidate()).unwrap();

        let quality = ledger
            .record_quality(&collection.id, &passing_measurements())
            .unwrap();

        assert_eq!(quality.payload["status"], "passed");
        assert_eq!(quality.predecessors[0].id, collection.id);
    }

    #[test]
    fn test_record_quality_failed_still_appends() {
        let ledger = HerbLedger::temporary().unwrap();
        let collection = ledger.record_collection(&ashwagandha_candidate()).unwrap();

        let mut wet = passing_measurements();
        wet.insert("moisture".to_string(), 14.0);
        let quality = ledger.record_quality(&collection.id, &wet).unwrap();

        assert_eq!(quality.payload["status"], "failed");
        assert!(quality.payload.contains_key("failure_reason"));

        // Failed quality records remain linkable downstream
        let mut payload = Map::new();
        payload.insert("process_type".into(), "drying".into());
        let processing = ledger
            .record_processing(payload, &[quality.id.clone()])
            .unwrap();
        assert_eq!(processing.predecessors[0].id, quality.id);
    }

    #[test]
    fn test_record_quality_incomplete_writes_nothing() {
        let ledger = HerbLedger::temporary().unwrap();
        let collection = ledger.record_collection(&ashwagandha_candidate()).unwrap();

        let incomplete = BTreeMap::from([("moisture".to_string(), 8.5)]);
        let result = ledger.record_quality(&collection.id, &incomplete);

        assert!(matches!(
            result,
            Err(LedgerError::Rejected(RejectReason::MetricMissing { .. }))
        ));
        assert_eq!(ledger.store().len(), 1);
    }

    #[test]
    fn test_batch_requires_processing_predecessors() {
        let ledger = HerbLedger::temporary().unwrap();
        let collection = ledger.record_collection(&ashwagandha_candidate()).unwrap();

        let mut payload = Map::new();
        payload.insert("product".into(), "powder".into());
        let result = ledger.record_batch(payload, &[collection.id.clone()]);

        assert!(matches!(result, Err(LedgerError::StageMismatch { .. })));
    }

    #[test]
    fn test_token_carries_id_and_fingerprint() {
        let ledger = HerbLedger::temporary().unwrap();
        let record = ledger.record_collection(&ashwagandha_candidate()).unwrap();

        let token = ledger.token_for(&record.id).unwrap();
        assert_eq!(token.record_id, record.id);
        assert_eq!(token.fingerprint, record.fingerprint);
    }
}
