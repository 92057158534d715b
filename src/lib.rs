//! Herb Ledger - chain-of-custody ledger for Ayurvedic herb provenance
//!
//! Tracks an herb lot through four custody stages - collection, quality
//! attestation, processing and batch manufacturing - and lets an end
//! consumer verify the full provenance chain from a single scannable token.
//!
//! ## Architecture
//!
//! - **Permit registry**: geofenced collection zones and per-species permits
//!   (season window, yield caps, quality thresholds); pure lookup state
//! - **Stage validator**: pure admission checks gating each stage's entry
//! - **Chain store**: append-only keyed store of immutable records
//! - **Chain builder**: constructs records, embedding predecessor
//!   fingerprints to form an append-only hash chain (a DAG, since
//!   processing may merge lots)
//! - **Chain verifier**: walks the chain backward from a terminal record,
//!   revalidates every fingerprint and assembles the consumer-facing journey
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/herb-ledger/
//! ├── ledger.sled/           # Single database, one tree per collection
//! │   ├── zones              #   geofenced collection zones
//! │   ├── permits            #   herb permits
//! │   ├── records            #   chain records (append-only)
//! │   └── children           #   forward index, rebuildable by scan
//! └── config.toml            # Configuration
//! ```

pub mod builder;
pub mod chain_store;
pub mod config;
pub mod error;
pub mod ledger;
pub mod record;
pub mod registry;
pub mod token;
pub mod validator;
pub mod verifier;

// Re-exports
pub use builder::ChainBuilder;
pub use chain_store::ChainStore;
pub use config::Config;
pub use error::LedgerError;
pub use ledger::HerbLedger;
pub use record::{ChainRecord, PredecessorLink, StageKind};
pub use registry::{BoundingBox, HerbPermit, Month, NewPermit, NewZone, PermitRegistry, Zone};
pub use token::TokenPayload;
pub use validator::{Admission, CollectionCandidate, RejectReason};
pub use verifier::{ChainVerifier, Provenance, RecordStatus, StageSummary, VerificationOutcome};
