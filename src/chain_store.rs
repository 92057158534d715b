//! Append-only chain record store
//!
//! Keyed storage of [`ChainRecord`]s plus a forward index from a record id
//! to the ids of records that reference it. `put` is insert-if-absent: a
//! record id is written at most once and never updated in place, which is
//! what makes a retried append safe and the chain tamper-evident.
//!
//! The child index is derived state. It is maintained on every `put` and
//! can be rebuilt from a full scan of the records tree.

use tracing::{debug, info};

use crate::error::LedgerError;
use crate::record::ChainRecord;

/// Sled-backed store for chain records
#[derive(Clone)]
pub struct ChainStore {
    records: sled::Tree,
    children: sled::Tree,
}

impl ChainStore {
    /// Open the record trees on an existing database
    pub fn open(db: &sled::Db) -> Result<Self, LedgerError> {
        Ok(Self {
            records: db.open_tree("records")?,
            children: db.open_tree("children")?,
        })
    }

    /// Persist a record. Fails with `DuplicateRecord` if the id already
    /// exists; the stored record is never overwritten. Flushes before
    /// reporting success so a committed record survives restart.
    pub fn put(&self, record: &ChainRecord) -> Result<(), LedgerError> {
        let value = encode(record)?;

        // Insert-if-absent: exactly one writer wins a same-id race
        self.records
            .compare_and_swap(record.id.as_bytes(), None as Option<&[u8]>, Some(value))?
            .map_err(|_| LedgerError::DuplicateRecord(record.id.clone()))?;

        for link in &record.predecessors {
            self.index_child(&link.id, &record.id)?;
        }

        self.records.flush()?;
        debug!(record_id = %record.id, stage = %record.stage, "Stored chain record");
        Ok(())
    }

    /// Fetch a record by id
    pub fn get(&self, id: &str) -> Result<Option<ChainRecord>, LedgerError> {
        match self.records.get(id.as_bytes())? {
            Some(value) => Ok(Some(decode(&value)?)),
            None => Ok(None),
        }
    }

    pub fn contains(&self, id: &str) -> Result<bool, LedgerError> {
        Ok(self.records.contains_key(id.as_bytes())?)
    }

    /// Ids of records whose predecessors include `id`
    pub fn child_ids(&self, id: &str) -> Result<Vec<String>, LedgerError> {
        match self.children.get(id.as_bytes())? {
            Some(value) => decode(&value),
            None => Ok(Vec::new()),
        }
    }

    /// Records whose predecessors include `id` (forward traversal for audit)
    pub fn children(&self, id: &str) -> Result<Vec<ChainRecord>, LedgerError> {
        let mut records = Vec::new();
        for child_id in self.child_ids(id)? {
            if let Some(record) = self.get(&child_id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate all stored records (scan order: id)
    pub fn iter(&self) -> impl Iterator<Item = Result<ChainRecord, LedgerError>> {
        self.records.iter().map(|item| {
            let (_, value) = item?;
            decode(&value)
        })
    }

    /// Rebuild the child index from a full scan of the records tree.
    ///
    /// Returns the number of records scanned.
    pub fn rebuild_child_index(&self) -> Result<u64, LedgerError> {
        self.children.clear()?;

        let mut scanned = 0u64;
        for record in self.iter() {
            let record = record?;
            for link in &record.predecessors {
                self.index_child(&link.id, &record.id)?;
            }
            scanned += 1;
        }

        self.children.flush()?;
        info!(records = scanned, "Rebuilt child index");
        Ok(scanned)
    }

    fn index_child(&self, parent: &str, child: &str) -> Result<(), LedgerError> {
        let child = child.to_string();
        self.children.fetch_and_update(parent.as_bytes(), |old| {
            let mut ids: Vec<String> = old
                .and_then(|bytes| rmp_serde::from_slice(bytes).ok())
                .unwrap_or_default();
            if !ids.contains(&child) {
                ids.push(child.clone());
            }
            rmp_serde::to_vec(&ids).ok()
        })?;
        Ok(())
    }
}

fn encode(record: &ChainRecord) -> Result<Vec<u8>, LedgerError> {
    rmp_serde::to_vec(record).map_err(|e| LedgerError::Serialization(e.to_string()))
}

fn decode<T: for<'de> serde::Deserialize<'de>>(bytes: &[u8]) -> Result<T, LedgerError> {
    rmp_serde::from_slice(bytes).map_err(|e| LedgerError::Serialization(e.to_string()))
}
