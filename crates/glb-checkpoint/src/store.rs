//! CheckpointStore — per-slot work snapshots with transactional handoff.

use std::path::Path;
use std::sync::Arc;

use glb_core::Bag;
use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{CheckpointError, CheckpointResult};
use crate::tables::SLOTS;
use crate::types::SlotRecord;

/// Convert any `Display` error into a `CheckpointError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| CheckpointError::$variant(e.to_string())
    };
}

/// Thread-safe checkpoint store backed by redb.
///
/// A slot's record is the full image of its work queue: every bag plus
/// the partial results collected during processing (see [`SlotRecord`]).
/// Records are JSON-encoded.
#[derive(Clone)]
pub struct CheckpointStore {
    db: Arc<Database>,
}

impl CheckpointStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> CheckpointResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "checkpoint store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> CheckpointResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        Ok(store)
    }

    fn ensure_tables(&self) -> CheckpointResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(SLOTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Read a slot's last checkpoint.
    pub fn get<B: Bag>(&self, slot: u32) -> CheckpointResult<Option<SlotRecord<B>>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SLOTS).map_err(map_err!(Table))?;
        match table.get(slot).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: SlotRecord<B> =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Write a slot's record. Last-writer-wins; safe to retry with the
    /// identical payload.
    pub fn put<B: Bag>(&self, slot: u32, record: &SlotRecord<B>) -> CheckpointResult<()> {
        self.put_many(&[(slot, record)])
    }

    /// Write several slots' records in one transaction.
    pub fn put_many<B: Bag>(&self, entries: &[(u32, &SlotRecord<B>)]) -> CheckpointResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SLOTS).map_err(map_err!(Table))?;
            for (slot, record) in entries {
                let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
                table
                    .insert(slot, value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Atomic checkpoint + handoff: in a single transaction, write the
    /// victim's remaining record and merge `loot` into the thief slot's
    /// prior record.
    ///
    /// The thief's record keeps its accumulated progress and collected
    /// folds: a thief only ever steals after checkpointing its drained
    /// queue, so merging the progress-free fragment into the old record
    /// preserves everything.
    pub fn transfer<B: Bag>(
        &self,
        victim: u32,
        victim_record: &SlotRecord<B>,
        thief: u32,
        loot: B,
    ) -> CheckpointResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SLOTS).map_err(map_err!(Table))?;

            let value = serde_json::to_vec(victim_record).map_err(map_err!(Serialize))?;
            table
                .insert(victim, value.as_slice())
                .map_err(map_err!(Write))?;

            let mut record: SlotRecord<B> = match table.get(thief).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => SlotRecord::default(),
            };
            match record.bags.iter_mut().find(|b| b.kind() == loot.kind()) {
                Some(bag) => bag.merge(loot),
                None => record.bags.push(loot),
            }
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            table
                .insert(thief, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(victim, thief, "checkpoint handoff committed");
        Ok(())
    }

    /// Drop every record, between independent computations.
    pub fn clear(&self) -> CheckpointResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.delete_table(SLOTS).map_err(map_err!(Table))?;
        txn.open_table(SLOTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}
