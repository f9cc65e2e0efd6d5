use redb::{ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::model::{Order, OrderStatus};
use crate::persistence::redb_store::{RedbStore, StoreError};

const WAL_TABLE: TableDefinition<u64, Vec<u8>> = TableDefinition::new("wal_log");
const META_TABLE: TableDefinition<&str, Vec<u8>> = TableDefinition::new("metadata");

/// One immutable log entry per durable write. Appended before the
/// corresponding mutable table is updated, so a crash between the two
/// leaves a replayable trail rather than a half-applied state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalEntry {
    OrderCreated(Box<Order>),
    OrderTransitioned {
        order_id: String,
        status: OrderStatus,
    },
    JobEnqueued {
        order_id: String,
    },
    JobLeaseReleased {
        order_id: String,
        requeued: bool,
    },
}

pub struct WalManager {
    store: Arc<RedbStore>,
}

impl WalManager {
    pub fn new(store: Arc<RedbStore>) -> Self {
        Self { store }
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        let txn = self.store.begin_write()?;
        {
            let _ = txn.open_table(WAL_TABLE)?;
            let _ = txn.open_table(META_TABLE)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn append(&self, entry: &WalEntry) -> Result<u64, StoreError> {
        let txn = self.store.begin_write()?;
        let sequence_id = {
            let mut table = txn.open_table(WAL_TABLE)?;
            let last_id = table.last()?.map(|(k, _)| k.value()).unwrap_or(0);
            let new_id = last_id + 1;

            let data = serde_json::to_vec(entry)?;
            table.insert(new_id, data)?;
            new_id
        };
        txn.commit()?;

        debug!(sequence_id, "wal append");
        Ok(sequence_id)
    }

    pub fn read_from(&self, start_seq: u64) -> Result<Vec<(u64, WalEntry)>, StoreError> {
        let txn = self.store.begin_read()?;
        let table = txn.open_table(WAL_TABLE)?;

        let mut entries = Vec::new();
        for result in table.range(start_seq..)? {
            let (k, v) = result?;
            let entry: WalEntry = serde_json::from_slice(&v.value())?;
            entries.push((k.value(), entry));
        }
        Ok(entries)
    }
}
