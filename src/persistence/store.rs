use std::sync::Arc;

use redb::{ReadableTable, TableDefinition};
use rust_decimal::Decimal;

use crate::context::ExecutionContext;
use crate::errors::EngineError;
use crate::model::{Order, OrderFilter, OrderList, OrderStatus, Pagination, Venue};
use crate::persistence::redb_store::{RedbStore, StoreError};
use crate::persistence::wal::{WalEntry, WalManager};

const ORDERS_TABLE: TableDefinition<&str, Vec<u8>> = TableDefinition::new("orders");

/// Edges legal per the transition graph in the Order Processor design.
/// Terminal states (`Confirmed`, `Failed`) have no outgoing edges.
fn is_legal_transition(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    matches!(
        (from, to),
        (Pending, Routing)
            | (Routing, Building)
            | (Routing, Failed)
            | (Building, Submitted)
            | (Submitted, Confirmed)
            | (Submitted, Failed)
    )
}

/// A partial update applied alongside a status transition, inside the
/// same write transaction.
#[derive(Debug, Clone, Default)]
pub struct TransitionPatch {
    pub venue: Option<Venue>,
    pub tx_ref: Option<String>,
    pub amount_out: Option<Decimal>,
    pub expected_price: Option<Decimal>,
    pub executed_price: Option<Decimal>,
    pub error_message: Option<String>,
}

/// The single authority for order state. The Hot Cache is a
/// read-through optimization rebuilt from this store; it is never
/// consulted to decide whether a write is legal.
pub struct OrderStore {
    store: Arc<RedbStore>,
    wal: Arc<WalManager>,
    ctx: ExecutionContext,
}

impl OrderStore {
    pub fn new(store: Arc<RedbStore>, wal: Arc<WalManager>, ctx: ExecutionContext) -> Self {
        Self { store, wal, ctx }
    }

    fn read_order(&self, id: &str) -> Result<Option<Order>, StoreError> {
        let txn = self.store.begin_read()?;
        let table = match txn.open_table(ORDERS_TABLE) {
            Ok(table) => table,
            // Nothing has ever been written yet — an empty table, not an error.
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let maybe = table
            .get(id)?
            .map(|v| serde_json::from_slice::<Order>(&v.value()))
            .transpose()?;
        Ok(maybe)
    }

    pub fn create(
        &self,
        token_in: String,
        token_out: String,
        normalized_token_in: String,
        normalized_token_out: String,
        amount_in: Decimal,
        slippage: Decimal,
        order_type: crate::model::OrderType,
    ) -> Result<Order, EngineError> {
        let now = self.ctx.time.now();
        let order = Order {
            id: self.ctx.id.new_id(),
            order_type,
            status: OrderStatus::Pending,
            token_in,
            token_out,
            normalized_token_in,
            normalized_token_out,
            amount_in,
            slippage,
            amount_out: None,
            expected_price: None,
            executed_price: None,
            venue: None,
            tx_ref: None,
            error_message: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        self.wal
            .append(&WalEntry::OrderCreated(Box::new(order.clone())))
            .map_err(|e| EngineError::Internal(e.to_string()))?;

        let txn = self
            .store
            .begin_write()
            .map_err(|e| EngineError::Internal(e.to_string()))?;
        {
            let mut table = txn
                .open_table(ORDERS_TABLE)
                .map_err(|e| EngineError::Internal(e.to_string()))?;
            let data = serde_json::to_vec(&order).map_err(|e| EngineError::Internal(e.to_string()))?;
            table
                .insert(order.id.as_str(), data)
                .map_err(|e| EngineError::Internal(e.to_string()))?;
        }
        txn.commit().map_err(|e| EngineError::Internal(e.to_string()))?;

        Ok(order)
    }

    pub fn find(&self, id: &str) -> Result<Order, EngineError> {
        self.read_order(id)
            .map_err(|e| EngineError::Internal(e.to_string()))?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    pub fn list(&self, filter: &OrderFilter, limit: usize, offset: usize) -> Result<OrderList, EngineError> {
        let txn = self
            .store
            .begin_read()
            .map_err(|e| EngineError::Internal(e.to_string()))?;
        let table = match txn.open_table(ORDERS_TABLE) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => {
                return Ok(OrderList {
                    orders: Vec::new(),
                    pagination: Pagination { limit, offset, total: 0 },
                });
            }
            Err(e) => return Err(EngineError::Internal(e.to_string())),
        };

        let mut all = Vec::new();
        for res in table
            .range::<&str>(..)
            .map_err(|e| EngineError::Internal(e.to_string()))?
        {
            let (_, v) = res.map_err(|e| EngineError::Internal(e.to_string()))?;
            let order: Order =
                serde_json::from_slice(&v.value()).map_err(|e| EngineError::Internal(e.to_string()))?;
            if filter.status.map(|s| s == order.status).unwrap_or(true) {
                all.push(order);
            }
        }
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = all.len();
        let page = all.into_iter().skip(offset).take(limit.min(100)).collect();

        Ok(OrderList {
            orders: page,
            pagination: Pagination { limit, offset, total },
        })
    }

    pub fn count(&self, status: Option<OrderStatus>) -> Result<usize, EngineError> {
        let filter = OrderFilter { status };
        Ok(self.list(&filter, usize::MAX, 0)?.pagination.total)
    }

    /// Atomic status transition plus patch, inside one write transaction.
    /// Rejects illegal edges and any mutation on an order already terminal.
    pub fn transition(
        &self,
        id: &str,
        new_status: OrderStatus,
        patch: TransitionPatch,
    ) -> Result<Order, EngineError> {
        let txn = self
            .store
            .begin_write()
            .map_err(|e| EngineError::Internal(e.to_string()))?;

        let mut order = {
            let table = txn
                .open_table(ORDERS_TABLE)
                .map_err(|e| EngineError::Internal(e.to_string()))?;
            let existing = table
                .get(id)
                .map_err(|e| EngineError::Internal(e.to_string()))?
                .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
            serde_json::from_slice::<Order>(&existing.value())
                .map_err(|e| EngineError::Internal(e.to_string()))?
        };

        if order.status.is_terminal() {
            return Err(EngineError::IllegalTransition {
                order_id: id.to_string(),
                from: order.status,
                to: new_status,
            });
        }
        if !is_legal_transition(order.status, new_status) {
            return Err(EngineError::IllegalTransition {
                order_id: id.to_string(),
                from: order.status,
                to: new_status,
            });
        }

        order.status = new_status;
        if let Some(v) = patch.venue {
            order.venue = Some(v);
        }
        if let Some(t) = patch.tx_ref {
            order.tx_ref = Some(t);
        }
        if let Some(a) = patch.amount_out {
            order.amount_out = Some(a);
        }
        if let Some(p) = patch.expected_price {
            order.expected_price = Some(p);
        }
        if let Some(p) = patch.executed_price {
            order.executed_price = Some(p);
        }
        if let Some(m) = patch.error_message {
            order.error_message = Some(m);
        }

        let now = self.ctx.time.now();
        order.updated_at = now;
        if new_status.is_terminal() {
            order.completed_at = Some(now);
        }

        {
            let mut table = txn
                .open_table(ORDERS_TABLE)
                .map_err(|e| EngineError::Internal(e.to_string()))?;
            let data = serde_json::to_vec(&order).map_err(|e| EngineError::Internal(e.to_string()))?;
            table
                .insert(order.id.as_str(), data)
                .map_err(|e| EngineError::Internal(e.to_string()))?;
        }
        txn.commit().map_err(|e| EngineError::Internal(e.to_string()))?;

        self.wal
            .append(&WalEntry::OrderTransitioned {
                order_id: order.id.clone(),
                status: order.status,
            })
            .map_err(|e| EngineError::Internal(e.to_string()))?;

        Ok(order)
    }

    /// Convenience for the `Submitted → Confirmed` edge.
    pub fn record_execution(
        &self,
        id: &str,
        venue: Venue,
        tx_ref: String,
        executed_price: Decimal,
        amount_out: Decimal,
    ) -> Result<Order, EngineError> {
        self.transition(
            id,
            OrderStatus::Confirmed,
            TransitionPatch {
                venue: Some(venue),
                tx_ref: Some(tx_ref),
                executed_price: Some(executed_price),
                amount_out: Some(amount_out),
                ..Default::default()
            },
        )
    }

    pub fn increment_retry(&self, id: &str) -> Result<u32, EngineError> {
        let txn = self
            .store
            .begin_write()
            .map_err(|e| EngineError::Internal(e.to_string()))?;
        let mut order = {
            let table = txn
                .open_table(ORDERS_TABLE)
                .map_err(|e| EngineError::Internal(e.to_string()))?;
            let existing = table
                .get(id)
                .map_err(|e| EngineError::Internal(e.to_string()))?
                .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
            serde_json::from_slice::<Order>(&existing.value())
                .map_err(|e| EngineError::Internal(e.to_string()))?
        };

        if order.status.is_terminal() {
            return Err(EngineError::IllegalTransition {
                order_id: id.to_string(),
                from: order.status,
                to: order.status,
            });
        }

        order.retry_count += 1;
        order.updated_at = self.ctx.time.now();
        let retry_count = order.retry_count;

        {
            let mut table = txn
                .open_table(ORDERS_TABLE)
                .map_err(|e| EngineError::Internal(e.to_string()))?;
            let data = serde_json::to_vec(&order).map_err(|e| EngineError::Internal(e.to_string()))?;
            table
                .insert(order.id.as_str(), data)
                .map_err(|e| EngineError::Internal(e.to_string()))?;
        }
        txn.commit().map_err(|e| EngineError::Internal(e.to_string()))?;

        Ok(retry_count)
    }

    pub fn mark_failed(&self, id: &str, error_message: String) -> Result<Order, EngineError> {
        self.transition(
            id,
            OrderStatus::Failed,
            TransitionPatch {
                error_message: Some(error_message),
                ..Default::default()
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use rust_decimal_macros::dec;
    use tempfile::NamedTempFile;

    fn make_store() -> OrderStore {
        let path = NamedTempFile::new().unwrap().into_temp_path();
        let redb = Arc::new(RedbStore::new(&path).unwrap());
        let wal = Arc::new(WalManager::new(redb.clone()));
        wal.initialize().unwrap();
        OrderStore::new(redb, wal, ExecutionContext::new_simulated(0))
    }

    #[test]
    fn create_assigns_pending_status() {
        let store = make_store();
        let order = store
            .create(
                "11111111111111111111111111111111".to_string(),
                "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v".to_string(),
                "So11111111111111111111111111111111111111112".to_string(),
                "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v".to_string(),
                dec!(1.5),
                dec!(0.01),
                crate::model::OrderType::Market,
            )
            .unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[test]
    fn transition_follows_legal_dag() {
        let store = make_store();
        let order = store
            .create(
                "a".to_string(),
                "b".to_string(),
                "a".to_string(),
                "b".to_string(),
                dec!(1),
                dec!(0.01),
                crate::model::OrderType::Market,
            )
            .unwrap();

        let routed = store
            .transition(&order.id, OrderStatus::Routing, TransitionPatch::default())
            .unwrap();
        assert_eq!(routed.status, OrderStatus::Routing);

        let illegal = store.transition(&order.id, OrderStatus::Confirmed, TransitionPatch::default());
        assert!(matches!(illegal, Err(EngineError::IllegalTransition { .. })));
    }

    #[test]
    fn terminal_state_rejects_further_mutation() {
        let store = make_store();
        let order = store
            .create(
                "a".to_string(),
                "b".to_string(),
                "a".to_string(),
                "b".to_string(),
                dec!(1),
                dec!(0.01),
                crate::model::OrderType::Market,
            )
            .unwrap();
        store
            .transition(&order.id, OrderStatus::Routing, TransitionPatch::default())
            .unwrap();
        store.mark_failed(&order.id, "boom".to_string()).unwrap();

        let after_terminal = store.transition(&order.id, OrderStatus::Routing, TransitionPatch::default());
        assert!(matches!(after_terminal, Err(EngineError::IllegalTransition { .. })));
    }

    #[test]
    fn record_execution_sets_venue_and_tx_ref() {
        let store = make_store();
        let order = store
            .create(
                "a".to_string(),
                "b".to_string(),
                "a".to_string(),
                "b".to_string(),
                dec!(1),
                dec!(0.01),
                crate::model::OrderType::Market,
            )
            .unwrap();
        store
            .transition(&order.id, OrderStatus::Routing, TransitionPatch::default())
            .unwrap();
        store
            .transition(&order.id, OrderStatus::Building, TransitionPatch::default())
            .unwrap();
        store
            .transition(&order.id, OrderStatus::Submitted, TransitionPatch::default())
            .unwrap();

        let confirmed = store
            .record_execution(&order.id, Venue::Raydium, "tx-1".to_string(), dec!(1.0), dec!(1.5))
            .unwrap();
        assert_eq!(confirmed.status, OrderStatus::Confirmed);
        assert_eq!(confirmed.venue, Some(Venue::Raydium));
        assert!(confirmed.completed_at.is_some());
    }
}
