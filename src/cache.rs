use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};

use crate::model::{Order, TransitionEvent};

const CACHE_TTL: Duration = Duration::from_secs(3600);
const UPDATE_LOG_CAP: usize = 50;

struct CacheEntry {
    order: Order,
    cached_at: DateTime<Utc>,
}

struct LogEntry {
    event: TransitionEvent,
    cached_at: DateTime<Utc>,
}

/// Read-through cache over the Order Store, plus a bounded per-order
/// transition log. Never the source of truth: every write here happens
/// strictly after the corresponding Store write has committed.
pub struct HotCache {
    orders: DashMap<String, CacheEntry>,
    active: DashSet<String>,
    logs: DashMap<String, VecDeque<LogEntry>>,
}

impl HotCache {
    pub fn new() -> Self {
        Self {
            orders: DashMap::new(),
            active: DashSet::new(),
            logs: DashMap::new(),
        }
    }

    fn is_expired(cached_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        (now - cached_at)
            .to_std()
            .map(|elapsed| elapsed > CACHE_TTL)
            .unwrap_or(false)
    }

    pub fn put(&self, order: Order) {
        let now = Utc::now();
        self.active.insert(order.id.clone());
        self.orders.insert(
            order.id.clone(),
            CacheEntry {
                order,
                cached_at: now,
            },
        );
    }

    pub fn get(&self, id: &str) -> Option<Order> {
        let now = Utc::now();
        let entry = self.orders.get(id)?;
        if Self::is_expired(entry.cached_at, now) {
            drop(entry);
            self.orders.remove(id);
            return None;
        }
        Some(entry.order.clone())
    }

    pub fn mark_terminal(&self, id: &str) {
        self.active.remove(id);
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.active.iter().map(|id| id.clone()).collect()
    }

    pub fn record_transition(&self, event: TransitionEvent) {
        let now = Utc::now();
        let mut log = self.logs.entry(event.order_id.clone()).or_insert_with(VecDeque::new);
        log.push_front(LogEntry {
            event,
            cached_at: now,
        });
        if log.len() > UPDATE_LOG_CAP {
            log.truncate(UPDATE_LOG_CAP);
        }
    }

    /// Newest-first transition history for an order, filtered to entries
    /// still inside the TTL window.
    pub fn transition_log(&self, id: &str) -> Vec<TransitionEvent> {
        let now = Utc::now();
        match self.logs.get(id) {
            Some(log) => log
                .iter()
                .filter(|entry| !Self::is_expired(entry.cached_at, now))
                .map(|entry| entry.event.clone())
                .collect(),
            None => Vec::new(),
        }
    }
}

impl Default for HotCache {
    fn default() -> Self {
        Self::new()
    }
}
