use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::metrics;
use crate::model::TransitionEvent;

/// Per-order fan-out registry. Owns every subscriber sink; closing
/// the Hub closes them all. Delivery is at-least-once to sinks present
/// at broadcast time — a sink registering after a transition does not
/// receive the missed one (the Hot Cache's update log is the replay
/// mechanism for that).
const SEND_TIMEOUT: Duration = Duration::from_secs(2);
const SINK_BUFFER: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubscriptionMessage {
    Connected {
        #[serde(rename = "orderId")]
        order_id: String,
        at: chrono::DateTime<Utc>,
    },
    StatusUpdate {
        #[serde(rename = "orderId")]
        order_id: String,
        status: crate::model::OrderStatus,
        at: chrono::DateTime<Utc>,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },
    Closing {
        #[serde(rename = "orderId")]
        order_id: String,
        reason: String,
        at: chrono::DateTime<Utc>,
    },
}

impl SubscriptionMessage {
    pub fn from_transition(event: &TransitionEvent) -> Self {
        SubscriptionMessage::StatusUpdate {
            order_id: event.order_id.clone(),
            status: event.status,
            at: event.at,
            message: event.message.clone(),
            data: event.data.clone(),
        }
    }
}

struct Sink {
    tx: mpsc::Sender<SubscriptionMessage>,
}

#[derive(Default)]
pub struct HubStats {
    pub total_registered: usize,
    pub active_orders: usize,
    pub active_sinks: usize,
}

/// Concurrent map keyed by `order_id`, each entry holding the set of
/// live sinks for that order. `DashMap`'s per-shard locking keeps
/// registration/broadcast on unrelated orders from contending.
pub struct SubscriptionHub {
    registry: DashMap<String, Vec<Sink>>,
}

impl SubscriptionHub {
    pub fn new() -> Self {
        Self {
            registry: DashMap::new(),
        }
    }

    /// Subscribes a sink to `order_id`'s transitions. Immediately emits
    /// a `Connected` control message on the returned receiver.
    pub fn register(&self, order_id: &str) -> mpsc::Receiver<SubscriptionMessage> {
        let (tx, rx) = mpsc::channel(SINK_BUFFER);
        let connected = SubscriptionMessage::Connected {
            order_id: order_id.to_string(),
            at: Utc::now(),
        };
        // Best-effort: a fresh channel never has a full buffer, so this practically never fails.
        let _ = tx.try_send(connected);

        self.registry
            .entry(order_id.to_string())
            .or_default()
            .push(Sink { tx });
        metrics::set_hub_active_subscriptions(self.stats().active_sinks as i64);

        rx
    }

    /// Delivers `event` to every live sink for `event.order_id`. Sends
    /// fire concurrently with a bounded timeout so one slow subscriber
    /// never blocks another; dead sinks are dropped during delivery.
    pub async fn broadcast(&self, event: TransitionEvent) {
        let order_id = event.order_id.clone();
        let message = SubscriptionMessage::from_transition(&event);

        let sinks = match self.registry.get(&order_id) {
            Some(entry) => entry
                .iter()
                .map(|sink| sink.tx.clone())
                .collect::<Vec<_>>(),
            None => return,
        };

        if sinks.is_empty() {
            return;
        }

        let sends = sinks.into_iter().map(|tx| {
            let message = message.clone();
            async move { tokio::time::timeout(SEND_TIMEOUT, tx.send(message)).await }
        });
        let results = futures::future::join_all(sends).await;
        metrics::inc_hub_broadcasts();

        if let Some(mut entry) = self.registry.get_mut(&order_id) {
            let mut idx = 0;
            entry.retain(|_| {
                let alive = matches!(results.get(idx), Some(Ok(Ok(())))) ;
                idx += 1;
                alive
            });
        }
        metrics::set_hub_active_subscriptions(self.stats().active_sinks as i64);
    }

    /// Emits a `Closing` control message to every sink for `order_id`
    /// and removes the order from the registry. Called on terminal
    /// transitions (`Confirmed`/`Failed`).
    pub async fn close_order_subscriptions(&self, order_id: &str, reason: &str) {
        let Some((_, sinks)) = self.registry.remove(order_id) else {
            return;
        };
        let closing = SubscriptionMessage::Closing {
            order_id: order_id.to_string(),
            reason: reason.to_string(),
            at: Utc::now(),
        };
        let sends = sinks.into_iter().map(|sink| {
            let closing = closing.clone();
            async move {
                let _ = tokio::time::timeout(SEND_TIMEOUT, sink.tx.send(closing)).await;
            }
        });
        futures::future::join_all(sends).await;
        metrics::set_hub_active_subscriptions(self.stats().active_sinks as i64);
    }

    /// Closes every registered sink with reason `"shutting down"`.
    /// Invoked at shutdown.
    pub async fn close_all(&self) {
        let order_ids: Vec<String> = self.registry.iter().map(|e| e.key().clone()).collect();
        info!(count = order_ids.len(), "closing all subscriptions");
        for order_id in order_ids {
            self.close_order_subscriptions(&order_id, "shutting down").await;
        }
    }

    pub fn stats(&self) -> HubStats {
        let mut active_sinks = 0;
        for entry in self.registry.iter() {
            active_sinks += entry.value().len();
        }
        HubStats {
            total_registered: active_sinks,
            active_orders: self.registry.len(),
            active_sinks,
        }
    }
}

impl Default for SubscriptionHub {
    fn default() -> Self {
        Self::new()
    }
}
