use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use crate::cache::HotCache;
use crate::errors::EngineError;
use crate::hub::SubscriptionHub;
use crate::metrics;
use crate::model::{Order, OrderStatus, SwapParams, TokenPair, TransitionEvent};
use crate::persistence::store::{OrderStore, TransitionPatch};
use crate::queue::JobHandler;
use crate::router::Router;

/// Hook for the test-ID skip path: a job whose `order_id` doesn't pass
/// this check is skipped without mutating any state, rather than
/// burning a retry on synthetic test-harness IDs. Injectable so tests
/// can swap in a permissive validator.
pub trait OrderIdValidator: Send + Sync {
    fn is_valid(&self, order_id: &str) -> bool;
}

pub struct UuidOrderIdValidator;

impl OrderIdValidator for UuidOrderIdValidator {
    fn is_valid(&self, order_id: &str) -> bool {
        uuid::Uuid::parse_str(order_id).is_ok()
    }
}

/// The per-job state-machine driver. Invokes the Router, a Venue
/// Driver, the Order Store, and the Subscription Hub in sequence along
/// the Pending→Routing→Building→Submitted→Confirmed|Failed DAG.
/// Re-entrant across retries: each stage is only attempted when
/// the order's persisted status is still the stage's pre-state, so a
/// retried job resumes from wherever the previous attempt left off
/// rather than redoing already-committed steps.
pub struct OrderProcessor {
    store: Arc<OrderStore>,
    router: Arc<Router>,
    cache: Arc<HotCache>,
    hub: Arc<SubscriptionHub>,
    id_validator: Arc<dyn OrderIdValidator>,
    max_attempts: u32,
}

impl OrderProcessor {
    pub fn new(
        store: Arc<OrderStore>,
        router: Arc<Router>,
        cache: Arc<HotCache>,
        hub: Arc<SubscriptionHub>,
        id_validator: Arc<dyn OrderIdValidator>,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            router,
            cache,
            hub,
            id_validator,
            max_attempts,
        }
    }

    async fn emit(&self, order: &Order, message: impl Into<String>, data: Option<serde_json::Value>) {
        self.cache.put(order.clone());
        let event = TransitionEvent {
            order_id: order.id.clone(),
            status: order.status,
            message: message.into(),
            at: order.updated_at,
            data,
        };
        self.cache.record_transition(event.clone());
        self.hub.broadcast(event).await;
    }

    /// Runs one worker attempt against `order_id`. `attempt` is the
    /// queue's 0-indexed attempt counter for this job, used only to
    /// decide — identically to the queue's own retry decision — whether
    /// an error here is the order's last chance before `Failed`.
    pub async fn process(&self, order_id: &str, attempt: u32) -> Result<(), EngineError> {
        if !self.id_validator.is_valid(order_id) {
            warn!(order_id, "skipping non-canonical order id");
            return Ok(());
        }

        let mut order = self.store.find(order_id)?;
        if order.status.is_terminal() {
            // Idempotent re-delivery guard: a job can be re-leased after a
            // crash even though a prior attempt already reached a terminal state.
            return Ok(());
        }

        // The queue bumps a job's attempt counter when it recovers a
        // `Leased` record left behind by a crashed worker (`Queue::recover`).
        // That abandoned attempt never finished in `Confirmed`, so it counts
        // against `retryCount` per the data model's invariant even though no
        // explicit error was ever raised for it.
        if attempt > order.retry_count {
            self.store.increment_retry(order_id)?;
            order = self.store.find(order_id)?;
        }

        match self.drive(order).await {
            Ok(()) => Ok(()),
            Err(err) => self.handle_error(order_id, attempt, err).await,
        }
    }

    async fn drive(&self, mut order: Order) -> Result<(), EngineError> {
        let pair = TokenPair {
            token_in: order.normalized_token_in.clone(),
            token_out: order.normalized_token_out.clone(),
        };

        if order.status == OrderStatus::Pending {
            order = self
                .store
                .transition(&order.id, OrderStatus::Routing, TransitionPatch::default())?;
            self.emit(&order, "requesting quotes from all registered venues", None).await;
        }

        if order.status == OrderStatus::Routing {
            let (quote, decision) = self.router.route(&order.id, &pair, order.amount_in).await?;
            let selected = decision.selected;
            let rationale = decision.rationale.clone();

            order = self.store.transition(
                &order.id,
                OrderStatus::Building,
                TransitionPatch {
                    venue: Some(selected),
                    expected_price: Some(quote.unit_price),
                    ..Default::default()
                },
            )?;
            self.emit(&order, rationale, Some(json!({ "routingDecision": decision })))
                .await;
        }

        // A separate resume point from `Routing`'s block above: a worker
        // that crashes after the `Building` write but before the
        // `Submitted` write leaves the order parked here, and the next
        // attempt must resume from the persisted venue/expected price
        // rather than re-routing.
        if order.status == OrderStatus::Building {
            let venue = order
                .venue
                .ok_or_else(|| EngineError::Internal("order reached Building without a venue".into()))?;
            order = self
                .store
                .transition(&order.id, OrderStatus::Submitted, TransitionPatch::default())?;
            self.emit(&order, format!("submitting swap to {venue}"), None).await;
        }

        if order.status == OrderStatus::Submitted {
            let venue = order
                .venue
                .ok_or_else(|| EngineError::Internal("order reached Submitted without a venue".into()))?;
            let driver = self
                .router
                .driver_for(venue)
                .ok_or_else(|| EngineError::Internal(format!("no driver registered for venue {venue}")))?;

            let expected_unit_price = order
                .expected_price
                .ok_or_else(|| EngineError::Internal("order reached Submitted without an expected price".into()))?;

            let swap_result = driver
                .swap(&SwapParams {
                    order_id: order.id.clone(),
                    pair,
                    amount_in: order.amount_in,
                    expected_unit_price,
                    slippage_max: order.slippage,
                })
                .await
                .map_err(|e| match e {
                    crate::exchange::adapter::VenueError::Temporary(msg) => EngineError::VenueTemporary(msg),
                    crate::exchange::adapter::VenueError::Permanent(msg) => EngineError::VenuePermanent(msg),
                })?;

            let deviation = (expected_unit_price - swap_result.executed_price).abs() / expected_unit_price;
            if deviation > order.slippage {
                return Err(EngineError::SlippageExceeded {
                    expected: expected_unit_price,
                    executed: swap_result.executed_price,
                    tolerance: order.slippage,
                });
            }

            let confirmed = self.store.record_execution(
                &order.id,
                venue,
                swap_result.tx_ref.clone(),
                swap_result.executed_price,
                swap_result.amount_out,
            )?;
            self.cache.mark_terminal(&confirmed.id);
            metrics::inc_orders_confirmed(&venue.to_string());
            metrics::observe_order_latency_seconds(
                (confirmed.completed_at.unwrap_or(confirmed.updated_at) - confirmed.created_at)
                    .num_milliseconds() as f64
                    / 1000.0,
            );
            self.emit(
                &confirmed,
                format!("confirmed on {venue}, tx {}", swap_result.tx_ref),
                Some(json!({ "txRef": swap_result.tx_ref })),
            )
            .await;
            self.hub
                .close_order_subscriptions(&confirmed.id, "order confirmed")
                .await;
        }

        Ok(())
    }

    async fn handle_error(&self, order_id: &str, attempt: u32, err: EngineError) -> Result<(), EngineError> {
        let next_attempt = attempt + 1;
        let retry_count = self.store.increment_retry(order_id)?;
        let retriable = err.is_retriable() && next_attempt < self.max_attempts;

        if retriable {
            warn!(order_id, attempt, retry_count, error = %err, "attempt failed, will retry");
            return Err(err);
        }

        info!(order_id, attempt = next_attempt, error = %err, "attempts exhausted, marking failed");
        let failed = self.store.mark_failed(order_id, err.to_string())?;
        self.cache.mark_terminal(&failed.id);
        metrics::inc_orders_failed();
        self.emit(
            &failed,
            format!("failed after {retry_count} attempt(s): {err}"),
            None,
        )
        .await;
        self.hub.close_order_subscriptions(order_id, "order failed").await;

        Err(err)
    }
}

#[async_trait::async_trait]
impl JobHandler for OrderProcessor {
    async fn handle(&self, order_id: &str, attempt: u32) -> Result<(), EngineError> {
        self.process(order_id, attempt).await
    }
}
