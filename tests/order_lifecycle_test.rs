//! End-to-end order lifecycle tests, wiring real components (Store,
//! Queue, Router, Hub) together rather than mocking any of them.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use actix_web::{test, web, App};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tempfile::NamedTempFile;

use swap_execution_engine::api::{self, AppState};
use swap_execution_engine::cache::HotCache;
use swap_execution_engine::context::ExecutionContext;
use swap_execution_engine::errors::EngineError;
use swap_execution_engine::exchange::adapter::{VenueDriver, VenueError};
use swap_execution_engine::exchange::meteora::MeteoraDriver;
use swap_execution_engine::exchange::raydium::RaydiumDriver;
use swap_execution_engine::hub::{SubscriptionHub, SubscriptionMessage};
use swap_execution_engine::model::{OrderStatus, Quote, SwapParams, SwapResult, TokenPair, Venue};
use swap_execution_engine::persistence::redb_store::RedbStore;
use swap_execution_engine::persistence::store::OrderStore;
use swap_execution_engine::persistence::wal::WalManager;
use swap_execution_engine::processor::{OrderProcessor, UuidOrderIdValidator};
use swap_execution_engine::queue::{JobHandler, Queue, QueueConfig};
use swap_execution_engine::router::Router;

const NATIVE_SENTINEL: &str = "11111111111111111111111111111111";
const USDC: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
const WRAPPED_NATIVE: &str = "So11111111111111111111111111111111111111112";

struct Harness {
    store: Arc<OrderStore>,
    queue: Arc<Queue>,
    cache: Arc<HotCache>,
    hub: Arc<SubscriptionHub>,
}

fn build_harness(drivers: Vec<Arc<dyn VenueDriver>>, max_attempts: u32) -> Harness {
    let path = NamedTempFile::new().unwrap().into_temp_path();
    let redb = Arc::new(RedbStore::new(&path).unwrap());
    let wal = Arc::new(WalManager::new(redb.clone()));
    wal.initialize().unwrap();

    let store = Arc::new(OrderStore::new(redb.clone(), wal.clone(), ExecutionContext::new_system()));
    let cache = Arc::new(HotCache::new());
    let hub = Arc::new(SubscriptionHub::new());

    let mut router = Router::new();
    for driver in drivers {
        router.register(driver);
    }
    let router = Arc::new(router);

    let queue_config = QueueConfig {
        concurrency: 4,
        rate_limit_per_minute: 1000,
        max_attempts,
        ..QueueConfig::default()
    };
    let queue = Arc::new(Queue::new(redb, wal, queue_config));

    let processor = Arc::new(OrderProcessor::new(
        store.clone(),
        router,
        cache.clone(),
        hub.clone(),
        Arc::new(UuidOrderIdValidator),
        max_attempts,
    ));
    queue.clone().spawn_workers(processor);

    Harness { store, queue, cache, hub }
}

fn reference_drivers() -> Vec<Arc<dyn VenueDriver>> {
    vec![
        Arc::new(RaydiumDriver::new(dec!(0.0025))),
        Arc::new(MeteoraDriver::new(dec!(0.0020))),
    ]
}

async fn wait_for_terminal(store: &Arc<OrderStore>, order_id: &str) -> swap_execution_engine::model::Order {
    for _ in 0..200 {
        let order = store.find(order_id).unwrap();
        if order.status.is_terminal() {
            return order;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("order {order_id} never reached a terminal state");
}

/// Happy path, native SOL to USDC. A subscriber registered before
/// processing begins sees the full ordered sequence ending in Closing,
/// and the final Get shows a confirmed swap.
#[tokio::test]
async fn test_happy_path_native_to_token() {
    let h = build_harness(reference_drivers(), 3);

    let order = h
        .store
        .create(
            NATIVE_SENTINEL.to_string(),
            USDC.to_string(),
            WRAPPED_NATIVE.to_string(),
            USDC.to_string(),
            dec!(1.5),
            dec!(0.5), // wide band: reference drivers jitter the unit price randomly
            swap_execution_engine::model::OrderType::Market,
        )
        .unwrap();
    h.cache.put(order.clone());

    let mut rx = h.hub.register(&order.id);
    h.queue.enqueue(&order.id).unwrap();

    let mut statuses = Vec::new();
    loop {
        let msg = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .expect("subscriber timed out waiting for a message")
            .expect("hub closed the channel without a Closing message");
        match &msg {
            SubscriptionMessage::Connected { .. } => statuses.push("connected"),
            SubscriptionMessage::StatusUpdate { status, .. } => statuses.push(status_label(*status)),
            SubscriptionMessage::Closing { .. } => {
                statuses.push("closing");
                break;
            }
        }
    }

    assert_eq!(
        statuses,
        vec!["connected", "routing", "building", "submitted", "confirmed", "closing"]
    );

    let confirmed = wait_for_terminal(&h.store, &order.id).await;
    assert_eq!(confirmed.status, OrderStatus::Confirmed);
    assert!(matches!(confirmed.venue, Some(Venue::Raydium) | Some(Venue::Meteora)));
    assert!(confirmed.tx_ref.is_some_and(|t| !t.is_empty()));
    assert!(confirmed.amount_out.unwrap() > Decimal::ZERO);
    assert!(confirmed.completed_at.is_some());
}

fn status_label(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Pending => "pending",
        OrderStatus::Routing => "routing",
        OrderStatus::Building => "building",
        OrderStatus::Submitted => "submitted",
        OrderStatus::Confirmed => "confirmed",
        OrderStatus::Failed => "failed",
    }
}

/// Invalid normalization. Submitting the native sentinel against
/// its own wrapped form is rejected with 400 before any order row is
/// created, exercised through the actual HTTP surface.
#[tokio::test]
async fn test_same_underlying_asset_rejected_over_http() {
    let h = build_harness(reference_drivers(), 3);
    let app_state = web::Data::new(AppState {
        store: h.store.clone(),
        queue: h.queue.clone(),
        cache: h.cache.clone(),
        hub: h.hub.clone(),
        subscribe_base_url: "ws://localhost:8080/subscribe".to_string(),
    });
    let app = test::init_service(App::new().app_data(app_state).configure(api::config)).await;

    let req = test::TestRequest::post()
        .uri("/orders")
        .set_json(serde_json::json!({
            "tokenIn": NATIVE_SENTINEL,
            "tokenOut": WRAPPED_NATIVE,
            "amountIn": 1,
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "validation");

    assert_eq!(h.store.count(None).unwrap(), 0);
}

struct AlwaysSlips {
    venue: Venue,
}

#[async_trait]
impl VenueDriver for AlwaysSlips {
    async fn quote(&self, pair: &TokenPair, amount_in: Decimal) -> Result<Quote, VenueError> {
        Ok(Quote {
            venue: self.venue,
            pair: pair.clone(),
            amount_in,
            amount_out: amount_in,
            unit_price: dec!(1.0),
            fee_rate: dec!(0.001),
            price_impact: dec!(0.01),
            at: Utc::now(),
        })
    }

    async fn swap(&self, params: &SwapParams) -> Result<SwapResult, VenueError> {
        Ok(SwapResult {
            ok: true,
            tx_ref: "tx".to_string(),
            executed_price: params.expected_unit_price * dec!(0.5), // always violates slippage
            amount_out: params.amount_in,
            realized_slippage: dec!(0.5),
            at: Utc::now(),
            needs_wrap_in: false,
            needs_unwrap_out: false,
        })
    }

    fn venue(&self) -> Venue {
        self.venue
    }

    fn name(&self) -> &str {
        "always-slips"
    }
}

/// Slippage violation retried then failed. Three worker attempts
/// (backoff included, with a small base delay), final Failed with
/// retryCount 3 and a slippage-mentioning error message.
#[tokio::test]
async fn test_slippage_violation_exhausts_retries() {
    let drivers: Vec<Arc<dyn VenueDriver>> = vec![Arc::new(AlwaysSlips { venue: Venue::Raydium })];
    let h = build_harness(drivers, 3);

    let order = h
        .store
        .create(
            "a".to_string(),
            "b".to_string(),
            "a".to_string(),
            "b".to_string(),
            dec!(1),
            dec!(0.01),
            swap_execution_engine::model::OrderType::Market,
        )
        .unwrap();

    h.queue.enqueue(&order.id).unwrap();
    let failed = wait_for_terminal(&h.store, &order.id).await;

    assert_eq!(failed.status, OrderStatus::Failed);
    assert_eq!(failed.retry_count, 3);
    assert!(failed.error_message.unwrap().contains("slippage"));
}

/// Concurrent subscribers. Three subscribers registered before
/// processing begins each receive the identical ordered sequence
/// ending in Closing, and Stats reports 3 active then 0.
#[tokio::test]
async fn test_concurrent_subscribers_receive_identical_sequences() {
    let h = build_harness(reference_drivers(), 3);

    let order = h
        .store
        .create(
            NATIVE_SENTINEL.to_string(),
            USDC.to_string(),
            WRAPPED_NATIVE.to_string(),
            USDC.to_string(),
            dec!(1.5),
            dec!(0.5),
            swap_execution_engine::model::OrderType::Market,
        )
        .unwrap();

    let mut rxs: Vec<_> = (0..3).map(|_| h.hub.register(&order.id)).collect();
    assert_eq!(h.hub.stats().active_sinks, 3);

    h.queue.enqueue(&order.id).unwrap();

    let mut sequences = Vec::new();
    for rx in rxs.iter_mut() {
        let mut statuses = Vec::new();
        loop {
            let msg = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
                .await
                .expect("subscriber timed out")
                .expect("channel closed early");
            let done = matches!(msg, SubscriptionMessage::Closing { .. });
            statuses.push(match msg {
                SubscriptionMessage::Connected { .. } => "connected".to_string(),
                SubscriptionMessage::StatusUpdate { status, .. } => status_label(status).to_string(),
                SubscriptionMessage::Closing { .. } => "closing".to_string(),
            });
            if done {
                break;
            }
        }
        sequences.push(statuses);
    }

    assert_eq!(sequences[0], sequences[1]);
    assert_eq!(sequences[1], sequences[2]);
    assert_eq!(h.hub.stats().active_sinks, 0);
}

/// Wraps a `JobHandler` to record the wall-clock instant each job
/// actually starts running, so a test can observe the token bucket's
/// spacing rather than just its eventual outcome.
struct TimestampingHandler<H> {
    inner: H,
    starts: Mutex<Vec<Instant>>,
}

#[async_trait]
impl<H: JobHandler> JobHandler for TimestampingHandler<H> {
    async fn handle(&self, order_id: &str, attempt: u32) -> Result<(), EngineError> {
        self.starts.lock().unwrap().push(Instant::now());
        self.inner.handle(order_id, attempt).await
    }
}

/// Rate limiting. With a 6-per-minute token bucket, a burst of 6
/// jobs starts right away (the bucket's initial capacity); a 7th job
/// beyond the burst is held back until the bucket refills at its
/// per-minute rate rather than starting alongside the burst.
#[tokio::test]
async fn test_rate_limit_throttles_jobs_beyond_burst_capacity() {
    let path = NamedTempFile::new().unwrap().into_temp_path();
    let redb = Arc::new(RedbStore::new(&path).unwrap());
    let wal = Arc::new(WalManager::new(redb.clone()));
    wal.initialize().unwrap();

    let store = Arc::new(OrderStore::new(redb.clone(), wal.clone(), ExecutionContext::new_system()));
    let cache = Arc::new(HotCache::new());
    let hub = Arc::new(SubscriptionHub::new());
    let mut router = Router::new();
    for driver in reference_drivers() {
        router.register(driver);
    }
    let router = Arc::new(router);

    let queue_config = QueueConfig {
        concurrency: 8,
        rate_limit_per_minute: 6,
        max_attempts: 1,
        ..QueueConfig::default()
    };
    let queue = Arc::new(Queue::new(redb, wal, queue_config));

    let processor = OrderProcessor::new(
        store.clone(),
        router,
        cache,
        hub,
        Arc::new(UuidOrderIdValidator),
        1,
    );
    let handler = Arc::new(TimestampingHandler {
        inner: processor,
        starts: Mutex::new(Vec::new()),
    });
    queue.clone().spawn_workers(handler.clone());

    let mut order_ids = Vec::new();
    for _ in 0..7 {
        let order = store
            .create(
                NATIVE_SENTINEL.to_string(),
                USDC.to_string(),
                WRAPPED_NATIVE.to_string(),
                USDC.to_string(),
                dec!(1.5),
                dec!(0.5),
                swap_execution_engine::model::OrderType::Market,
            )
            .unwrap();
        queue.enqueue(&order.id).unwrap();
        order_ids.push(order.id);
    }

    for id in &order_ids[0..6] {
        let confirmed = wait_for_terminal(&store, id).await;
        assert_eq!(confirmed.status, OrderStatus::Confirmed);
    }

    // The 7th job sits behind an exhausted bucket. At 6/minute the
    // refill is one token per 10s, far longer than this window.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(
        handler.starts.lock().unwrap().len(),
        6,
        "the 7th job must not start before the bucket refills"
    );

    let seventh = wait_for_terminal(&store, &order_ids[6]).await;
    assert_eq!(seventh.status, OrderStatus::Confirmed);

    let starts = handler.starts.lock().unwrap();
    assert_eq!(starts.len(), 7);
    let gap = starts[6].duration_since(starts[5]);
    assert!(
        gap >= Duration::from_secs(7),
        "7th job should only start once the token bucket refills, got gap {gap:?}"
    );
}

struct HangingDriver {
    venue: Venue,
}

#[async_trait]
impl VenueDriver for HangingDriver {
    async fn quote(&self, pair: &TokenPair, amount_in: Decimal) -> Result<Quote, VenueError> {
        Ok(Quote {
            venue: self.venue,
            pair: pair.clone(),
            amount_in,
            amount_out: amount_in,
            unit_price: dec!(1.0),
            fee_rate: dec!(0.001),
            price_impact: dec!(0.01),
            at: Utc::now(),
        })
    }

    async fn swap(&self, _params: &SwapParams) -> Result<SwapResult, VenueError> {
        // Simulates a venue driver whose worker is killed mid-flight:
        // this call never resolves.
        std::future::pending::<()>().await;
        unreachable!("a hanging swap never resolves")
    }

    fn venue(&self) -> Venue {
        self.venue
    }

    fn name(&self) -> &str {
        "hanging"
    }
}

/// Crash recovery. Jobs leased by workers that vanish mid-swap
/// (simulated here by aborting their tasks, leaving the job record
/// `Leased` in `redb`) are picked back up by a fresh `Queue` opened
/// over the same database file, as a restarted process would, and
/// each order's `retryCount` reflects the abandoned attempt even
/// though the recovered run goes on to succeed.
#[tokio::test]
async fn test_crash_recovery_requeues_leased_jobs_with_retry_recorded() {
    let path = NamedTempFile::new().unwrap().into_temp_path();
    let redb = Arc::new(RedbStore::new(&path).unwrap());
    let wal = Arc::new(WalManager::new(redb.clone()));
    wal.initialize().unwrap();

    let store = Arc::new(OrderStore::new(redb.clone(), wal.clone(), ExecutionContext::new_system()));
    let cache = Arc::new(HotCache::new());
    let hub = Arc::new(SubscriptionHub::new());

    let mut hanging_router = Router::new();
    hanging_router.register(Arc::new(HangingDriver { venue: Venue::Raydium }));
    let hanging_router = Arc::new(hanging_router);

    let queue_config = QueueConfig {
        concurrency: 5,
        rate_limit_per_minute: 1000,
        max_attempts: 3,
        ..QueueConfig::default()
    };
    let queue = Arc::new(Queue::new(redb.clone(), wal.clone(), queue_config));

    let hanging_processor = Arc::new(OrderProcessor::new(
        store.clone(),
        hanging_router,
        cache.clone(),
        hub.clone(),
        Arc::new(UuidOrderIdValidator),
        3,
    ));
    let worker_handles = queue.clone().spawn_workers(hanging_processor);

    let mut order_ids = Vec::new();
    for _ in 0..3 {
        let order = store
            .create(
                "a".to_string(),
                "b".to_string(),
                "a".to_string(),
                "b".to_string(),
                dec!(1),
                dec!(0.5),
                swap_execution_engine::model::OrderType::Market,
            )
            .unwrap();
        queue.enqueue(&order.id).unwrap();
        order_ids.push(order.id);
    }

    for _ in 0..200 {
        if queue.in_flight() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(queue.in_flight(), 3, "all three jobs should be leased and hung in the swap call");
    for id in &order_ids {
        let order = store.find(id).unwrap();
        assert_eq!(order.status, OrderStatus::Submitted);
    }

    // Simulate the process dying: the workers vanish without releasing
    // their leases, leaving each JobRecord `Leased` in redb.
    for handle in worker_handles {
        handle.abort();
    }

    // A fresh Queue over the same redb/wal, exactly as a restarted
    // process would construct at startup.
    let restarted_queue = Arc::new(Queue::new(
        redb,
        wal,
        QueueConfig {
            concurrency: 5,
            rate_limit_per_minute: 1000,
            max_attempts: 3,
            ..QueueConfig::default()
        },
    ));
    let recovered = restarted_queue.recover().unwrap();
    assert_eq!(recovered, 3);

    let mut healthy_router = Router::new();
    for driver in reference_drivers() {
        healthy_router.register(driver);
    }
    let recovery_processor = Arc::new(OrderProcessor::new(
        store.clone(),
        Arc::new(healthy_router),
        cache,
        hub,
        Arc::new(UuidOrderIdValidator),
        3,
    ));
    restarted_queue.clone().spawn_workers(recovery_processor);

    for id in &order_ids {
        let confirmed = wait_for_terminal(&store, id).await;
        assert_eq!(confirmed.status, OrderStatus::Confirmed);
        assert!(
            confirmed.retry_count >= 1,
            "the abandoned lease from the crash must count as a spent attempt"
        );
    }
}
