use std::env;
use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use actix_web_prom::PrometheusMetricsBuilder;
use rust_decimal_macros::dec;
use tracing::{info, warn, Level};

use swap_execution_engine::api::{self, AppState};
use swap_execution_engine::auth_middleware::AuthMiddleware;
use swap_execution_engine::cache::HotCache;
use swap_execution_engine::config::{load_secrets_from_files, Settings};
use swap_execution_engine::context::ExecutionContext;
use swap_execution_engine::exchange::meteora::MeteoraDriver;
use swap_execution_engine::exchange::raydium::RaydiumDriver;
use swap_execution_engine::hub::SubscriptionHub;
use swap_execution_engine::persistence::redb_store::RedbStore;
use swap_execution_engine::persistence::store::OrderStore;
use swap_execution_engine::persistence::wal::WalManager;
use swap_execution_engine::processor::{OrderProcessor, UuidOrderIdValidator};
use swap_execution_engine::queue::{Queue, QueueConfig};
use swap_execution_engine::router::Router;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    load_secrets_from_files();
    dotenv::dotenv().ok();

    let settings = Settings::load().unwrap_or_else(|e| {
        eprintln!("failed to load configuration, falling back to defaults: {e}");
        Settings::default()
    });

    let log_level: Level = settings.log_level.parse().unwrap_or(Level::INFO);
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(log_level.into()),
        )
        .init();

    info!("starting swap execution engine");

    let store_path = settings
        .store_url
        .clone()
        .unwrap_or_else(|| "swap_execution_engine.redb".to_string());
    let redb = Arc::new(RedbStore::new(&store_path)?);
    let wal = Arc::new(WalManager::new(redb.clone()));
    wal.initialize()?;

    let ctx = ExecutionContext::new_system();
    let store = Arc::new(OrderStore::new(redb.clone(), wal.clone(), ctx));
    let cache = Arc::new(HotCache::new());
    let hub = Arc::new(SubscriptionHub::new());

    let mut router = Router::new();
    router.register(Arc::new(RaydiumDriver::new(
        settings.venue_fees.get("Raydium", dec!(0.0025)),
    )));
    router.register(Arc::new(MeteoraDriver::new(
        settings.venue_fees.get("Meteora", dec!(0.0020)),
    )));
    let router = Arc::new(router);

    let queue_config = QueueConfig {
        concurrency: settings.queue_concurrency,
        rate_limit_per_minute: settings.queue_rate_limit,
        max_attempts: settings.max_retry_attempts,
        ..QueueConfig::default()
    };
    let queue = Arc::new(Queue::new(redb.clone(), wal.clone(), queue_config));

    let recovered = queue.recover()?;
    info!(recovered, "queue recovery complete");

    let processor = Arc::new(OrderProcessor::new(
        store.clone(),
        router.clone(),
        cache.clone(),
        hub.clone(),
        Arc::new(UuidOrderIdValidator),
        settings.max_retry_attempts,
    ));

    let worker_handles = queue.clone().spawn_workers(processor.clone());
    info!(workers = worker_handles.len(), "workers spawned");

    let bind_address = format!("{}:{}", settings.server.host, settings.server.port);
    info!(%bind_address, "binding http server");

    let prometheus = PrometheusMetricsBuilder::new("engine")
        .registry(prometheus::default_registry().clone())
        .endpoint("/metrics")
        .build()
        .expect("prometheus middleware builds");

    let app_state = web::Data::new(AppState {
        store: store.clone(),
        queue: queue.clone(),
        cache: cache.clone(),
        hub: hub.clone(),
        subscribe_base_url: format!("ws://{bind_address}/subscribe"),
    });

    HttpServer::new(move || {
        let cors = actix_cors::Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header();

        App::new()
            .wrap(cors)
            .wrap(AuthMiddleware)
            .wrap(prometheus.clone())
            .app_data(app_state.clone())
            .configure(api::config)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    info!("http server stopped, shutting down queue");
    queue.request_shutdown();
    // Cooperative: each worker finishes whatever attempt it's mid-flight on,
    // then observes the shutdown flag and returns on its own. No `abort()`
    // here — that would cut a worker off mid-`Submitted` rather than let it
    // reach the next safe checkpoint.
    for handle in worker_handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "worker task did not shut down cleanly");
        }
    }
    hub.close_all().await;
    warn!("shutdown complete");

    Ok(())
}
