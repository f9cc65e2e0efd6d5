use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge, Histogram,
    IntCounter, IntCounterVec, IntGauge,
};

// --- Order lifecycle metrics ---

pub static ORDER_LATENCY: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "engine_order_latency_seconds",
        "End-to-end order latency from Pending to a terminal state",
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .expect("order_latency histogram")
});

pub static ORDERS_SUBMITTED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("engine_orders_submitted_total", "Total orders accepted at Submit")
        .expect("orders_submitted counter")
});

pub static ORDERS_REJECTED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "engine_orders_rejected_total",
        "Total Submit calls rejected by validation"
    )
    .expect("orders_rejected counter")
});

pub static ORDERS_CONFIRMED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("engine_orders_confirmed_total", "Total orders reaching Confirmed")
        .expect("orders_confirmed counter")
});

pub static ORDERS_FAILED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("engine_orders_failed_total", "Total orders reaching Failed")
        .expect("orders_failed counter")
});

pub static ORDERS_BY_VENUE: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "engine_orders_confirmed_by_venue_total",
        "Total confirmed orders broken down by venue",
        &["venue"]
    )
    .expect("orders_by_venue counter")
});

// --- Queue metrics ---

pub static QUEUE_DEPTH: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("engine_queue_depth", "Jobs waiting to be leased")
        .expect("queue_depth gauge")
});

pub static QUEUE_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("engine_queue_in_flight", "Jobs currently leased by a worker")
        .expect("queue_in_flight gauge")
});

pub static QUEUE_RETRIES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("engine_queue_retries_total", "Total job retries scheduled")
        .expect("queue_retries counter")
});

pub static QUEUE_DEAD_LETTERED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "engine_queue_dead_lettered_total",
        "Total jobs exhausting all retry attempts"
    )
    .expect("queue_dead_lettered counter")
});

// --- Subscription hub metrics ---

pub static HUB_ACTIVE_SUBSCRIPTIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("engine_hub_active_subscriptions", "Currently connected subscriber sinks")
        .expect("hub_active_subscriptions gauge")
});

pub static HUB_BROADCASTS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("engine_hub_broadcasts_total", "Total transition events broadcast")
        .expect("hub_broadcasts counter")
});

pub fn observe_order_latency_seconds(seconds: f64) {
    ORDER_LATENCY.observe(seconds);
}

pub fn inc_orders_submitted() {
    ORDERS_SUBMITTED.inc();
}

pub fn inc_orders_rejected() {
    ORDERS_REJECTED.inc();
}

pub fn inc_orders_confirmed(venue: &str) {
    ORDERS_CONFIRMED.inc();
    ORDERS_BY_VENUE.with_label_values(&[venue]).inc();
}

pub fn inc_orders_failed() {
    ORDERS_FAILED.inc();
}

pub fn set_queue_depth(depth: i64) {
    QUEUE_DEPTH.set(depth);
}

pub fn set_queue_in_flight(in_flight: i64) {
    QUEUE_IN_FLIGHT.set(in_flight);
}

pub fn inc_queue_retries() {
    QUEUE_RETRIES.inc();
}

pub fn inc_queue_dead_lettered() {
    QUEUE_DEAD_LETTERED.inc();
}

pub fn set_hub_active_subscriptions(count: i64) {
    HUB_ACTIVE_SUBSCRIPTIONS.set(count);
}

pub fn inc_hub_broadcasts() {
    HUB_BROADCASTS.inc();
}
