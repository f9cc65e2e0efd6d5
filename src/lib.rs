pub mod api;
pub mod auth_middleware;
pub mod cache;
pub mod config;
pub mod context;
pub mod errors;
pub mod exchange;
pub mod hub;
pub mod metrics;
pub mod model;
pub mod normalizer;
pub mod persistence;
pub mod processor;
pub mod queue;
pub mod rate_limiter;
pub mod router;
