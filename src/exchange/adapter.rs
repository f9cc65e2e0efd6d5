use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Quote, SwapParams, SwapResult, TokenPair, Venue};

/// Venue-level failure taxonomy. `Temporary` is retriable by the worker
/// pool; `Permanent` short-circuits an order straight to `Failed`
/// regardless of remaining attempts.
#[derive(Error, Debug, Clone)]
pub enum VenueError {
    #[error("temporary venue error: {0}")]
    Temporary(String),
    #[error("permanent venue error: {0}")]
    Permanent(String),
}

#[async_trait]
pub trait VenueDriver: Send + Sync {
    /// Quote a swap of `amount_in` of `pair.token_in` for `pair.token_out`.
    async fn quote(&self, pair: &TokenPair, amount_in: rust_decimal::Decimal) -> Result<Quote, VenueError>;

    /// Execute a previously quoted swap.
    async fn swap(&self, params: &SwapParams) -> Result<SwapResult, VenueError>;

    /// Venue identity, stamped onto the order on confirmation.
    fn venue(&self) -> Venue;

    /// Venue name, used in routing rationale and structured logs.
    fn name(&self) -> &str;
}
