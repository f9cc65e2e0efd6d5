use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

use crate::model::OrderStatus;

/// Error taxonomy for the execution engine. One variant per row of the
/// error-handling table: each carries enough context to both log
/// structured fields and render an HTTP response.
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("no venue returned a quote")]
    NoQuotes,

    #[error("venue error (retriable): {0}")]
    VenueTemporary(String),

    #[error("venue error (not retriable): {0}")]
    VenuePermanent(String),

    #[error("slippage exceeded: expected {expected}, executed {executed}, tolerance {tolerance}")]
    SlippageExceeded {
        expected: rust_decimal::Decimal,
        executed: rust_decimal::Decimal,
        tolerance: rust_decimal::Decimal,
    },

    #[error("illegal transition for order {order_id}: {from:?} -> {to:?}")]
    IllegalTransition {
        order_id: String,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("order not found: {0}")]
    NotFound(String),

    #[error("queue error: {0}")]
    QueueError(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether a worker should retry this error, per the attempt counter
    /// and the error kind alone.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, EngineError::VenuePermanent(_))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    message: String,
}

impl ResponseError for EngineError {
    fn status_code(&self) -> StatusCode {
        match self {
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::IllegalTransition { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::NoQuotes
            | EngineError::VenueTemporary(_)
            | EngineError::VenuePermanent(_)
            | EngineError::SlippageExceeded { .. }
            | EngineError::QueueError(_)
            | EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let kind = match self {
            EngineError::Validation(_) => "validation",
            EngineError::NotFound(_) => "not_found",
            EngineError::NoQuotes => "no_quotes",
            EngineError::VenueTemporary(_) => "venue_temporary",
            EngineError::VenuePermanent(_) => "venue_permanent",
            EngineError::SlippageExceeded { .. } => "slippage_exceeded",
            EngineError::IllegalTransition { .. } => "illegal_transition",
            EngineError::QueueError(_) => "queue_error",
            EngineError::Internal(_) => "internal",
        };

        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: kind.to_string(),
            message: self.to_string(),
        })
    }
}
