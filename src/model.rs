use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Reserved order types. Only `Market` is active; `Limit` and `Sniper`
/// deserialize successfully (so a future driver can add them) but are
/// rejected at submission time — see `OrderType::is_supported`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
    Sniper,
}

impl Default for OrderType {
    fn default() -> Self {
        OrderType::Market
    }
}

impl OrderType {
    pub fn is_supported(&self) -> bool {
        matches!(self, OrderType::Market)
    }
}

/// The order lifecycle status. Transitions follow the DAG enforced by
/// `persistence::store::OrderStore::transition`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Routing,
    Building,
    Submitted,
    Confirmed,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Confirmed | OrderStatus::Failed)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Venues known to the router. Registration order, not this enum's
/// declaration order, is what breaks quote ties — this enum only
/// labels the venue on a routed/confirmed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Venue {
    Raydium,
    Meteora,
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The central entity. Owned exclusively by the Order Store; every
/// other component holds it by `id` only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub status: OrderStatus,

    /// Original (pre-normalization) addresses, as submitted.
    pub token_in: String,
    pub token_out: String,
    /// Normalized addresses handed to the Router/Venue Driver. Kept on
    /// the order so emitted events can show both forms.
    pub normalized_token_in: String,
    pub normalized_token_out: String,

    pub amount_in: Decimal,
    pub slippage: Decimal,

    pub amount_out: Option<Decimal>,
    pub expected_price: Option<Decimal>,
    pub executed_price: Option<Decimal>,

    pub venue: Option<Venue>,
    pub tx_ref: Option<String>,
    pub error_message: Option<String>,

    pub retry_count: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Submission payload before an `id` or timestamps are assigned.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDraft {
    pub token_in: String,
    pub token_out: String,
    pub amount_in: Decimal,
    #[serde(default)]
    pub slippage: Option<Decimal>,
    #[serde(rename = "type", default)]
    pub order_type: OrderType,
}

pub const DEFAULT_SLIPPAGE: &str = "0.01";
pub const MIN_SLIPPAGE: &str = "0.0001";
pub const MAX_SLIPPAGE: &str = "0.5";
pub const MAX_AMOUNT_IN: &str = "1000000";

/// A token pair after normalization, handed to the Router/Venue Driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub token_in: String,
    pub token_out: String,
}

/// Transient — never persisted. A single venue's answer to a quote request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub venue: Venue,
    pub pair: TokenPair,
    pub amount_in: Decimal,
    pub amount_out: Decimal,
    pub unit_price: Decimal,
    pub fee_rate: Decimal,
    pub price_impact: Decimal,
    pub at: DateTime<Utc>,
}

impl Quote {
    /// `amountOut × (1 − priceImpact)` — the ranking key used by the Router.
    pub fn effective_output(&self) -> Decimal {
        self.amount_out * (Decimal::ONE - self.price_impact)
    }
}

/// Transient — emitted as side data on the `Routing` transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDecision {
    pub order_id: String,
    pub quotes: Vec<Quote>,
    pub selected: Venue,
    pub rationale: String,
    pub price_gap_pct: Decimal,
    pub at: DateTime<Utc>,
}

/// Transient — the outcome of a venue's `swap` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapResult {
    pub ok: bool,
    pub tx_ref: String,
    pub executed_price: Decimal,
    pub amount_out: Decimal,
    pub realized_slippage: Decimal,
    pub at: DateTime<Utc>,
    pub needs_wrap_in: bool,
    pub needs_unwrap_out: bool,
}

/// Parameters handed to a venue driver's `swap` call.
#[derive(Debug, Clone)]
pub struct SwapParams {
    pub order_id: String,
    pub pair: TokenPair,
    pub amount_in: Decimal,
    pub expected_unit_price: Decimal,
    pub slippage_max: Decimal,
}

/// Emitted to the Hub and the Update Log on every state-machine edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionEvent {
    pub order_id: String,
    pub status: OrderStatus,
    pub message: String,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Pagination {
    pub limit: usize,
    pub offset: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderList {
    pub orders: Vec<Order>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub pending: usize,
    pub routing: usize,
    pub building: usize,
    pub submitted: usize,
    pub confirmed: usize,
    pub failed: usize,
    pub queue_depth: usize,
    pub queue_in_flight: usize,
}
