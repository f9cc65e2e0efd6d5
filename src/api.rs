use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use actix::{Actor, ActorContext, AsyncContext, StreamHandler};
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use crate::cache::HotCache;
use crate::errors::EngineError;
use crate::hub::{SubscriptionHub, SubscriptionMessage};
use crate::metrics;
use crate::model::{
    OrderDraft, OrderFilter, OrderStatus, StatsResponse, DEFAULT_SLIPPAGE, MAX_AMOUNT_IN, MAX_SLIPPAGE,
    MIN_SLIPPAGE,
};
use crate::normalizer;
use crate::persistence::store::OrderStore;
use crate::queue::Queue;

/// Everything an HTTP handler needs, assembled once in `main` and
/// shared behind `Arc`s via `web::Data`.
pub struct AppState {
    pub store: Arc<OrderStore>,
    pub queue: Arc<Queue>,
    pub cache: Arc<HotCache>,
    pub hub: Arc<SubscriptionHub>,
    pub subscribe_base_url: String,
}

#[derive(Serialize)]
struct SubmitResponse {
    #[serde(rename = "orderId")]
    order_id: String,
    status: OrderStatus,
    #[serde(rename = "subscribeUrl")]
    subscribe_url: String,
}

fn validate_draft(draft: &OrderDraft) -> Result<Decimal, EngineError> {
    if !draft.order_type.is_supported() {
        return Err(EngineError::Validation(format!(
            "order type {:?} not yet supported",
            draft.order_type
        )));
    }

    let max_amount = Decimal::from_str(MAX_AMOUNT_IN).expect("MAX_AMOUNT_IN parses");
    if draft.amount_in <= Decimal::ZERO || draft.amount_in > max_amount {
        return Err(EngineError::Validation(format!(
            "amountIn must be in (0, {max_amount}]"
        )));
    }
    if draft.amount_in.scale() > 8 {
        return Err(EngineError::Validation(
            "amountIn must have at most 8 fractional digits".to_string(),
        ));
    }

    let min_slippage = Decimal::from_str(MIN_SLIPPAGE).expect("MIN_SLIPPAGE parses");
    let max_slippage = Decimal::from_str(MAX_SLIPPAGE).expect("MAX_SLIPPAGE parses");
    let slippage = draft
        .slippage
        .unwrap_or_else(|| Decimal::from_str(DEFAULT_SLIPPAGE).expect("DEFAULT_SLIPPAGE parses"));
    if slippage < min_slippage || slippage > max_slippage {
        return Err(EngineError::Validation(format!(
            "slippage must be in [{min_slippage}, {max_slippage}]"
        )));
    }

    normalizer::validate_address_shape(&draft.token_in)?;
    normalizer::validate_address_shape(&draft.token_out)?;
    normalizer::validate_pair(&draft.token_in, &draft.token_out)?;

    Ok(slippage)
}

async fn submit_order(state: web::Data<AppState>, draft: web::Json<OrderDraft>) -> Result<HttpResponse, EngineError> {
    let draft = draft.into_inner();
    let slippage = match validate_draft(&draft) {
        Ok(s) => s,
        Err(e) => {
            metrics::inc_orders_rejected();
            return Err(e);
        }
    };

    let normalized_in = normalizer::normalize(&draft.token_in);
    let normalized_out = normalizer::normalize(&draft.token_out);

    let order = state.store.create(
        draft.token_in,
        draft.token_out,
        normalized_in,
        normalized_out,
        draft.amount_in,
        slippage,
        draft.order_type,
    )?;

    state.cache.put(order.clone());
    state.queue.enqueue(&order.id)?;
    metrics::inc_orders_submitted();

    Ok(HttpResponse::Ok().json(SubmitResponse {
        subscribe_url: format!("{}/{}", state.subscribe_base_url, order.id),
        order_id: order.id,
        status: order.status,
    }))
}

async fn get_order(state: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, EngineError> {
    let id = path.into_inner();
    if let Some(order) = state.cache.get(&id) {
        return Ok(HttpResponse::Ok().json(order));
    }
    let order = state.store.find(&id)?;
    state.cache.put(order.clone());
    Ok(HttpResponse::Ok().json(order))
}

#[derive(Deserialize)]
struct ListQuery {
    #[serde(rename = "statusFilter", default)]
    status_filter: Option<OrderStatus>,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_limit() -> usize {
    50
}

async fn list_orders(state: web::Data<AppState>, query: web::Query<ListQuery>) -> Result<HttpResponse, EngineError> {
    let filter = OrderFilter { status: query.status_filter };
    let list = state.store.list(&filter, query.limit, query.offset)?;
    Ok(HttpResponse::Ok().json(list))
}

async fn stats(state: web::Data<AppState>) -> Result<HttpResponse, EngineError> {
    let pending = state.store.count(Some(OrderStatus::Pending))?;
    let routing = state.store.count(Some(OrderStatus::Routing))?;
    let building = state.store.count(Some(OrderStatus::Building))?;
    let submitted = state.store.count(Some(OrderStatus::Submitted))?;
    let confirmed = state.store.count(Some(OrderStatus::Confirmed))?;
    let failed = state.store.count(Some(OrderStatus::Failed))?;

    Ok(HttpResponse::Ok().json(StatsResponse {
        pending,
        routing,
        building,
        submitted,
        confirmed,
        failed,
        queue_depth: state.queue.depth(),
        queue_in_flight: state.queue.in_flight(),
    }))
}

const SUBSCRIBER_PING_INTERVAL: Duration = Duration::from_secs(15);

/// Bridges a Hub subscription onto an actix WebSocket actor. Owns the
/// receiving half of its `mpsc` channel until `started` hands it to
/// `ctx.add_stream`; from then on every `SubscriptionMessage` the Hub
/// broadcasts arrives as a `StreamHandler::handle` call.
struct OrderSubscriberSocket {
    rx: Option<mpsc::Receiver<SubscriptionMessage>>,
}

impl Actor for OrderSubscriberSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        if let Some(rx) = self.rx.take() {
            ctx.add_stream(ReceiverStream::new(rx));
        }
        ctx.run_interval(SUBSCRIBER_PING_INTERVAL, |_, ctx| ctx.ping(b""));
    }
}

impl StreamHandler<SubscriptionMessage> for OrderSubscriberSocket {
    fn handle(&mut self, item: SubscriptionMessage, ctx: &mut Self::Context) {
        let is_closing = matches!(item, SubscriptionMessage::Closing { .. });
        match serde_json::to_string(&item) {
            Ok(text) => ctx.text(text),
            Err(e) => warn!(error = %e, "failed to serialize subscription message"),
        }
        if is_closing {
            ctx.stop();
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for OrderSubscriberSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(bytes)) => ctx.pong(&bytes),
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            _ => {}
        }
    }
}

async fn subscribe(
    state: web::Data<AppState>,
    path: web::Path<String>,
    req: HttpRequest,
    stream: web::Payload,
) -> Result<HttpResponse, Error> {
    let order_id = path.into_inner();
    let rx = state.hub.register(&order_id);
    ws::start(OrderSubscriberSocket { rx: Some(rx) }, &req, stream)
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/orders")
            .route(web::post().to(submit_order))
            .route(web::get().to(list_orders)),
    )
    .service(web::resource("/orders/{id}").route(web::get().to(get_order)))
    .service(web::resource("/stats").route(web::get().to(stats)))
    .service(web::resource("/subscribe/{id}").route(web::get().to(subscribe)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OrderType;
    use rust_decimal_macros::dec;

    fn draft(amount_in: Decimal) -> OrderDraft {
        OrderDraft {
            token_in: "11111111111111111111111111111111".to_string(),
            token_out: "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v".to_string(),
            amount_in,
            slippage: None,
            order_type: OrderType::Market,
        }
    }

    #[test]
    fn validate_draft_rejects_more_than_eight_fractional_digits() {
        let result = validate_draft(&draft(dec!(1.123456789)));
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[test]
    fn validate_draft_accepts_eight_fractional_digits() {
        let result = validate_draft(&draft(dec!(1.12345678)));
        assert!(result.is_ok());
    }
}
