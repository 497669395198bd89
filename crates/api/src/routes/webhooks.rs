//! Payment provider webhook endpoints
//!
//! These routes are unauthenticated; trust comes entirely from signature
//! verification inside the settlement processor. Handlers acknowledge with
//! 200 only after settlement state is durable, so a provider retry after any
//! error hits the idempotent path rather than double-crediting.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use serde::Deserialize;
use serde_json::json;

use uxaudit_credits::Settlement;

use crate::error::ApiResult;
use crate::state::AppState;

/// POST /webhook/stripe
///
/// Body must stay the raw bytes Stripe signed; any re-serialization would
/// break the signature.
pub async fn stripe(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Response> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let settlement = state
        .credits
        .settlement
        .process_stripe(&body, signature)
        .await?;
    Ok(ack(settlement))
}

#[derive(Debug, Deserialize)]
pub struct LiqpayCallback {
    pub data: String,
    pub signature: String,
}

/// POST /webhook/liqpay
///
/// LiqPay posts `data` and `signature` as form fields.
pub async fn liqpay(
    State(state): State<AppState>,
    Form(callback): Form<LiqpayCallback>,
) -> ApiResult<Response> {
    let settlement = state
        .credits
        .settlement
        .process_liqpay(&callback.data, &callback.signature)
        .await?;
    Ok(ack(settlement))
}

fn ack(settlement: Settlement) -> Response {
    let body = match settlement {
        Settlement::Fulfilled { order_id } => {
            json!({ "received": true, "orderId": order_id, "result": "fulfilled" })
        }
        Settlement::AlreadyProcessed { order_id } => {
            json!({ "received": true, "orderId": order_id, "result": "alreadyProcessed" })
        }
        Settlement::MarkedFailed { order_id } => {
            json!({ "received": true, "orderId": order_id, "result": "markedFailed" })
        }
        Settlement::Acknowledged => json!({ "received": true, "result": "acknowledged" }),
    };
    (StatusCode::OK, Json(body)).into_response()
}
