//! HTTP route handlers

pub mod credits;
pub mod orders;
pub mod subscription;
pub mod webhooks;

use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/credits/authorize", post(credits::authorize))
        .route("/credits/debit", post(credits::debit))
        .route("/credits/balance", get(credits::balance))
        .route("/credits/history", get(credits::history))
        .route("/orders", post(orders::create_order))
        .route("/orders/{id}", get(orders::get_order))
        .route("/subscription/limit", get(subscription::limit))
        .route("/subscription/consume", post(subscription::consume))
        .route("/webhook/stripe", post(webhooks::stripe))
        .route("/webhook/liqpay", post(webhooks::liqpay))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}
