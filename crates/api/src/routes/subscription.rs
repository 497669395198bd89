//! Subscription daily-limit endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::AppState;

/// GET /subscription/limit
pub async fn limit(State(state): State<AppState>, user: AuthUser) -> ApiResult<Response> {
    let check = state.credits.daily_limit.check(user.user_id).await?;
    Ok(Json(check).into_response())
}

/// POST /subscription/consume
///
/// Consume one unit of today's allowance. 402 when exhausted or absent.
pub async fn consume(State(state): State<AppState>, user: AuthUser) -> ApiResult<Response> {
    let check = state.credits.daily_limit.consume(user.user_id).await?;
    let status = if check.can_proceed {
        StatusCode::OK
    } else {
        StatusCode::PAYMENT_REQUIRED
    };
    Ok((status, Json(check)).into_response())
}
