//! Credit balance, authorization, and debit endpoints

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use uxaudit_credits::pricing::ActionType;
use uxaudit_credits::{CreditsError, DebitKind};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeRequest {
    pub action_type: String,
}

/// POST /credits/authorize
///
/// Pre-flight check before the client starts a paid action. Returns 402 with
/// the same body shape when the action cannot proceed, so clients branch on
/// status code alone.
pub async fn authorize(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<AuthorizeRequest>,
) -> ApiResult<Response> {
    let action = ActionType::parse(&req.action_type).map_err(ApiError::from)?;
    let auth = state.credits.policy.authorize(user.user_id, action).await?;

    let status = if auth.can_proceed {
        StatusCode::OK
    } else {
        StatusCode::PAYMENT_REQUIRED
    };
    Ok((status, Json(auth)).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebitRequest {
    pub action_type: String,
    pub audit_id: Option<Uuid>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebitResponse {
    pub deducted: bool,
    pub new_balance: i64,
    pub grace_limit_used: bool,
}

/// POST /credits/debit
///
/// Charge for a completed action. 402 carries the shortfall details.
pub async fn debit(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<DebitRequest>,
) -> ApiResult<Response> {
    let action = ActionType::parse(&req.action_type).map_err(ApiError::from)?;
    let description = req
        .description
        .unwrap_or_else(|| format!("{action} action"));

    match state
        .credits
        .policy
        .debit(user.user_id, action, req.audit_id, &description)
        .await
    {
        Ok(receipt) => {
            let deducted = receipt.kind == DebitKind::Charged;
            Ok(Json(DebitResponse {
                deducted,
                new_balance: receipt.new_balance,
                grace_limit_used: receipt.grace_limit_used,
            })
            .into_response())
        }
        Err(CreditsError::InsufficientCredits {
            required,
            available,
        }) => Ok((
            StatusCode::PAYMENT_REQUIRED,
            Json(json!({
                "deducted": false,
                "required": required,
                "available": available,
            })),
        )
            .into_response()),
        Err(other) => Err(other.into()),
    }
}

/// GET /credits/balance
pub async fn balance(State(state): State<AppState>, user: AuthUser) -> ApiResult<Response> {
    let balance = state.credits.policy.balance(user.user_id).await?;
    Ok(Json(json!({
        "balance": balance.balance,
        "graceLimitUsed": balance.grace_limit_used,
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<i64>,
}

/// GET /credits/history
pub async fn history(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Response> {
    let limit = params.limit.unwrap_or(50).clamp(1, 200);
    let entries = state.credits.ledger.history(user.user_id, limit).await?;
    Ok(Json(json!({ "transactions": entries })).into_response())
}
