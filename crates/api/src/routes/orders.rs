//! Payment order endpoints

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use uxaudit_credits::{CreatedOrder, OrderType, PaymentOrder, PaymentProvider};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub order_type: String,
    pub package_id: Option<String>,
    pub plan_id: Option<String>,
    pub provider: String,
}

/// POST /orders
///
/// Create a pending order for the authenticated user and return the provider
/// checkout payload. The user id always comes from the token, never the body.
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateOrderRequest>,
) -> ApiResult<Json<CreatedOrder>> {
    let order_type = OrderType::parse(&req.order_type).map_err(ApiError::from)?;
    let provider = PaymentProvider::parse(&req.provider).map_err(ApiError::from)?;

    let created = match order_type {
        OrderType::Credits => {
            let package_id = req
                .package_id
                .as_deref()
                .ok_or_else(|| ApiError::BadRequest("packageId is required".to_string()))?;
            state
                .credits
                .orders
                .create_credits_order(user.user_id, package_id, provider)
                .await?
        }
        OrderType::Subscription => {
            let plan_id = req
                .plan_id
                .as_deref()
                .ok_or_else(|| ApiError::BadRequest("planId is required".to_string()))?;
            state
                .credits
                .orders
                .create_subscription_order(user.user_id, plan_id, provider)
                .await?
        }
    };

    Ok(Json(created))
}

/// GET /orders/{id}
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PaymentOrder>> {
    let order = state.credits.orders.find(id).await?;
    if order.user_id != user.user_id {
        return Err(ApiError::NotFound(format!("order {id} not found")));
    }
    Ok(Json(order))
}
