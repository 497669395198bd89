//! API error type and HTTP mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use uxaudit_credits::CreditsError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("insufficient credits")]
    PaymentRequired { required: i64, available: i64 },

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl From<CreditsError> for ApiError {
    fn from(err: CreditsError) -> Self {
        match err {
            CreditsError::InsufficientCredits {
                required,
                available,
            } => ApiError::PaymentRequired {
                required,
                available,
            },
            CreditsError::OrderNotFound(id) => ApiError::NotFound(format!("order {id} not found")),
            CreditsError::WebhookSignatureInvalid => {
                ApiError::BadRequest("invalid signature".to_string())
            }
            CreditsError::MalformedPayload(msg) => ApiError::BadRequest(msg),
            CreditsError::UnknownActionType(t) => {
                ApiError::BadRequest(format!("unknown action type '{t}'"))
            }
            CreditsError::UnknownPackage(p) => {
                ApiError::BadRequest(format!("unknown package '{p}'"))
            }
            CreditsError::UnknownPlan(p) => ApiError::BadRequest(format!("unknown plan '{p}'")),
            other => ApiError::Internal(other.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                json!({ "error": "unauthorized" }),
            ),
            ApiError::PaymentRequired {
                required,
                available,
            } => (
                StatusCode::PAYMENT_REQUIRED,
                json!({
                    "error": "insufficient credits",
                    "required": required,
                    "available": available,
                }),
            ),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal server error" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
