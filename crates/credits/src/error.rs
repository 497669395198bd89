//! Error taxonomy for the credit core
//!
//! The variants map onto the HTTP surface one-to-one: signature and payload
//! problems are poison-payload rejections (4xx), `InsufficientCredits` is the
//! recoverable 402, storage failures are 500s. A replayed webhook is *not* an
//! error and never appears here; settlement reports it as a success no-op.

use uuid::Uuid;

/// Result type for credit core operations
pub type CreditsResult<T> = Result<T, CreditsError>;

#[derive(Debug, thiserror::Error)]
pub enum CreditsError {
    /// Inbound webhook signature did not verify against the shared secret.
    #[error("webhook signature verification failed")]
    WebhookSignatureInvalid,

    /// Webhook body could not be decoded into a known provider event shape.
    #[error("malformed provider payload: {0}")]
    MalformedPayload(String),

    /// Webhook referenced an order we never created. Never guessed or created.
    #[error("payment order {0} not found")]
    OrderNotFound(Uuid),

    /// Debit would take the balance below the grace floor of -1.
    #[error("insufficient credits: required {required}, available {available}")]
    InsufficientCredits { required: i64, available: i64 },

    /// Unknown action type tag supplied by a caller.
    #[error("unknown action type: {0}")]
    UnknownActionType(String),

    /// Unknown credit package id at order creation.
    #[error("unknown credit package: {0}")]
    UnknownPackage(String),

    /// Unknown subscription plan id at order creation.
    #[error("unknown subscription plan: {0}")]
    UnknownPlan(String),

    /// Missing or invalid provider configuration (keys, secrets, URLs).
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl CreditsError {
    /// Whether the error indicates a transient storage problem worth retrying.
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, CreditsError::Database(_))
    }
}
