//! Domain types for the credit core
//!
//! Provider payloads and order metadata arrive loosely shaped; everything here
//! is the typed form the business logic is allowed to see. Enum columns are
//! stored as TEXT and round-tripped through `as_str`/`parse`.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{CreditsError, CreditsResult};
use crate::pricing::ActionType;

/// Capability of the calling account, resolved once per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountKind {
    Standard,
    /// Internal/demo account: authorization always passes, debits are
    /// ledgered as zero-cost `trial` rows and never touch the balance row.
    Test,
}

/// Cached per-user balance. The ledger is the source of truth; this row is a
/// projection mutated only through the conditional statements in the repos.
#[derive(Debug, Clone, Serialize)]
pub struct Balance {
    pub user_id: Uuid,
    pub balance: i64,
    pub grace_limit_used: bool,
    pub last_updated: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Credit,
    Debit,
}

impl TransactionType {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionType::Credit => "credit",
            TransactionType::Debit => "debit",
        }
    }

    pub fn parse(s: &str) -> CreditsResult<Self> {
        match s {
            "credit" => Ok(TransactionType::Credit),
            "debit" => Ok(TransactionType::Debit),
            other => Err(CreditsError::MalformedPayload(format!(
                "unknown transaction type '{other}'"
            ))),
        }
    }
}

/// Where a ledger entry came from. Debits carry the action tag that consumed
/// the credits; credits carry the grant origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionSource {
    Purchase,
    Welcome,
    Trial,
    Manual,
    Action(ActionType),
}

impl TransactionSource {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionSource::Purchase => "purchase",
            TransactionSource::Welcome => "welcome",
            TransactionSource::Trial => "trial",
            TransactionSource::Manual => "manual",
            TransactionSource::Action(action) => action.as_str(),
        }
    }

    pub fn parse(s: &str) -> CreditsResult<Self> {
        match s {
            "purchase" => Ok(TransactionSource::Purchase),
            "welcome" => Ok(TransactionSource::Welcome),
            "trial" => Ok(TransactionSource::Trial),
            "manual" => Ok(TransactionSource::Manual),
            other => ActionType::parse(other).map(TransactionSource::Action),
        }
    }
}

impl Serialize for TransactionSource {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Append-only ledger entry. Never mutated or deleted after creation.
#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tx_type: TransactionType,
    /// Unsigned magnitude; the sign comes from `tx_type`.
    pub amount: i64,
    /// Balance snapshot after this entry was applied.
    pub balance_after: i64,
    pub source: TransactionSource,
    pub description: String,
    pub related_audit_id: Option<Uuid>,
    pub related_order_id: Option<Uuid>,
    pub created_at: OffsetDateTime,
}

/// Ledger entry about to be appended; the repository assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub user_id: Uuid,
    pub tx_type: TransactionType,
    pub amount: i64,
    pub balance_after: i64,
    pub source: TransactionSource,
    pub description: String,
    pub related_audit_id: Option<Uuid>,
    pub related_order_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Credits,
    Subscription,
}

impl OrderType {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderType::Credits => "credits",
            OrderType::Subscription => "subscription",
        }
    }

    pub fn parse(s: &str) -> CreditsResult<Self> {
        match s {
            "credits" => Ok(OrderType::Credits),
            "subscription" => Ok(OrderType::Subscription),
            other => Err(CreditsError::MalformedPayload(format!(
                "unknown order type '{other}'"
            ))),
        }
    }
}

/// Order lifecycle. Transitions are one-directional out of `pending`; once a
/// terminal status is reached no settlement logic runs again for the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Completed,
    Failed,
    Canceled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Completed => "completed",
            OrderStatus::Failed => "failed",
            OrderStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> CreditsResult<Self> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "completed" => Ok(OrderStatus::Completed),
            "failed" => Ok(OrderStatus::Failed),
            "canceled" => Ok(OrderStatus::Canceled),
            other => Err(CreditsError::MalformedPayload(format!(
                "unknown order status '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentProvider {
    Stripe,
    Liqpay,
}

impl PaymentProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentProvider::Stripe => "stripe",
            PaymentProvider::Liqpay => "liqpay",
        }
    }

    pub fn parse(s: &str) -> CreditsResult<Self> {
        match s {
            "stripe" => Ok(PaymentProvider::Stripe),
            "liqpay" => Ok(PaymentProvider::Liqpay),
            other => Err(CreditsError::MalformedPayload(format!(
                "unknown payment provider '{other}'"
            ))),
        }
    }
}

/// One purchase attempt. The pending row is the idempotency anchor for the
/// eventual webhook.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentOrder {
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_type: OrderType,
    pub package_id: Option<String>,
    pub plan_id: Option<String>,
    pub amount_cents: i64,
    pub provider: PaymentProvider,
    pub status: OrderStatus,
    pub provider_payment_id: Option<String>,
    pub created_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone)]
pub struct NewPaymentOrder {
    pub user_id: Uuid,
    pub order_type: OrderType,
    pub package_id: Option<String>,
    pub plan_id: Option<String>,
    pub amount_cents: i64,
    pub provider: PaymentProvider,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> CreditsResult<Self> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            other => Err(CreditsError::MalformedPayload(format!(
                "unknown subscription status '{other}'"
            ))),
        }
    }
}

/// At most one row per user (upsert semantics). `end_date` governs validity
/// for limit checks independent of `status`.
#[derive(Debug, Clone, Serialize)]
pub struct Subscription {
    pub user_id: Uuid,
    pub subscription_type: String,
    pub status: SubscriptionStatus,
    pub start_date: OffsetDateTime,
    pub end_date: OffsetDateTime,
    pub daily_limit: i64,
    pub external_subscription_id: Option<String>,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub user_id: Uuid,
    pub subscription_type: String,
    pub start_date: OffsetDateTime,
    pub end_date: OffsetDateTime,
    pub daily_limit: i64,
    pub external_subscription_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStatus {
    Pending,
    Settled,
    Abandoned,
}

impl ReconciliationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReconciliationStatus::Pending => "pending",
            ReconciliationStatus::Settled => "settled",
            ReconciliationStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(s: &str) -> CreditsResult<Self> {
        match s {
            "pending" => Ok(ReconciliationStatus::Pending),
            "settled" => Ok(ReconciliationStatus::Settled),
            "abandoned" => Ok(ReconciliationStatus::Abandoned),
            other => Err(CreditsError::MalformedPayload(format!(
                "unknown reconciliation status '{other}'"
            ))),
        }
    }
}

/// A debit that failed after the paid action already ran, awaiting retry.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub action_type: ActionType,
    pub amount: i64,
    pub related_audit_id: Option<Uuid>,
    pub description: String,
    pub attempts: i32,
    pub status: ReconciliationStatus,
    pub last_error: Option<String>,
    pub created_at: OffsetDateTime,
    pub settled_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone)]
pub struct NewReconciliation {
    pub user_id: Uuid,
    pub action_type: ActionType,
    pub amount: i64,
    pub related_audit_id: Option<Uuid>,
    pub description: String,
}

impl Serialize for ActionType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}
