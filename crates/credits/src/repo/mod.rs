//! Repository seams
//!
//! Request handlers run on independent processes, so every cross-request
//! safety guarantee must come from the storage layer's atomic primitives.
//! The conditional operations on these traits (`try_debit`, `try_complete`,
//! `try_increment`) are contracts: the implementation must make the check and
//! the write one atomic operation whose return value *is* the decision.
//!
//! Repositories are constructed once at process start and injected into the
//! services. Test doubles slot in behind the same traits.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use time::Date;
use uuid::Uuid;

use crate::error::CreditsResult;
use crate::models::{
    AccountKind, Balance, NewPaymentOrder, NewReconciliation, NewSubscription, NewTransaction,
    PaymentOrder, ReconciliationEntry, Subscription, Transaction,
};

pub use memory::{
    MemoryAccountRepository, MemoryBalanceRepository, MemoryLedgerRepository,
    MemoryOrderRepository, MemoryReconciliationRepository, MemoryRepos,
    MemorySubscriptionRepository, MemoryUsageRepository,
};
pub use postgres::{
    PgAccountRepository, PgBalanceRepository, PgLedgerRepository, PgOrderRepository,
    PgReconciliationRepository, PgSubscriptionRepository, PgUsageRepository,
};

#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Resolve the account capability. Absent rows are standard accounts.
    async fn kind(&self, user_id: Uuid) -> CreditsResult<AccountKind>;
}

#[async_trait]
pub trait BalanceRepository: Send + Sync {
    async fn fetch(&self, user_id: Uuid) -> CreditsResult<Option<Balance>>;

    /// Create the balance row with an initial grant if it does not exist.
    /// Returns the row and whether this call created it; concurrent callers
    /// observe exactly one creation.
    async fn ensure(&self, user_id: Uuid, initial: i64) -> CreditsResult<(Balance, bool)>;

    /// Subtract `amount` iff the resulting balance stays >= -1, as one atomic
    /// conditional update. `None` means the condition failed and nothing
    /// changed. A post-update balance of -1 sets the grace flag.
    async fn try_debit(&self, user_id: Uuid, amount: i64) -> CreditsResult<Option<Balance>>;

    /// Add `amount`, creating the row if needed. Clears the grace flag when
    /// the resulting balance is >= 0.
    async fn apply_credit(&self, user_id: Uuid, amount: i64) -> CreditsResult<Balance>;
}

#[async_trait]
pub trait LedgerRepository: Send + Sync {
    async fn append(&self, entry: NewTransaction) -> CreditsResult<Transaction>;

    /// Most recent entries first.
    async fn history(&self, user_id: Uuid, limit: i64) -> CreditsResult<Vec<Transaction>>;

    /// Sum of signed amounts across the user's ledger. Equals the cached
    /// balance when the system is consistent.
    async fn replay_balance(&self, user_id: Uuid) -> CreditsResult<i64>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn insert(&self, order: NewPaymentOrder) -> CreditsResult<PaymentOrder>;

    async fn find(&self, id: Uuid) -> CreditsResult<Option<PaymentOrder>>;

    /// Claim the `pending -> completed` transition. Returns the updated order
    /// iff this call won the transition; `None` on any non-pending status.
    /// The return value is the settlement idempotency decision.
    async fn try_complete(
        &self,
        id: Uuid,
        provider_payment_id: Option<&str>,
    ) -> CreditsResult<Option<PaymentOrder>>;

    /// Claim the `pending -> failed` transition. True iff this call moved it.
    async fn try_fail(&self, id: Uuid, provider_payment_id: Option<&str>) -> CreditsResult<bool>;
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Insert or replace the user's subscription row as `active`.
    async fn upsert_active(&self, sub: NewSubscription) -> CreditsResult<Subscription>;

    /// Flip the row to `cancelled`, keeping `end_date`. True iff a row existed.
    async fn cancel(&self, user_id: Uuid) -> CreditsResult<bool>;

    /// The subscription whose `end_date` is still in the future, if any.
    async fn find_current(&self, user_id: Uuid) -> CreditsResult<Option<Subscription>>;
}

#[async_trait]
pub trait UsageRepository: Send + Sync {
    async fn used_on(&self, user_id: Uuid, date: Date) -> CreditsResult<i64>;

    /// Increment the `(user, date)` counter iff it is below `limit`, as one
    /// atomic operation. Returns the new count, or `None` when exhausted.
    async fn try_increment(
        &self,
        user_id: Uuid,
        date: Date,
        limit: i64,
    ) -> CreditsResult<Option<i64>>;
}

#[async_trait]
pub trait ReconciliationRepository: Send + Sync {
    async fn record(&self, entry: NewReconciliation) -> CreditsResult<ReconciliationEntry>;

    /// Pending entries ordered oldest first.
    async fn due(&self, limit: i64) -> CreditsResult<Vec<ReconciliationEntry>>;

    async fn mark_settled(&self, id: Uuid) -> CreditsResult<()>;

    async fn mark_abandoned(&self, id: Uuid, error: &str) -> CreditsResult<()>;

    async fn bump_attempts(&self, id: Uuid, error: Option<&str>) -> CreditsResult<()>;
}
