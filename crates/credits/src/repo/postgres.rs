//! Postgres repositories
//!
//! Every conditional operation is a single SQL statement whose affected-row
//! result carries the decision, so concurrent handlers serialize at the
//! database without application-level locks.

use async_trait::async_trait;
use sqlx::PgPool;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::error::CreditsResult;
use crate::models::{
    AccountKind, Balance, NewPaymentOrder, NewReconciliation, NewSubscription, NewTransaction,
    OrderStatus, OrderType, PaymentOrder, PaymentProvider, ReconciliationEntry,
    ReconciliationStatus, Subscription, SubscriptionStatus, Transaction, TransactionSource,
    TransactionType,
};
use crate::pricing::ActionType;
use crate::repo::{
    AccountRepository, BalanceRepository, LedgerRepository, OrderRepository,
    ReconciliationRepository, SubscriptionRepository, UsageRepository,
};

#[derive(Clone)]
pub struct PgAccountRepository {
    pool: PgPool,
}

impl PgAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountRepository for PgAccountRepository {
    async fn kind(&self, user_id: Uuid) -> CreditsResult<AccountKind> {
        let row: Option<(bool,)> =
            sqlx::query_as("SELECT is_test_account FROM accounts WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(match row {
            Some((true,)) => AccountKind::Test,
            _ => AccountKind::Standard,
        })
    }
}

type BalanceRow = (Uuid, i64, bool, OffsetDateTime);

fn balance_from_row(row: BalanceRow) -> Balance {
    Balance {
        user_id: row.0,
        balance: row.1,
        grace_limit_used: row.2,
        last_updated: row.3,
    }
}

#[derive(Clone)]
pub struct PgBalanceRepository {
    pool: PgPool,
}

impl PgBalanceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BalanceRepository for PgBalanceRepository {
    async fn fetch(&self, user_id: Uuid) -> CreditsResult<Option<Balance>> {
        let row: Option<BalanceRow> = sqlx::query_as(
            "SELECT user_id, balance, grace_limit_used, last_updated
             FROM credit_balances WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(balance_from_row))
    }

    async fn ensure(&self, user_id: Uuid, initial: i64) -> CreditsResult<(Balance, bool)> {
        // ON CONFLICT DO NOTHING returns a row only for the caller that
        // actually inserted, so exactly one concurrent caller sees created.
        let inserted: Option<BalanceRow> = sqlx::query_as(
            r#"
            INSERT INTO credit_balances (user_id, balance, grace_limit_used, last_updated)
            VALUES ($1, $2, FALSE, NOW())
            ON CONFLICT (user_id) DO NOTHING
            RETURNING user_id, balance, grace_limit_used, last_updated
            "#,
        )
        .bind(user_id)
        .bind(initial)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok((balance_from_row(row), true));
        }

        let existing: BalanceRow = sqlx::query_as(
            "SELECT user_id, balance, grace_limit_used, last_updated
             FROM credit_balances WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok((balance_from_row(existing), false))
    }

    async fn try_debit(&self, user_id: Uuid, amount: i64) -> CreditsResult<Option<Balance>> {
        // Single conditional update: the WHERE clause enforces the grace
        // floor, the SET clause raises the grace flag when the new balance
        // dips below zero. No row affected means insufficient funds.
        let row: Option<BalanceRow> = sqlx::query_as(
            r#"
            UPDATE credit_balances
            SET balance = balance - $2,
                grace_limit_used = CASE
                    WHEN balance - $2 < 0 THEN TRUE
                    ELSE grace_limit_used
                END,
                last_updated = NOW()
            WHERE user_id = $1 AND balance - $2 >= -1
            RETURNING user_id, balance, grace_limit_used, last_updated
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(balance_from_row))
    }

    async fn apply_credit(&self, user_id: Uuid, amount: i64) -> CreditsResult<Balance> {
        let row: BalanceRow = sqlx::query_as(
            r#"
            INSERT INTO credit_balances (user_id, balance, grace_limit_used, last_updated)
            VALUES ($1, $2, FALSE, NOW())
            ON CONFLICT (user_id) DO UPDATE SET
                balance = credit_balances.balance + $2,
                grace_limit_used = CASE
                    WHEN credit_balances.balance + $2 >= 0 THEN FALSE
                    ELSE credit_balances.grace_limit_used
                END,
                last_updated = NOW()
            RETURNING user_id, balance, grace_limit_used, last_updated
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .fetch_one(&self.pool)
        .await?;

        Ok(balance_from_row(row))
    }
}

type TransactionRow = (
    Uuid,
    Uuid,
    String,
    i64,
    i64,
    String,
    String,
    Option<Uuid>,
    Option<Uuid>,
    OffsetDateTime,
);

fn transaction_from_row(row: TransactionRow) -> CreditsResult<Transaction> {
    Ok(Transaction {
        id: row.0,
        user_id: row.1,
        tx_type: TransactionType::parse(&row.2)?,
        amount: row.3,
        balance_after: row.4,
        source: TransactionSource::parse(&row.5)?,
        description: row.6,
        related_audit_id: row.7,
        related_order_id: row.8,
        created_at: row.9,
    })
}

#[derive(Clone)]
pub struct PgLedgerRepository {
    pool: PgPool,
}

impl PgLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerRepository for PgLedgerRepository {
    async fn append(&self, entry: NewTransaction) -> CreditsResult<Transaction> {
        let row: TransactionRow = sqlx::query_as(
            r#"
            INSERT INTO credit_transactions
                (id, user_id, tx_type, amount, balance_after, source, description,
                 related_audit_id, related_order_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
            RETURNING id, user_id, tx_type, amount, balance_after, source, description,
                      related_audit_id, related_order_id, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(entry.user_id)
        .bind(entry.tx_type.as_str())
        .bind(entry.amount)
        .bind(entry.balance_after)
        .bind(entry.source.as_str())
        .bind(&entry.description)
        .bind(entry.related_audit_id)
        .bind(entry.related_order_id)
        .fetch_one(&self.pool)
        .await?;

        transaction_from_row(row)
    }

    async fn history(&self, user_id: Uuid, limit: i64) -> CreditsResult<Vec<Transaction>> {
        let rows: Vec<TransactionRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, tx_type, amount, balance_after, source, description,
                   related_audit_id, related_order_id, created_at
            FROM credit_transactions
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(transaction_from_row).collect()
    }

    async fn replay_balance(&self, user_id: Uuid) -> CreditsResult<i64> {
        let (sum,): (i64,) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(
                CASE WHEN tx_type = 'credit' THEN amount ELSE -amount END
            ), 0)::BIGINT
            FROM credit_transactions
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(sum)
    }
}

type OrderRow = (
    Uuid,
    Uuid,
    String,
    Option<String>,
    Option<String>,
    i64,
    String,
    String,
    Option<String>,
    OffsetDateTime,
    Option<OffsetDateTime>,
);

fn order_from_row(row: OrderRow) -> CreditsResult<PaymentOrder> {
    Ok(PaymentOrder {
        id: row.0,
        user_id: row.1,
        order_type: OrderType::parse(&row.2)?,
        package_id: row.3,
        plan_id: row.4,
        amount_cents: row.5,
        provider: PaymentProvider::parse(&row.6)?,
        status: OrderStatus::parse(&row.7)?,
        provider_payment_id: row.8,
        created_at: row.9,
        completed_at: row.10,
    })
}

const ORDER_COLUMNS: &str = "id, user_id, order_type, package_id, plan_id, amount_cents, \
                             provider, status, provider_payment_id, created_at, completed_at";

#[derive(Clone)]
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn insert(&self, order: NewPaymentOrder) -> CreditsResult<PaymentOrder> {
        let row: OrderRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO payment_orders
                (id, user_id, order_type, package_id, plan_id, amount_cents, provider,
                 status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', NOW())
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(order.user_id)
        .bind(order.order_type.as_str())
        .bind(&order.package_id)
        .bind(&order.plan_id)
        .bind(order.amount_cents)
        .bind(order.provider.as_str())
        .fetch_one(&self.pool)
        .await?;

        order_from_row(row)
    }

    async fn find(&self, id: Uuid) -> CreditsResult<Option<PaymentOrder>> {
        let row: Option<OrderRow> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM payment_orders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(order_from_row).transpose()
    }

    async fn try_complete(
        &self,
        id: Uuid,
        provider_payment_id: Option<&str>,
    ) -> CreditsResult<Option<PaymentOrder>> {
        // The status guard in the WHERE clause is the idempotency gate:
        // only one delivery of a webhook can move pending -> completed.
        let row: Option<OrderRow> = sqlx::query_as(&format!(
            r#"
            UPDATE payment_orders
            SET status = 'completed', provider_payment_id = $2, completed_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(provider_payment_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(order_from_row).transpose()
    }

    async fn try_fail(&self, id: Uuid, provider_payment_id: Option<&str>) -> CreditsResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payment_orders
            SET status = 'failed', provider_payment_id = COALESCE($2, provider_payment_id)
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(provider_payment_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

type SubscriptionRow = (
    Uuid,
    String,
    String,
    OffsetDateTime,
    OffsetDateTime,
    i64,
    Option<String>,
    OffsetDateTime,
);

fn subscription_from_row(row: SubscriptionRow) -> CreditsResult<Subscription> {
    Ok(Subscription {
        user_id: row.0,
        subscription_type: row.1,
        status: SubscriptionStatus::parse(&row.2)?,
        start_date: row.3,
        end_date: row.4,
        daily_limit: row.5,
        external_subscription_id: row.6,
        updated_at: row.7,
    })
}

const SUBSCRIPTION_COLUMNS: &str = "user_id, subscription_type, status, start_date, end_date, \
                                    daily_limit, external_subscription_id, updated_at";

#[derive(Clone)]
pub struct PgSubscriptionRepository {
    pool: PgPool,
}

impl PgSubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionRepository for PgSubscriptionRepository {
    async fn upsert_active(&self, sub: NewSubscription) -> CreditsResult<Subscription> {
        let row: SubscriptionRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO subscriptions
                (user_id, subscription_type, status, start_date, end_date, daily_limit,
                 external_subscription_id, updated_at)
            VALUES ($1, $2, 'active', $3, $4, $5, $6, NOW())
            ON CONFLICT (user_id) DO UPDATE SET
                subscription_type = EXCLUDED.subscription_type,
                status = 'active',
                start_date = EXCLUDED.start_date,
                end_date = EXCLUDED.end_date,
                daily_limit = EXCLUDED.daily_limit,
                external_subscription_id = EXCLUDED.external_subscription_id,
                updated_at = NOW()
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(sub.user_id)
        .bind(&sub.subscription_type)
        .bind(sub.start_date)
        .bind(sub.end_date)
        .bind(sub.daily_limit)
        .bind(&sub.external_subscription_id)
        .fetch_one(&self.pool)
        .await?;

        subscription_from_row(row)
    }

    async fn cancel(&self, user_id: Uuid) -> CreditsResult<bool> {
        let result = sqlx::query(
            "UPDATE subscriptions SET status = 'cancelled', updated_at = NOW()
             WHERE user_id = $1",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_current(&self, user_id: Uuid) -> CreditsResult<Option<Subscription>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
             WHERE user_id = $1 AND end_date > NOW()"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(subscription_from_row).transpose()
    }
}

#[derive(Clone)]
pub struct PgUsageRepository {
    pool: PgPool,
}

impl PgUsageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageRepository for PgUsageRepository {
    async fn used_on(&self, user_id: Uuid, date: Date) -> CreditsResult<i64> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT used FROM subscription_usage WHERE user_id = $1 AND usage_date = $2",
        )
        .bind(user_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(used,)| used).unwrap_or(0))
    }

    async fn try_increment(
        &self,
        user_id: Uuid,
        date: Date,
        limit: i64,
    ) -> CreditsResult<Option<i64>> {
        if limit <= 0 {
            return Ok(None);
        }

        // The WHERE clause on the conflict arm makes check-and-increment one
        // atomic statement; the insert arm only fires for the day's first use.
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            INSERT INTO subscription_usage (user_id, usage_date, used)
            VALUES ($1, $2, 1)
            ON CONFLICT (user_id, usage_date) DO UPDATE
                SET used = subscription_usage.used + 1
                WHERE subscription_usage.used < $3
            RETURNING used
            "#,
        )
        .bind(user_id)
        .bind(date)
        .bind(limit)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(used,)| used))
    }
}

type ReconciliationRow = (
    Uuid,
    Uuid,
    String,
    i64,
    Option<Uuid>,
    String,
    i32,
    String,
    Option<String>,
    OffsetDateTime,
    Option<OffsetDateTime>,
);

fn reconciliation_from_row(row: ReconciliationRow) -> CreditsResult<ReconciliationEntry> {
    Ok(ReconciliationEntry {
        id: row.0,
        user_id: row.1,
        action_type: ActionType::parse(&row.2)?,
        amount: row.3,
        related_audit_id: row.4,
        description: row.5,
        attempts: row.6,
        status: ReconciliationStatus::parse(&row.7)?,
        last_error: row.8,
        created_at: row.9,
        settled_at: row.10,
    })
}

const RECONCILIATION_COLUMNS: &str = "id, user_id, action_type, amount, related_audit_id, \
                                      description, attempts, status, last_error, created_at, \
                                      settled_at";

#[derive(Clone)]
pub struct PgReconciliationRepository {
    pool: PgPool,
}

impl PgReconciliationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReconciliationRepository for PgReconciliationRepository {
    async fn record(&self, entry: NewReconciliation) -> CreditsResult<ReconciliationEntry> {
        let row: ReconciliationRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO billing_reconciliation
                (id, user_id, action_type, amount, related_audit_id, description,
                 attempts, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, 0, 'pending', NOW())
            RETURNING {RECONCILIATION_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(entry.user_id)
        .bind(entry.action_type.as_str())
        .bind(entry.amount)
        .bind(entry.related_audit_id)
        .bind(&entry.description)
        .fetch_one(&self.pool)
        .await?;

        reconciliation_from_row(row)
    }

    async fn due(&self, limit: i64) -> CreditsResult<Vec<ReconciliationEntry>> {
        let rows: Vec<ReconciliationRow> = sqlx::query_as(&format!(
            r#"
            SELECT {RECONCILIATION_COLUMNS}
            FROM billing_reconciliation
            WHERE status = 'pending'
            ORDER BY created_at ASC
            LIMIT $1
            "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(reconciliation_from_row).collect()
    }

    async fn mark_settled(&self, id: Uuid) -> CreditsResult<()> {
        sqlx::query(
            "UPDATE billing_reconciliation
             SET status = 'settled', settled_at = NOW()
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_abandoned(&self, id: Uuid, error: &str) -> CreditsResult<()> {
        sqlx::query(
            "UPDATE billing_reconciliation
             SET status = 'abandoned', last_error = $2
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn bump_attempts(&self, id: Uuid, error: Option<&str>) -> CreditsResult<()> {
        sqlx::query(
            "UPDATE billing_reconciliation
             SET attempts = attempts + 1, last_error = COALESCE($2, last_error)
             WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
