//! In-memory repositories
//!
//! Mutex-backed implementations of the repository traits with the same
//! conditional-update contracts as the Postgres versions. They back the unit
//! and scenario tests; the mutex gives each conditional operation the same
//! atomicity the single SQL statement gives in production.

// Mutex poisoning only happens after a panic elsewhere; unwrapping is fine here.
#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::error::CreditsResult;
use crate::models::{
    AccountKind, Balance, NewPaymentOrder, NewReconciliation, NewSubscription, NewTransaction,
    OrderStatus, PaymentOrder, ReconciliationEntry, ReconciliationStatus, Subscription,
    SubscriptionStatus, Transaction,
};
use crate::repo::{
    AccountRepository, BalanceRepository, LedgerRepository, OrderRepository,
    ReconciliationRepository, SubscriptionRepository, UsageRepository,
};

#[derive(Default)]
pub struct MemoryAccountRepository {
    kinds: Mutex<HashMap<Uuid, AccountKind>>,
}

impl MemoryAccountRepository {
    pub fn set_kind(&self, user_id: Uuid, kind: AccountKind) {
        self.kinds.lock().unwrap().insert(user_id, kind);
    }
}

#[async_trait]
impl AccountRepository for MemoryAccountRepository {
    async fn kind(&self, user_id: Uuid) -> CreditsResult<AccountKind> {
        let kinds = self.kinds.lock().unwrap();
        Ok(kinds.get(&user_id).copied().unwrap_or(AccountKind::Standard))
    }
}

#[derive(Default)]
pub struct MemoryBalanceRepository {
    rows: Mutex<HashMap<Uuid, Balance>>,
}

impl MemoryBalanceRepository {
    /// Seed a balance row directly, for test setup.
    pub fn seed(&self, user_id: Uuid, balance: i64, grace_limit_used: bool) {
        self.rows.lock().unwrap().insert(
            user_id,
            Balance {
                user_id,
                balance,
                grace_limit_used,
                last_updated: OffsetDateTime::now_utc(),
            },
        );
    }
}

#[async_trait]
impl BalanceRepository for MemoryBalanceRepository {
    async fn fetch(&self, user_id: Uuid) -> CreditsResult<Option<Balance>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.get(&user_id).cloned())
    }

    async fn ensure(&self, user_id: Uuid, initial: i64) -> CreditsResult<(Balance, bool)> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(existing) = rows.get(&user_id) {
            return Ok((existing.clone(), false));
        }
        let row = Balance {
            user_id,
            balance: initial,
            grace_limit_used: false,
            last_updated: OffsetDateTime::now_utc(),
        };
        rows.insert(user_id, row.clone());
        Ok((row, true))
    }

    async fn try_debit(&self, user_id: Uuid, amount: i64) -> CreditsResult<Option<Balance>> {
        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows.get_mut(&user_id) else {
            return Ok(None);
        };
        if row.balance - amount < -1 {
            return Ok(None);
        }
        row.balance -= amount;
        if row.balance < 0 {
            row.grace_limit_used = true;
        }
        row.last_updated = OffsetDateTime::now_utc();
        Ok(Some(row.clone()))
    }

    async fn apply_credit(&self, user_id: Uuid, amount: i64) -> CreditsResult<Balance> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows.entry(user_id).or_insert_with(|| Balance {
            user_id,
            balance: 0,
            grace_limit_used: false,
            last_updated: OffsetDateTime::now_utc(),
        });
        row.balance += amount;
        if row.balance >= 0 {
            row.grace_limit_used = false;
        }
        row.last_updated = OffsetDateTime::now_utc();
        Ok(row.clone())
    }
}

#[derive(Default)]
pub struct MemoryLedgerRepository {
    rows: Mutex<Vec<Transaction>>,
}

impl MemoryLedgerRepository {
    pub fn all(&self) -> Vec<Transaction> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl LedgerRepository for MemoryLedgerRepository {
    async fn append(&self, entry: NewTransaction) -> CreditsResult<Transaction> {
        let tx = Transaction {
            id: Uuid::new_v4(),
            user_id: entry.user_id,
            tx_type: entry.tx_type,
            amount: entry.amount,
            balance_after: entry.balance_after,
            source: entry.source,
            description: entry.description,
            related_audit_id: entry.related_audit_id,
            related_order_id: entry.related_order_id,
            created_at: OffsetDateTime::now_utc(),
        };
        self.rows.lock().unwrap().push(tx.clone());
        Ok(tx)
    }

    async fn history(&self, user_id: Uuid, limit: i64) -> CreditsResult<Vec<Transaction>> {
        let rows = self.rows.lock().unwrap();
        let mut out: Vec<Transaction> = rows
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        out.reverse();
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }

    async fn replay_balance(&self, user_id: Uuid) -> CreditsResult<i64> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .filter(|t| t.user_id == user_id)
            .map(|t| match t.tx_type {
                crate::models::TransactionType::Credit => t.amount,
                crate::models::TransactionType::Debit => -t.amount,
            })
            .sum())
    }
}

#[derive(Default)]
pub struct MemoryOrderRepository {
    rows: Mutex<HashMap<Uuid, PaymentOrder>>,
}

#[async_trait]
impl OrderRepository for MemoryOrderRepository {
    async fn insert(&self, order: NewPaymentOrder) -> CreditsResult<PaymentOrder> {
        let row = PaymentOrder {
            id: Uuid::new_v4(),
            user_id: order.user_id,
            order_type: order.order_type,
            package_id: order.package_id,
            plan_id: order.plan_id,
            amount_cents: order.amount_cents,
            provider: order.provider,
            status: OrderStatus::Pending,
            provider_payment_id: None,
            created_at: OffsetDateTime::now_utc(),
            completed_at: None,
        };
        self.rows.lock().unwrap().insert(row.id, row.clone());
        Ok(row)
    }

    async fn find(&self, id: Uuid) -> CreditsResult<Option<PaymentOrder>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.get(&id).cloned())
    }

    async fn try_complete(
        &self,
        id: Uuid,
        provider_payment_id: Option<&str>,
    ) -> CreditsResult<Option<PaymentOrder>> {
        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows.get_mut(&id) else {
            return Ok(None);
        };
        if row.status != OrderStatus::Pending {
            return Ok(None);
        }
        row.status = OrderStatus::Completed;
        row.provider_payment_id = provider_payment_id.map(str::to_string);
        row.completed_at = Some(OffsetDateTime::now_utc());
        Ok(Some(row.clone()))
    }

    async fn try_fail(&self, id: Uuid, provider_payment_id: Option<&str>) -> CreditsResult<bool> {
        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows.get_mut(&id) else {
            return Ok(false);
        };
        if row.status != OrderStatus::Pending {
            return Ok(false);
        }
        row.status = OrderStatus::Failed;
        if provider_payment_id.is_some() {
            row.provider_payment_id = provider_payment_id.map(str::to_string);
        }
        Ok(true)
    }
}

#[derive(Default)]
pub struct MemorySubscriptionRepository {
    rows: Mutex<HashMap<Uuid, Subscription>>,
}

#[async_trait]
impl SubscriptionRepository for MemorySubscriptionRepository {
    async fn upsert_active(&self, sub: NewSubscription) -> CreditsResult<Subscription> {
        let row = Subscription {
            user_id: sub.user_id,
            subscription_type: sub.subscription_type,
            status: SubscriptionStatus::Active,
            start_date: sub.start_date,
            end_date: sub.end_date,
            daily_limit: sub.daily_limit,
            external_subscription_id: sub.external_subscription_id,
            updated_at: OffsetDateTime::now_utc(),
        };
        self.rows.lock().unwrap().insert(row.user_id, row.clone());
        Ok(row)
    }

    async fn cancel(&self, user_id: Uuid) -> CreditsResult<bool> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&user_id) {
            Some(row) => {
                row.status = SubscriptionStatus::Cancelled;
                row.updated_at = OffsetDateTime::now_utc();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_current(&self, user_id: Uuid) -> CreditsResult<Option<Subscription>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .get(&user_id)
            .filter(|s| s.end_date > OffsetDateTime::now_utc())
            .cloned())
    }
}

#[derive(Default)]
pub struct MemoryUsageRepository {
    rows: Mutex<HashMap<(Uuid, Date), i64>>,
}

#[async_trait]
impl UsageRepository for MemoryUsageRepository {
    async fn used_on(&self, user_id: Uuid, date: Date) -> CreditsResult<i64> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.get(&(user_id, date)).copied().unwrap_or(0))
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
        let mut rows = self.rows.lock().unwrap();
        let used = rows.entry((user_id, date)).or_insert(0);
        if *used >= limit {
            return Ok(None);
        }
        *used += 1;
        Ok(Some(*used))
    }
}

#[derive(Default)]
pub struct MemoryReconciliationRepository {
    rows: Mutex<HashMap<Uuid, ReconciliationEntry>>,
}

impl MemoryReconciliationRepository {
    pub fn all(&self) -> Vec<ReconciliationEntry> {
        self.rows.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl ReconciliationRepository for MemoryReconciliationRepository {
    async fn record(&self, entry: NewReconciliation) -> CreditsResult<ReconciliationEntry> {
        let row = ReconciliationEntry {
            id: Uuid::new_v4(),
            user_id: entry.user_id,
            action_type: entry.action_type,
            amount: entry.amount,
            related_audit_id: entry.related_audit_id,
            description: entry.description,
            attempts: 0,
            status: ReconciliationStatus::Pending,
            last_error: None,
            created_at: OffsetDateTime::now_utc(),
            settled_at: None,
        };
        self.rows.lock().unwrap().insert(row.id, row.clone());
        Ok(row)
    }

    async fn due(&self, limit: i64) -> CreditsResult<Vec<ReconciliationEntry>> {
        let rows = self.rows.lock().unwrap();
        let mut out: Vec<ReconciliationEntry> = rows
            .values()
            .filter(|e| e.status == ReconciliationStatus::Pending)
            .cloned()
            .collect();
        out.sort_by_key(|e| e.created_at);
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }

    async fn mark_settled(&self, id: Uuid) -> CreditsResult<()> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.get_mut(&id) {
            if row.status == ReconciliationStatus::Pending {
                row.status = ReconciliationStatus::Settled;
                row.settled_at = Some(OffsetDateTime::now_utc());
            }
        }
        Ok(())
    }

    async fn mark_abandoned(&self, id: Uuid, error: &str) -> CreditsResult<()> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.get_mut(&id) {
            if row.status == ReconciliationStatus::Pending {
                row.status = ReconciliationStatus::Abandoned;
                row.last_error = Some(error.to_string());
            }
        }
        Ok(())
    }

    async fn bump_attempts(&self, id: Uuid, error: Option<&str>) -> CreditsResult<()> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.get_mut(&id) {
            row.attempts += 1;
            if let Some(e) = error {
                row.last_error = Some(e.to_string());
            }
        }
        Ok(())
    }
}

/// Bundle of in-memory repositories for wiring test fixtures.
#[derive(Default)]
pub struct MemoryRepos {
    pub accounts: Arc<MemoryAccountRepository>,
    pub balances: Arc<MemoryBalanceRepository>,
    pub ledger: Arc<MemoryLedgerRepository>,
    pub orders: Arc<MemoryOrderRepository>,
    pub subscriptions: Arc<MemorySubscriptionRepository>,
    pub usage: Arc<MemoryUsageRepository>,
    pub reconciliation: Arc<MemoryReconciliationRepository>,
}
