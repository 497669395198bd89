// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! UXAudit Credits Module
//!
//! Prepaid credit ledger and payment settlement for the audit platform.
//!
//! ## Features
//!
//! - **Credit Policy**: Price actions, authorize pre-flight, debit post-action
//! - **Grace Limit**: One action on credit, balance floor of -1
//! - **Ledger**: Append-only transaction history as the source of truth
//! - **Payment Orders**: Pending orders with provider checkout payloads
//! - **Settlement**: Idempotent Stripe and LiqPay webhook processing
//! - **Subscriptions**: Daily-limit allowance with atomic consumption
//! - **Reconciliation**: Deferred debits retried by the worker
//! - **Invariants**: Runnable SQL consistency checks

pub mod daily_limit;
pub mod error;
pub mod invariants;
pub mod models;
pub mod orders;
pub mod policy;
pub mod pricing;
pub mod providers;
pub mod reconciliation;
pub mod repo;
pub mod settlement;

#[cfg(test)]
mod edge_case_tests;

// Daily limit
pub use daily_limit::{DailyLimitChecker, LimitCheck};

// Error
pub use error::{CreditsError, CreditsResult};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Models
pub use models::{
    AccountKind, Balance, OrderStatus, OrderType, PaymentOrder, PaymentProvider, Subscription,
    SubscriptionStatus, Transaction, TransactionSource, TransactionType,
};

// Orders
pub use orders::{CheckoutPayload, CreatedOrder, PaymentOrderManager};

// Policy
pub use policy::{Authorization, CreditPolicy, CreditReceipt, DebitKind, DebitReceipt};

// Pricing
pub use pricing::{
    ActionType, CreditPackage, SubscriptionPlan, CREDIT_PACKAGES, DEFAULT_WELCOME_CREDITS,
    SUBSCRIPTION_PLANS,
};

// Providers
pub use providers::{PaymentOutcome, ProviderConfig, ProviderEvent};

// Reconciliation
pub use reconciliation::{ReconciliationReport, ReconciliationService};

// Settlement
pub use settlement::{Settlement, SettlementProcessor};

use std::sync::Arc;

use sqlx::PgPool;

use repo::{
    PgAccountRepository, PgBalanceRepository, PgLedgerRepository, PgOrderRepository,
    PgReconciliationRepository, PgSubscriptionRepository, PgUsageRepository,
};

/// Everything the API and worker need, wired over one Postgres pool.
#[derive(Clone)]
pub struct CreditsService {
    pub policy: Arc<CreditPolicy>,
    pub orders: Arc<PaymentOrderManager>,
    pub settlement: Arc<SettlementProcessor>,
    pub daily_limit: Arc<DailyLimitChecker>,
    pub reconciliation: Arc<ReconciliationService>,
    pub ledger: Arc<dyn repo::LedgerRepository>,
}

impl CreditsService {
    pub fn new(pool: PgPool, providers: ProviderConfig) -> Self {
        let accounts = Arc::new(PgAccountRepository::new(pool.clone()));
        let balances = Arc::new(PgBalanceRepository::new(pool.clone()));
        let ledger = Arc::new(PgLedgerRepository::new(pool.clone()));
        let orders_repo = Arc::new(PgOrderRepository::new(pool.clone()));
        let subscriptions = Arc::new(PgSubscriptionRepository::new(pool.clone()));
        let usage = Arc::new(PgUsageRepository::new(pool.clone()));
        let recon_repo = Arc::new(PgReconciliationRepository::new(pool));

        let policy = Arc::new(CreditPolicy::new(
            accounts,
            balances.clone(),
            ledger.clone(),
            recon_repo.clone(),
            DEFAULT_WELCOME_CREDITS,
        ));
        let orders = Arc::new(PaymentOrderManager::new(orders_repo, providers.clone()));
        let settlement = Arc::new(SettlementProcessor::new(
            orders.clone(),
            subscriptions.clone(),
            policy.clone(),
            providers,
        ));
        let daily_limit = Arc::new(DailyLimitChecker::new(subscriptions, usage));
        let reconciliation = Arc::new(ReconciliationService::new(
            recon_repo,
            balances,
            ledger.clone(),
        ));

        Self {
            policy,
            orders,
            settlement,
            daily_limit,
            reconciliation,
            ledger,
        }
    }
}
