//! Credit Policy Engine
//!
//! Prices actions, authorizes them pre-flight, and performs the post-action
//! debit. All balance mutation funnels through here: the engine pairs every
//! balance change with an append-only ledger entry, and relies on the
//! repositories' single-statement conditional updates for concurrency safety.
//!
//! Test accounts bypass the balance row entirely: authorization always passes
//! at zero cost and debits become zero-amount `trial` ledger rows, so demo
//! traffic can never race with a real account's balance.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::error::{CreditsError, CreditsResult};
use crate::models::{
    AccountKind, NewReconciliation, NewTransaction, TransactionSource, TransactionType,
};
use crate::pricing::ActionType;
use crate::repo::{
    AccountRepository, BalanceRepository, LedgerRepository, ReconciliationRepository,
};

/// Result of a pre-flight authorization check. Side-effect-free apart from
/// the idempotent lazy creation of the balance row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    pub can_proceed: bool,
    pub required_credits: i64,
    pub current_balance: i64,
    pub is_test_account: bool,
    pub message: String,
}

/// How a debit was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitKind {
    /// Credits were atomically subtracted from the balance.
    Charged,
    /// Test account: ledgered as a zero-cost trial row, balance untouched.
    Trial,
    /// Storage failed after the paid action already ran; the charge was
    /// parked in the reconciliation queue for the worker to retry.
    Deferred(Uuid),
}

#[derive(Debug, Clone)]
pub struct DebitReceipt {
    pub new_balance: i64,
    pub grace_limit_used: bool,
    pub kind: DebitKind,
}

#[derive(Debug, Clone)]
pub struct CreditReceipt {
    pub new_balance: i64,
}

pub struct CreditPolicy {
    accounts: Arc<dyn AccountRepository>,
    balances: Arc<dyn BalanceRepository>,
    ledger: Arc<dyn LedgerRepository>,
    reconciliation: Arc<dyn ReconciliationRepository>,
    welcome_credits: i64,
}

impl CreditPolicy {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        balances: Arc<dyn BalanceRepository>,
        ledger: Arc<dyn LedgerRepository>,
        reconciliation: Arc<dyn ReconciliationRepository>,
        welcome_credits: i64,
    ) -> Self {
        Self {
            accounts,
            balances,
            ledger,
            reconciliation,
            welcome_credits,
        }
    }

    /// Check whether `user_id` can run `action` right now.
    ///
    /// Safe to call repeatedly: the only write it can perform is the one-time
    /// lazy creation of the balance row with the welcome grant.
    pub async fn authorize(&self, user_id: Uuid, action: ActionType) -> CreditsResult<Authorization> {
        if self.accounts.kind(user_id).await? == AccountKind::Test {
            let current = self
                .balances
                .fetch(user_id)
                .await?
                .map(|b| b.balance)
                .unwrap_or(0);
            return Ok(Authorization {
                can_proceed: true,
                required_credits: 0,
                current_balance: current,
                is_test_account: true,
                message: "test account".to_string(),
            });
        }

        let cost = action.credit_cost();
        let balance = self.ensure_with_welcome(user_id).await?;
        let can_proceed = balance.balance - cost >= -1;

        Ok(Authorization {
            can_proceed,
            required_credits: cost,
            current_balance: balance.balance,
            is_test_account: false,
            message: if can_proceed {
                "ok".to_string()
            } else {
                format!(
                    "insufficient credits: need {}, have {}",
                    cost, balance.balance
                )
            },
        })
    }

    /// Charge `user_id` for a completed `action`.
    ///
    /// The subtraction is one conditional storage update, so two simultaneous
    /// debits for the same user cannot both pass the grace floor. A storage
    /// failure does not bubble to the caller (the paid work already happened);
    /// the charge is deferred into the reconciliation queue instead.
    pub async fn debit(
        &self,
        user_id: Uuid,
        action: ActionType,
        related_audit_id: Option<Uuid>,
        description: &str,
    ) -> CreditsResult<DebitReceipt> {
        if self.accounts.kind(user_id).await? == AccountKind::Test {
            self.ledger
                .append(NewTransaction {
                    user_id,
                    tx_type: TransactionType::Debit,
                    amount: 0,
                    balance_after: 0,
                    source: TransactionSource::Trial,
                    description: description.to_string(),
                    related_audit_id,
                    related_order_id: None,
                })
                .await?;
            tracing::info!(user_id = %user_id, action = %action, "Trial debit recorded");
            return Ok(DebitReceipt {
                new_balance: 0,
                grace_limit_used: false,
                kind: DebitKind::Trial,
            });
        }

        let cost = action.credit_cost();
        if let Err(e) = self.ensure_with_welcome(user_id).await {
            if e.is_storage_failure() {
                return self
                    .defer_debit(user_id, action, cost, related_audit_id, description, &e)
                    .await;
            }
            return Err(e);
        }

        let updated = match self.balances.try_debit(user_id, cost).await {
            Ok(updated) => updated,
            Err(e) if e.is_storage_failure() => {
                return self
                    .defer_debit(user_id, action, cost, related_audit_id, description, &e)
                    .await;
            }
            Err(e) => return Err(e),
        };

        let Some(balance) = updated else {
            let available = self
                .balances
                .fetch(user_id)
                .await?
                .map(|b| b.balance)
                .unwrap_or(0);
            return Err(CreditsError::InsufficientCredits {
                required: cost,
                available,
            });
        };

        // If the ledger append fails here the balance has already moved; the
        // invariant checker surfaces the gap and the log is the alerting hook.
        if let Err(e) = self
            .ledger
            .append(NewTransaction {
                user_id,
                tx_type: TransactionType::Debit,
                amount: cost,
                balance_after: balance.balance,
                source: TransactionSource::Action(action),
                description: description.to_string(),
                related_audit_id,
                related_order_id: None,
            })
            .await
        {
            tracing::error!(
                user_id = %user_id,
                action = %action,
                error = %e,
                "RECONCILIATION NEEDED: debit applied but ledger append failed"
            );
        }

        tracing::info!(
            user_id = %user_id,
            action = %action,
            cost = cost,
            new_balance = balance.balance,
            grace_limit_used = balance.grace_limit_used,
            "Credits debited"
        );

        Ok(DebitReceipt {
            new_balance: balance.balance,
            grace_limit_used: balance.grace_limit_used,
            kind: DebitKind::Charged,
        })
    }

    /// Grant credits. Creates the balance row for unknown users.
    pub async fn credit(
        &self,
        user_id: Uuid,
        amount: i64,
        source: TransactionSource,
        description: &str,
        related_order_id: Option<Uuid>,
    ) -> CreditsResult<CreditReceipt> {
        if amount <= 0 {
            return Err(CreditsError::Configuration(format!(
                "credit amount must be positive, got {amount}"
            )));
        }

        let balance = self.balances.apply_credit(user_id, amount).await?;

        self.ledger
            .append(NewTransaction {
                user_id,
                tx_type: TransactionType::Credit,
                amount,
                balance_after: balance.balance,
                source,
                description: description.to_string(),
                related_audit_id: None,
                related_order_id,
            })
            .await?;

        tracing::info!(
            user_id = %user_id,
            amount = amount,
            source = source.as_str(),
            new_balance = balance.balance,
            "Credits granted"
        );

        Ok(CreditReceipt {
            new_balance: balance.balance,
        })
    }

    /// Current balance, creating the row (welcome grant) if absent.
    pub async fn balance(&self, user_id: Uuid) -> CreditsResult<crate::models::Balance> {
        self.ensure_with_welcome(user_id).await
    }

    /// Lazily create the balance row; the welcome grant is ledgered so replay
    /// still reconstructs the balance exactly.
    async fn ensure_with_welcome(&self, user_id: Uuid) -> CreditsResult<crate::models::Balance> {
        let (balance, created) = self.balances.ensure(user_id, self.welcome_credits).await?;
        if created && self.welcome_credits > 0 {
            self.ledger
                .append(NewTransaction {
                    user_id,
                    tx_type: TransactionType::Credit,
                    amount: self.welcome_credits,
                    balance_after: balance.balance,
                    source: TransactionSource::Welcome,
                    description: "welcome credits".to_string(),
                    related_audit_id: None,
                    related_order_id: None,
                })
                .await?;
            tracing::info!(user_id = %user_id, credits = self.welcome_credits, "Welcome credits granted");
        }
        Ok(balance)
    }

    async fn defer_debit(
        &self,
        user_id: Uuid,
        action: ActionType,
        cost: i64,
        related_audit_id: Option<Uuid>,
        description: &str,
        cause: &CreditsError,
    ) -> CreditsResult<DebitReceipt> {
        tracing::error!(
            user_id = %user_id,
            action = %action,
            error = %cause,
            "Debit storage failure after completed action; deferring to reconciliation"
        );

        let entry = self
            .reconciliation
            .record(NewReconciliation {
                user_id,
                action_type: action,
                amount: cost,
                related_audit_id,
                description: description.to_string(),
            })
            .await?;

        Ok(DebitReceipt {
            new_balance: 0,
            grace_limit_used: false,
            kind: DebitKind::Deferred(entry.id),
        })
    }
}
