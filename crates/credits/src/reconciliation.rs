//! Deferred-debit reconciliation
//!
//! When storage fails after a paid action already ran, the charge lands in
//! the reconciliation queue instead of being lost. The worker drains the
//! queue: each pending entry gets the same conditional debit the live path
//! uses, wrapped in a short exponential backoff for transient storage errors.
//! Entries that keep failing for non-transient reasons are abandoned with an
//! alert-level log rather than retried forever.

use std::sync::Arc;

use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::error::CreditsResult;
use crate::models::{
    NewTransaction, ReconciliationEntry, TransactionSource, TransactionType,
};
use crate::repo::{BalanceRepository, LedgerRepository, ReconciliationRepository};

/// Entries are abandoned after this many failed worker passes.
const MAX_ATTEMPTS: i32 = 10;

/// Entries pulled per worker pass.
const BATCH_SIZE: i64 = 50;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub settled: usize,
    pub deferred: usize,
    pub abandoned: usize,
}

pub struct ReconciliationService {
    queue: Arc<dyn ReconciliationRepository>,
    balances: Arc<dyn BalanceRepository>,
    ledger: Arc<dyn LedgerRepository>,
}

impl ReconciliationService {
    pub fn new(
        queue: Arc<dyn ReconciliationRepository>,
        balances: Arc<dyn BalanceRepository>,
        ledger: Arc<dyn LedgerRepository>,
    ) -> Self {
        Self {
            queue,
            balances,
            ledger,
        }
    }

    /// One worker pass over the pending queue.
    pub async fn retry_due(&self) -> CreditsResult<ReconciliationReport> {
        let due = self.queue.due(BATCH_SIZE).await?;
        let mut report = ReconciliationReport::default();

        for entry in due {
            match self.retry_entry(&entry).await {
                Ok(true) => report.settled += 1,
                Ok(false) => {
                    if entry.attempts + 1 >= MAX_ATTEMPTS {
                        self.queue
                            .mark_abandoned(entry.id, "retry budget exhausted")
                            .await?;
                        tracing::error!(
                            entry_id = %entry.id,
                            user_id = %entry.user_id,
                            amount = entry.amount,
                            "RECONCILIATION NEEDED: deferred debit abandoned after max attempts"
                        );
                        report.abandoned += 1;
                    } else {
                        report.deferred += 1;
                    }
                }
                Err(e) => {
                    self.queue.bump_attempts(entry.id, Some(&e.to_string())).await?;
                    tracing::warn!(
                        entry_id = %entry.id,
                        error = %e,
                        "Reconciliation retry errored, will retry"
                    );
                    report.deferred += 1;
                }
            }
        }

        if report != ReconciliationReport::default() {
            tracing::info!(
                settled = report.settled,
                deferred = report.deferred,
                abandoned = report.abandoned,
                "Reconciliation pass complete"
            );
        }

        Ok(report)
    }

    /// Attempt to apply one deferred debit. `Ok(true)` settled it, `Ok(false)`
    /// means the balance could not absorb the charge yet.
    async fn retry_entry(&self, entry: &ReconciliationEntry) -> CreditsResult<bool> {
        // Transient storage errors get a few in-process retries before the
        // entry goes back to the queue for the next pass.
        let backoff = ExponentialBackoff::from_millis(100).map(jitter).take(3);
        let updated = Retry::spawn(backoff, || {
            self.balances.try_debit(entry.user_id, entry.amount)
        })
        .await?;

        let Some(balance) = updated else {
            self.queue
                .bump_attempts(entry.id, Some("insufficient balance"))
                .await?;
            return Ok(false);
        };

        self.ledger
            .append(NewTransaction {
                user_id: entry.user_id,
                tx_type: TransactionType::Debit,
                amount: entry.amount,
                balance_after: balance.balance,
                source: TransactionSource::Action(entry.action_type),
                description: entry.description.clone(),
                related_audit_id: entry.related_audit_id,
                related_order_id: None,
            })
            .await?;
        self.queue.mark_settled(entry.id).await?;

        tracing::info!(
            entry_id = %entry.id,
            user_id = %entry.user_id,
            amount = entry.amount,
            new_balance = balance.balance,
            "Deferred debit settled"
        );
        Ok(true)
    }
}
