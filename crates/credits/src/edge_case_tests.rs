// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Credit System
//!
//! Tests critical boundary conditions and race conditions in:
//! - Grace-limit debits and the -1 balance floor
//! - Welcome grants and ledger consistency
//! - Test-account trial bypass
//! - Webhook settlement idempotency and signature rejection
//! - Subscription daily limits under concurrency
//! - Deferred-debit reconciliation

use std::sync::Arc;

use crate::daily_limit::DailyLimitChecker;
use crate::models::{AccountKind, NewSubscription, TransactionSource, TransactionType};
use crate::orders::PaymentOrderManager;
use crate::policy::{CreditPolicy, DebitKind};
use crate::pricing::{ActionType, DEFAULT_WELCOME_CREDITS};
use crate::providers::ProviderConfig;
use crate::reconciliation::ReconciliationService;
use crate::repo::{
    BalanceRepository, LedgerRepository, MemoryRepos, ReconciliationRepository,
    SubscriptionRepository,
};
use crate::settlement::{Settlement, SettlementProcessor};

fn test_config() -> ProviderConfig {
    ProviderConfig {
        stripe_webhook_secret: "whsec_test_secret".to_string(),
        liqpay_public_key: "pub".to_string(),
        liqpay_private_key: "priv".to_string(),
        checkout_result_url: "https://app.example.com/billing/result".to_string(),
        checkout_server_url: "https://api.example.com/webhook/liqpay".to_string(),
    }
}

struct Fixture {
    repos: MemoryRepos,
    policy: Arc<CreditPolicy>,
    orders: Arc<PaymentOrderManager>,
    settlement: SettlementProcessor,
    daily_limit: DailyLimitChecker,
    reconciliation: ReconciliationService,
}

fn fixture() -> Fixture {
    let repos = MemoryRepos::default();
    let policy = Arc::new(CreditPolicy::new(
        repos.accounts.clone(),
        repos.balances.clone(),
        repos.ledger.clone(),
        repos.reconciliation.clone(),
        DEFAULT_WELCOME_CREDITS,
    ));
    let orders = Arc::new(PaymentOrderManager::new(
        repos.orders.clone(),
        test_config(),
    ));
    let settlement = SettlementProcessor::new(
        orders.clone(),
        repos.subscriptions.clone(),
        policy.clone(),
        test_config(),
    );
    let daily_limit = DailyLimitChecker::new(repos.subscriptions.clone(), repos.usage.clone());
    let reconciliation = ReconciliationService::new(
        repos.reconciliation.clone(),
        repos.balances.clone(),
        repos.ledger.clone(),
    );
    Fixture {
        repos,
        policy,
        orders,
        settlement,
        daily_limit,
        reconciliation,
    }
}

mod grace_limit_tests {
    use super::*;
    use crate::error::CreditsError;
    use uuid::Uuid;

    // =========================================================================
    // Sufficient balance: debit subtracts the action cost, no grace involved
    // =========================================================================
    #[tokio::test]
    async fn test_debit_with_sufficient_balance() {
        let f = fixture();
        let user = Uuid::new_v4();
        f.repos.balances.seed(user, 5, false);

        let receipt = f
            .policy
            .debit(user, ActionType::Audit, None, "full audit")
            .await
            .unwrap();

        assert_eq!(receipt.new_balance, 3);
        assert!(!receipt.grace_limit_used);
        assert_eq!(receipt.kind, DebitKind::Charged);
    }

    // =========================================================================
    // Balance 0: one more 1-credit action is allowed on credit, landing at -1
    // with the grace flag set
    // =========================================================================
    #[tokio::test]
    async fn test_grace_debit_from_zero() {
        let f = fixture();
        let user = Uuid::new_v4();
        f.repos.balances.seed(user, 0, false);

        let receipt = f
            .policy
            .debit(user, ActionType::Research, None, "deep research")
            .await
            .unwrap();

        assert_eq!(receipt.new_balance, -1);
        assert!(receipt.grace_limit_used);
    }

    // =========================================================================
    // Balance -1: the grace credit is spent, further debits are rejected and
    // the error carries what the caller needs for a 402
    // =========================================================================
    #[tokio::test]
    async fn test_no_second_grace_debit() {
        let f = fixture();
        let user = Uuid::new_v4();
        f.repos.balances.seed(user, -1, true);

        let err = f
            .policy
            .debit(user, ActionType::Research, None, "deep research")
            .await
            .unwrap_err();

        match err {
            CreditsError::InsufficientCredits {
                required,
                available,
            } => {
                assert_eq!(required, 1);
                assert_eq!(available, -1);
            }
            other => panic!("expected InsufficientCredits, got {other:?}"),
        }

        // Nothing moved and nothing was ledgered.
        let balance = f.repos.balances.fetch(user).await.unwrap().unwrap();
        assert_eq!(balance.balance, -1);
        assert!(f.repos.ledger.all().is_empty());
    }

    // =========================================================================
    // Balance 1, audit costs 2: 1 - 2 = -1 is within the grace floor
    // =========================================================================
    #[tokio::test]
    async fn test_two_credit_action_can_use_grace() {
        let f = fixture();
        let user = Uuid::new_v4();
        f.repos.balances.seed(user, 1, false);

        let receipt = f
            .policy
            .debit(user, ActionType::Audit, None, "full audit")
            .await
            .unwrap();

        assert_eq!(receipt.new_balance, -1);
        assert!(receipt.grace_limit_used);
    }

    // =========================================================================
    // Balance 0, audit costs 2: 0 - 2 = -2 breaches the floor, rejected
    // =========================================================================
    #[tokio::test]
    async fn test_two_credit_action_cannot_breach_floor() {
        let f = fixture();
        let user = Uuid::new_v4();
        f.repos.balances.seed(user, 0, false);

        let err = f
            .policy
            .debit(user, ActionType::Audit, None, "full audit")
            .await
            .unwrap_err();
        assert!(matches!(err, CreditsError::InsufficientCredits { .. }));
    }

    // =========================================================================
    // Authorize mirrors the debit decision without moving anything
    // =========================================================================
    #[tokio::test]
    async fn test_authorize_is_side_effect_free() {
        let f = fixture();
        let user = Uuid::new_v4();
        f.repos.balances.seed(user, -1, true);

        let auth = f.policy.authorize(user, ActionType::Research).await.unwrap();
        assert!(!auth.can_proceed);
        assert_eq!(auth.current_balance, -1);
        assert_eq!(auth.required_credits, 1);

        let balance = f.repos.balances.fetch(user).await.unwrap().unwrap();
        assert_eq!(balance.balance, -1);
    }

    // =========================================================================
    // A purchase that brings the balance back above zero clears the grace flag
    // =========================================================================
    #[tokio::test]
    async fn test_credit_clears_grace_flag() {
        let f = fixture();
        let user = Uuid::new_v4();
        f.repos.balances.seed(user, -1, true);

        let receipt = f
            .policy
            .credit(user, 20, TransactionSource::Purchase, "Starter pack", None)
            .await
            .unwrap();

        assert_eq!(receipt.new_balance, 19);
        let balance = f.repos.balances.fetch(user).await.unwrap().unwrap();
        assert!(!balance.grace_limit_used);
    }

    // =========================================================================
    // 10 parallel 1-credit debits against balance 1: exactly two can win
    // (one to 0, one to -1), the rest must see insufficient credits
    // =========================================================================
    #[tokio::test]
    async fn test_parallel_debits_respect_grace_floor() {
        let f = fixture();
        let user = Uuid::new_v4();
        f.repos.balances.seed(user, 1, false);

        let barrier = Arc::new(tokio::sync::Barrier::new(10));
        let mut handles = Vec::new();
        for _ in 0..10 {
            let policy = f.policy.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                policy
                    .debit(user, ActionType::Research, None, "concurrent")
                    .await
                    .is_ok()
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }

        assert_eq!(successes, 2, "exactly two debits may pass the grace floor");
        let balance = f.repos.balances.fetch(user).await.unwrap().unwrap();
        assert_eq!(balance.balance, -1);
        assert!(balance.grace_limit_used);
    }
}

mod welcome_and_ledger_tests {
    use super::*;
    use uuid::Uuid;

    // =========================================================================
    // First contact creates the balance with the welcome grant, and the grant
    // itself is a ledger row so replay still reproduces the balance
    // =========================================================================
    #[tokio::test]
    async fn test_welcome_grant_is_ledgered() {
        let f = fixture();
        let user = Uuid::new_v4();

        let auth = f.policy.authorize(user, ActionType::Research).await.unwrap();
        assert!(auth.can_proceed);
        assert_eq!(auth.current_balance, DEFAULT_WELCOME_CREDITS);

        let entries = f.repos.ledger.all();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source, TransactionSource::Welcome);
        assert_eq!(entries[0].amount, DEFAULT_WELCOME_CREDITS);

        let replayed = f.repos.ledger.replay_balance(user).await.unwrap();
        assert_eq!(replayed, auth.current_balance);
    }

    // =========================================================================
    // Repeated authorization does not grant welcome credits again
    // =========================================================================
    #[tokio::test]
    async fn test_welcome_grant_happens_once() {
        let f = fixture();
        let user = Uuid::new_v4();

        f.policy.authorize(user, ActionType::Research).await.unwrap();
        f.policy.authorize(user, ActionType::Audit).await.unwrap();

        assert_eq!(f.repos.ledger.all().len(), 1);
    }

    // =========================================================================
    // Every debit and credit appends exactly one entry, and replaying the
    // whole ledger reproduces the cached balance
    // =========================================================================
    #[tokio::test]
    async fn test_ledger_replay_matches_balance() {
        let f = fixture();
        let user = Uuid::new_v4();

        f.policy.authorize(user, ActionType::Audit).await.unwrap();
        f.policy
            .debit(user, ActionType::Audit, None, "full audit")
            .await
            .unwrap();
        f.policy
            .credit(user, 20, TransactionSource::Purchase, "Starter pack", None)
            .await
            .unwrap();
        f.policy
            .debit(user, ActionType::Research, None, "deep research")
            .await
            .unwrap();

        let balance = f.repos.balances.fetch(user).await.unwrap().unwrap();
        let replayed = f.repos.ledger.replay_balance(user).await.unwrap();
        assert_eq!(balance.balance, replayed);
        assert_eq!(balance.balance, DEFAULT_WELCOME_CREDITS - 2 + 20 - 1);
    }

    // =========================================================================
    // history returns newest first
    // =========================================================================
    #[tokio::test]
    async fn test_history_is_newest_first() {
        let f = fixture();
        let user = Uuid::new_v4();

        f.policy
            .credit(user, 5, TransactionSource::Manual, "manual grant", None)
            .await
            .unwrap();
        f.policy
            .debit(user, ActionType::Research, None, "deep research")
            .await
            .unwrap();

        let history = f.repos.ledger.history(user, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].tx_type, TransactionType::Debit);
        assert_eq!(history[1].tx_type, TransactionType::Credit);
    }
}

mod trial_account_tests {
    use super::*;
    use uuid::Uuid;

    // =========================================================================
    // Test accounts always pass authorization at zero cost
    // =========================================================================
    #[tokio::test]
    async fn test_trial_account_always_authorized() {
        let f = fixture();
        let user = Uuid::new_v4();
        f.repos.accounts.set_kind(user, AccountKind::Test);

        let auth = f.policy.authorize(user, ActionType::Audit).await.unwrap();
        assert!(auth.can_proceed);
        assert!(auth.is_test_account);
        assert_eq!(auth.required_credits, 0);
    }

    // =========================================================================
    // Debits on test accounts never touch the balance row; they are recorded
    // as zero-amount trial ledger rows so usage remains visible
    // =========================================================================
    #[tokio::test]
    async fn test_trial_debit_is_zero_amount_ledger_row() {
        let f = fixture();
        let user = Uuid::new_v4();
        f.repos.accounts.set_kind(user, AccountKind::Test);

        let receipt = f
            .policy
            .debit(user, ActionType::Audit, None, "demo audit")
            .await
            .unwrap();

        assert_eq!(receipt.kind, DebitKind::Trial);
        assert_eq!(receipt.new_balance, 0);

        let entries = f.repos.ledger.all();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source, TransactionSource::Trial);
        assert_eq!(entries[0].amount, 0);
        assert_eq!(entries[0].balance_after, 0);

        // No balance row was ever created.
        assert!(f.repos.balances.fetch(user).await.unwrap().is_none());
    }
}

mod settlement_tests {
    use super::*;
    use crate::error::CreditsError;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use hmac::{Hmac, Mac};
    use sha2::Sha256;
    use uuid::Uuid;

    fn stripe_header(timestamp: i64, payload: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(b"test_secret").unwrap();
        mac.update(format!("{timestamp}.{payload}").as_bytes());
        format!(
            "t={timestamp},v1={}",
            hex::encode(mac.finalize().into_bytes())
        )
    }

    fn stripe_success_payload(order_id: Uuid) -> String {
        format!(
            r#"{{"type":"payment_intent.succeeded","data":{{"object":{{"id":"pi_42","metadata":{{"order_id":"{order_id}"}}}}}}}}"#
        )
    }

    // =========================================================================
    // Successful payment completes the order and grants the package credits
    // =========================================================================
    #[tokio::test]
    async fn test_stripe_success_fulfills_order() {
        let f = fixture();
        let user = Uuid::new_v4();
        let created = f
            .orders
            .create_credits_order(user, "starter", crate::models::PaymentProvider::Stripe)
            .await
            .unwrap();

        let payload = stripe_success_payload(created.order.id);
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        let result = f
            .settlement
            .process_stripe(&payload, &stripe_header(now, &payload))
            .await
            .unwrap();

        assert_eq!(
            result,
            Settlement::Fulfilled {
                order_id: created.order.id
            }
        );

        let balance = f.repos.balances.fetch(user).await.unwrap().unwrap();
        assert_eq!(balance.balance, 20);

        let order = f.orders.find(created.order.id).await.unwrap();
        assert_eq!(order.status, crate::models::OrderStatus::Completed);
        assert_eq!(order.provider_payment_id.as_deref(), Some("pi_42"));
        assert!(order.completed_at.is_some());

        let purchase = &f.repos.ledger.all()[0];
        assert_eq!(purchase.related_order_id, Some(created.order.id));
    }

    // =========================================================================
    // Replaying the same delivery changes nothing: the second call reports
    // already-processed and the balance stays put
    // =========================================================================
    #[tokio::test]
    async fn test_duplicate_delivery_is_idempotent() {
        let f = fixture();
        let user = Uuid::new_v4();
        let created = f
            .orders
            .create_credits_order(user, "starter", crate::models::PaymentProvider::Stripe)
            .await
            .unwrap();

        let payload = stripe_success_payload(created.order.id);
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        let header = stripe_header(now, &payload);

        let first = f.settlement.process_stripe(&payload, &header).await.unwrap();
        let second = f.settlement.process_stripe(&payload, &header).await.unwrap();

        assert_eq!(
            first,
            Settlement::Fulfilled {
                order_id: created.order.id
            }
        );
        assert_eq!(
            second,
            Settlement::AlreadyProcessed {
                order_id: created.order.id
            }
        );

        let balance = f.repos.balances.fetch(user).await.unwrap().unwrap();
        assert_eq!(balance.balance, 20, "credits granted exactly once");
        assert_eq!(f.repos.ledger.all().len(), 1);
    }

    // =========================================================================
    // A bad signature is rejected before any state is read or written
    // =========================================================================
    #[tokio::test]
    async fn test_bad_signature_changes_nothing() {
        let f = fixture();
        let user = Uuid::new_v4();
        let created = f
            .orders
            .create_credits_order(user, "starter", crate::models::PaymentProvider::Stripe)
            .await
            .unwrap();

        let payload = stripe_success_payload(created.order.id);
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        let err = f
            .settlement
            .process_stripe(&payload, &format!("t={now},v1=deadbeef"))
            .await
            .unwrap_err();

        assert!(matches!(err, CreditsError::WebhookSignatureInvalid));
        let order = f.orders.find(created.order.id).await.unwrap();
        assert_eq!(order.status, crate::models::OrderStatus::Pending);
        assert!(f.repos.balances.fetch(user).await.unwrap().is_none());
    }

    // =========================================================================
    // An event for an unknown order is an error, not a silent ack
    // =========================================================================
    #[tokio::test]
    async fn test_unknown_order_is_reported() {
        let f = fixture();
        let payload = stripe_success_payload(Uuid::new_v4());
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        let err = f
            .settlement
            .process_stripe(&payload, &stripe_header(now, &payload))
            .await
            .unwrap_err();
        assert!(matches!(err, CreditsError::OrderNotFound(_)));
    }

    // =========================================================================
    // Failure events move pending orders to failed, once
    // =========================================================================
    #[tokio::test]
    async fn test_failure_marks_order_failed() {
        let f = fixture();
        let user = Uuid::new_v4();
        let created = f
            .orders
            .create_credits_order(user, "growth", crate::models::PaymentProvider::Stripe)
            .await
            .unwrap();

        let payload = format!(
            r#"{{"type":"payment_intent.payment_failed","data":{{"object":{{"id":"pi_9","metadata":{{"order_id":"{}"}}}}}}}}"#,
            created.order.id
        );
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        let header = stripe_header(now, &payload);

        let first = f.settlement.process_stripe(&payload, &header).await.unwrap();
        let second = f.settlement.process_stripe(&payload, &header).await.unwrap();

        assert_eq!(
            first,
            Settlement::MarkedFailed {
                order_id: created.order.id
            }
        );
        assert_eq!(
            second,
            Settlement::AlreadyProcessed {
                order_id: created.order.id
            }
        );
        assert!(f.repos.balances.fetch(user).await.unwrap().is_none());
    }

    // =========================================================================
    // LiqPay subscription callback activates the plan with the right window
    // =========================================================================
    #[tokio::test]
    async fn test_liqpay_subscribe_activates_plan() {
        let f = fixture();
        let user = Uuid::new_v4();
        let created = f
            .orders
            .create_subscription_order(user, "pro_monthly", crate::models::PaymentProvider::Liqpay)
            .await
            .unwrap();

        let data = BASE64.encode(format!(
            r#"{{"order_id":"{}","payment_id":555,"status":"subscribed","action":"subscribe"}}"#,
            created.order.id
        ));
        let signature = crate::providers::liqpay_signature("priv", &data);

        let result = f.settlement.process_liqpay(&data, &signature).await.unwrap();
        assert_eq!(
            result,
            Settlement::Fulfilled {
                order_id: created.order.id
            }
        );

        let sub = f
            .repos
            .subscriptions
            .find_current(user)
            .await
            .unwrap()
            .expect("subscription should exist");
        assert_eq!(sub.daily_limit, 10);
        assert_eq!(sub.subscription_type, "pro_monthly");
        assert!(sub.end_date > sub.start_date);
    }

    // =========================================================================
    // Cancellation flips the status but keeps the paid-through window
    // =========================================================================
    #[tokio::test]
    async fn test_liqpay_unsubscribe_keeps_end_date() {
        let f = fixture();
        let user = Uuid::new_v4();
        let created = f
            .orders
            .create_subscription_order(user, "pro_monthly", crate::models::PaymentProvider::Liqpay)
            .await
            .unwrap();

        let confirm = BASE64.encode(format!(
            r#"{{"order_id":"{}","payment_id":555,"status":"subscribed","action":"subscribe"}}"#,
            created.order.id
        ));
        let sig = crate::providers::liqpay_signature("priv", &confirm);
        f.settlement.process_liqpay(&confirm, &sig).await.unwrap();

        let before = f
            .repos
            .subscriptions
            .find_current(user)
            .await
            .unwrap()
            .unwrap();

        let cancel = BASE64.encode(format!(
            r#"{{"order_id":"{}","payment_id":555,"status":"unsubscribed","action":"subscribe"}}"#,
            created.order.id
        ));
        let sig = crate::providers::liqpay_signature("priv", &cancel);
        let result = f.settlement.process_liqpay(&cancel, &sig).await.unwrap();
        assert_eq!(result, Settlement::Acknowledged);

        let after = f
            .repos
            .subscriptions
            .find_current(user)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.status, crate::models::SubscriptionStatus::Cancelled);
        assert_eq!(after.end_date, before.end_date);
    }
}

mod daily_limit_tests {
    use super::*;
    use time::{Duration, OffsetDateTime};
    use uuid::Uuid;

    async fn activate(f: &Fixture, user: Uuid, daily_limit: i64) {
        let start = OffsetDateTime::now_utc();
        f.repos
            .subscriptions
            .upsert_active(NewSubscription {
                user_id: user,
                subscription_type: "pro_monthly".to_string(),
                start_date: start,
                end_date: start + Duration::days(30),
                daily_limit,
                external_subscription_id: None,
            })
            .await
            .unwrap();
    }

    // =========================================================================
    // No subscription: check reports no allowance
    // =========================================================================
    #[tokio::test]
    async fn test_no_subscription_no_allowance() {
        let f = fixture();
        let check = f.daily_limit.check(Uuid::new_v4()).await.unwrap();
        assert!(!check.has_subscription);
        assert!(!check.can_proceed);
    }

    // =========================================================================
    // Consuming the full limit stops further consumption
    // =========================================================================
    #[tokio::test]
    async fn test_limit_exhaustion() {
        let f = fixture();
        let user = Uuid::new_v4();
        activate(&f, user, 3).await;

        for i in 1..=3 {
            let check = f.daily_limit.consume(user).await.unwrap();
            assert!(check.can_proceed, "consumption {i} should pass");
            assert_eq!(check.used_today, i);
        }

        let exhausted = f.daily_limit.consume(user).await.unwrap();
        assert!(!exhausted.can_proceed);
        assert_eq!(exhausted.remaining, 0);
        assert_eq!(exhausted.used_today, 3);
    }

    // =========================================================================
    // 10 parallel consumptions against limit 5: exactly 5 win
    // =========================================================================
    #[tokio::test]
    async fn test_parallel_consumption_respects_limit() {
        let f = fixture();
        let user = Uuid::new_v4();
        activate(&f, user, 5).await;

        let checker = Arc::new(DailyLimitChecker::new(
            f.repos.subscriptions.clone(),
            f.repos.usage.clone(),
        ));
        let barrier = Arc::new(tokio::sync::Barrier::new(10));
        let mut handles = Vec::new();
        for _ in 0..10 {
            let checker = checker.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                checker.consume(user).await.unwrap().can_proceed
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 5);
    }

    // =========================================================================
    // An expired subscription grants nothing even while status is active
    // =========================================================================
    #[tokio::test]
    async fn test_expired_subscription_grants_nothing() {
        let f = fixture();
        let user = Uuid::new_v4();
        let start = OffsetDateTime::now_utc() - Duration::days(60);
        f.repos
            .subscriptions
            .upsert_active(NewSubscription {
                user_id: user,
                subscription_type: "pro_monthly".to_string(),
                start_date: start,
                end_date: start + Duration::days(30),
                daily_limit: 10,
                external_subscription_id: None,
            })
            .await
            .unwrap();

        let check = f.daily_limit.check(user).await.unwrap();
        assert!(!check.has_subscription);
    }
}

mod reconciliation_tests {
    use super::*;
    use crate::models::{NewReconciliation, ReconciliationStatus};
    use uuid::Uuid;

    // =========================================================================
    // A deferred debit settles once the balance can absorb it, with a
    // matching ledger row
    // =========================================================================
    #[tokio::test]
    async fn test_deferred_debit_settles() {
        let f = fixture();
        let user = Uuid::new_v4();
        f.repos.balances.seed(user, 5, false);
        f.repos
            .reconciliation
            .record(NewReconciliation {
                user_id: user,
                action_type: ActionType::Audit,
                amount: 2,
                related_audit_id: None,
                description: "full audit".to_string(),
            })
            .await
            .unwrap();

        let report = f.reconciliation.retry_due().await.unwrap();
        assert_eq!(report.settled, 1);

        let balance = f.repos.balances.fetch(user).await.unwrap().unwrap();
        assert_eq!(balance.balance, 3);

        let entries = f.repos.reconciliation.all();
        assert_eq!(entries[0].status, ReconciliationStatus::Settled);
        assert_eq!(f.repos.ledger.all().len(), 1);
    }

    // =========================================================================
    // Insufficient balance leaves the entry pending with a bumped attempt count
    // =========================================================================
    #[tokio::test]
    async fn test_insufficient_balance_defers_again() {
        let f = fixture();
        let user = Uuid::new_v4();
        f.repos.balances.seed(user, -1, true);
        f.repos
            .reconciliation
            .record(NewReconciliation {
                user_id: user,
                action_type: ActionType::Research,
                amount: 1,
                related_audit_id: None,
                description: "deep research".to_string(),
            })
            .await
            .unwrap();

        let report = f.reconciliation.retry_due().await.unwrap();
        assert_eq!(report.settled, 0);
        assert_eq!(report.deferred, 1);

        let entries = f.repos.reconciliation.all();
        assert_eq!(entries[0].status, ReconciliationStatus::Pending);
        assert_eq!(entries[0].attempts, 1);
    }
}
