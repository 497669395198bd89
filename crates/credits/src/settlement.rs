//! Webhook settlement
//!
//! Turns verified provider events into order state transitions and their
//! fulfillment side effects. Idempotency hinges on the order repository's
//! conditional `pending -> completed` claim: only the request that wins the
//! transition fulfills; every replay sees a non-pending order and reports
//! already-processed without touching anything else.

use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::{CreditsError, CreditsResult};
use crate::models::{NewSubscription, OrderType, PaymentOrder, TransactionSource};
use crate::orders::PaymentOrderManager;
use crate::policy::CreditPolicy;
use crate::pricing;
use crate::providers::{self, PaymentOutcome, ProviderConfig, ProviderEvent};
use crate::repo::SubscriptionRepository;

/// Outcome of settling one webhook delivery, reported back to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// This delivery won the pending claim and fulfillment ran.
    Fulfilled { order_id: Uuid },
    /// The order had already left `pending`; nothing changed.
    AlreadyProcessed { order_id: Uuid },
    /// This delivery moved the order to `failed`.
    MarkedFailed { order_id: Uuid },
    /// Informational event, no order transition.
    Acknowledged,
}

pub struct SettlementProcessor {
    orders: Arc<PaymentOrderManager>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    policy: Arc<CreditPolicy>,
    config: ProviderConfig,
}

impl SettlementProcessor {
    pub fn new(
        orders: Arc<PaymentOrderManager>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        policy: Arc<CreditPolicy>,
        config: ProviderConfig,
    ) -> Self {
        Self {
            orders,
            subscriptions,
            policy,
            config,
        }
    }

    /// Verify and settle a Stripe webhook delivery.
    pub async fn process_stripe(
        &self,
        payload: &str,
        signature_header: &str,
    ) -> CreditsResult<Settlement> {
        let event = providers::verify_stripe_event(&self.config, payload, signature_header)?;
        self.settle(event).await
    }

    /// Verify and settle a LiqPay server callback.
    pub async fn process_liqpay(&self, data: &str, signature: &str) -> CreditsResult<Settlement> {
        let event = providers::verify_liqpay_event(&self.config, data, signature)?;
        self.settle(event).await
    }

    async fn settle(&self, event: ProviderEvent) -> CreditsResult<Settlement> {
        let order = self.orders.find(event.order_id).await?;

        match event.outcome {
            PaymentOutcome::Succeeded | PaymentOutcome::SubscriptionConfirmed => {
                self.settle_success(&order, &event).await
            }
            PaymentOutcome::Failed => {
                let moved = self
                    .orders
                    .mark_failed(order.id, event.provider_payment_id.as_deref())
                    .await?;
                if moved {
                    tracing::info!(order_id = %order.id, "Payment order marked failed");
                    Ok(Settlement::MarkedFailed { order_id: order.id })
                } else {
                    Ok(Settlement::AlreadyProcessed { order_id: order.id })
                }
            }
            PaymentOutcome::Pending => Ok(Settlement::Acknowledged),
            PaymentOutcome::SubscriptionCancelled => {
                // Access runs until the paid-through date; only the status flips.
                self.subscriptions.cancel(order.user_id).await?;
                tracing::info!(user_id = %order.user_id, "Subscription cancelled via webhook");
                Ok(Settlement::Acknowledged)
            }
        }
    }

    async fn settle_success(
        &self,
        order: &PaymentOrder,
        event: &ProviderEvent,
    ) -> CreditsResult<Settlement> {
        let Some(claimed) = self
            .orders
            .claim_completed(order.id, event.provider_payment_id.as_deref())
            .await?
        else {
            tracing::info!(order_id = %order.id, "Duplicate settlement delivery ignored");
            return Ok(Settlement::AlreadyProcessed { order_id: order.id });
        };

        if let Err(e) = self.fulfill(&claimed, event).await {
            // Order is completed but the user got nothing. Manual follow-up
            // against this log line is the recovery path.
            tracing::error!(
                order_id = %claimed.id,
                user_id = %claimed.user_id,
                error = %e,
                "RECONCILIATION NEEDED: order completed but fulfillment failed"
            );
            return Err(e);
        }

        Ok(Settlement::Fulfilled { order_id: claimed.id })
    }

    async fn fulfill(&self, order: &PaymentOrder, event: &ProviderEvent) -> CreditsResult<()> {
        match order.order_type {
            OrderType::Credits => {
                let package_id = order.package_id.as_deref().ok_or_else(|| {
                    CreditsError::MalformedPayload("credits order without package_id".to_string())
                })?;
                let package = pricing::package(package_id)?;
                self.policy
                    .credit(
                        order.user_id,
                        package.credits,
                        TransactionSource::Purchase,
                        package.description,
                        Some(order.id),
                    )
                    .await?;
                tracing::info!(
                    order_id = %order.id,
                    user_id = %order.user_id,
                    credits = package.credits,
                    "Credit purchase fulfilled"
                );
            }
            OrderType::Subscription => {
                let plan_id = order.plan_id.as_deref().ok_or_else(|| {
                    CreditsError::MalformedPayload(
                        "subscription order without plan_id".to_string(),
                    )
                })?;
                let plan = pricing::plan(plan_id)?;
                let start = OffsetDateTime::now_utc();
                self.subscriptions
                    .upsert_active(NewSubscription {
                        user_id: order.user_id,
                        subscription_type: plan.id.to_string(),
                        start_date: start,
                        end_date: start + Duration::days(plan.billing_days),
                        daily_limit: plan.daily_limit,
                        external_subscription_id: event.provider_payment_id.clone(),
                    })
                    .await?;
                tracing::info!(
                    order_id = %order.id,
                    user_id = %order.user_id,
                    plan_id = plan.id,
                    "Subscription activated"
                );
            }
        }
        Ok(())
    }
}
