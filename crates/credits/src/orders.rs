//! Payment order lifecycle
//!
//! Creates `pending` orders and the provider-specific checkout payload the
//! frontend needs to open the payment page. The manager never calls provider
//! APIs server to server; settlement happens when the provider's webhook
//! arrives.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::{CreditsError, CreditsResult};
use crate::models::{NewPaymentOrder, OrderType, PaymentOrder, PaymentProvider};
use crate::pricing;
use crate::providers::{liqpay_signature, ProviderConfig};
use crate::repo::OrderRepository;

/// What the frontend needs to open the provider's checkout page.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "provider")]
pub enum CheckoutPayload {
    #[serde(rename = "stripe")]
    Stripe {
        amount_cents: i64,
        currency: &'static str,
        description: String,
        metadata: serde_json::Value,
        success_url: String,
        cancel_url: String,
    },
    #[serde(rename = "liqpay")]
    Liqpay { data: String, signature: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedOrder {
    pub order: PaymentOrder,
    pub checkout: CheckoutPayload,
}

pub struct PaymentOrderManager {
    orders: Arc<dyn OrderRepository>,
    config: ProviderConfig,
}

impl PaymentOrderManager {
    pub fn new(orders: Arc<dyn OrderRepository>, config: ProviderConfig) -> Self {
        Self { orders, config }
    }

    /// Create a pending credit-package order.
    pub async fn create_credits_order(
        &self,
        user_id: Uuid,
        package_id: &str,
        provider: PaymentProvider,
    ) -> CreditsResult<CreatedOrder> {
        // Resolve pricing before any write so unknown ids leave no orphans.
        let package = pricing::package(package_id)?;
        let description = package.description.to_string();

        let order = self
            .orders
            .insert(NewPaymentOrder {
                user_id,
                order_type: OrderType::Credits,
                package_id: Some(package.id.to_string()),
                plan_id: None,
                amount_cents: package.price_cents,
                provider,
            })
            .await?;

        let checkout = self.checkout_payload(&order, &description, package.price_cents, false)?;

        tracing::info!(
            order_id = %order.id,
            user_id = %user_id,
            package_id = package.id,
            provider = provider.as_str(),
            "Payment order created"
        );

        Ok(CreatedOrder { order, checkout })
    }

    /// Create a pending subscription order.
    pub async fn create_subscription_order(
        &self,
        user_id: Uuid,
        plan_id: &str,
        provider: PaymentProvider,
    ) -> CreditsResult<CreatedOrder> {
        let plan = pricing::plan(plan_id)?;
        let description = plan.description.to_string();

        let order = self
            .orders
            .insert(NewPaymentOrder {
                user_id,
                order_type: OrderType::Subscription,
                package_id: None,
                plan_id: Some(plan.id.to_string()),
                amount_cents: plan.price_cents,
                provider,
            })
            .await?;

        let checkout = self.checkout_payload(&order, &description, plan.price_cents, true)?;

        tracing::info!(
            order_id = %order.id,
            user_id = %user_id,
            plan_id = plan.id,
            provider = provider.as_str(),
            "Subscription order created"
        );

        Ok(CreatedOrder { order, checkout })
    }

    pub async fn find(&self, order_id: Uuid) -> CreditsResult<PaymentOrder> {
        self.orders
            .find(order_id)
            .await?
            .ok_or(CreditsError::OrderNotFound(order_id))
    }

    /// Claim the `pending -> completed` transition. `None` means another
    /// delivery already settled this order.
    pub async fn claim_completed(
        &self,
        order_id: Uuid,
        provider_payment_id: Option<&str>,
    ) -> CreditsResult<Option<PaymentOrder>> {
        self.orders.try_complete(order_id, provider_payment_id).await
    }

    /// Move a pending order to `failed`. False when the order had already
    /// left `pending`.
    pub async fn mark_failed(
        &self,
        order_id: Uuid,
        provider_payment_id: Option<&str>,
    ) -> CreditsResult<bool> {
        self.orders.try_fail(order_id, provider_payment_id).await
    }

    fn checkout_payload(
        &self,
        order: &PaymentOrder,
        description: &str,
        amount_cents: i64,
        subscription: bool,
    ) -> CreditsResult<CheckoutPayload> {
        match order.provider {
            PaymentProvider::Stripe => Ok(CheckoutPayload::Stripe {
                amount_cents,
                currency: "usd",
                description: description.to_string(),
                metadata: json!({
                    "order_id": order.id.to_string(),
                    "user_id": order.user_id.to_string(),
                }),
                success_url: format!(
                    "{}?order={}&status=success",
                    self.config.checkout_result_url, order.id
                ),
                cancel_url: format!(
                    "{}?order={}&status=canceled",
                    self.config.checkout_result_url, order.id
                ),
            }),
            PaymentProvider::Liqpay => {
                // LiqPay takes the amount in currency units, not cents.
                let amount = amount_cents as f64 / 100.0;
                let request = json!({
                    "version": 3,
                    "public_key": self.config.liqpay_public_key,
                    "action": if subscription { "subscribe" } else { "pay" },
                    "amount": amount,
                    "currency": "USD",
                    "description": description,
                    "order_id": order.id.to_string(),
                    "result_url": self.config.checkout_result_url,
                    "server_url": self.config.checkout_server_url,
                });
                let data = BASE64.encode(
                    serde_json::to_vec(&request)
                        .map_err(|e| CreditsError::Configuration(e.to_string()))?,
                );
                let signature = liqpay_signature(&self.config.liqpay_private_key, &data);
                Ok(CheckoutPayload::Liqpay { data, signature })
            }
        }
    }
}
