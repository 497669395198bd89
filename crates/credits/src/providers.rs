//! Payment provider adapters
//!
//! Verifies inbound webhook notifications from Stripe and LiqPay and
//! normalizes them into a provider-agnostic [`ProviderEvent`] before any
//! settlement logic runs. Verification failures never touch storage.
//!
//! Stripe signs with HMAC-SHA256 over `"{timestamp}.{payload}"` and sends the
//! result in the `Stripe-Signature` header. LiqPay sends a base64 JSON blob
//! plus `base64(sha1(private_key + data + private_key))`.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha1::{Digest, Sha1};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::error::{CreditsError, CreditsResult};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a Stripe signature timestamp before the event is rejected
/// as a possible replay.
const STRIPE_SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// What a verified provider notification says happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    Succeeded,
    Failed,
    Pending,
    SubscriptionConfirmed,
    SubscriptionCancelled,
}

/// Canonical, provider-independent form of a verified webhook event.
#[derive(Debug, Clone)]
pub struct ProviderEvent {
    pub order_id: Uuid,
    pub outcome: PaymentOutcome,
    pub provider_payment_id: Option<String>,
}

#[derive(Clone)]
pub struct ProviderConfig {
    pub stripe_webhook_secret: String,
    pub liqpay_public_key: String,
    pub liqpay_private_key: String,
    pub checkout_result_url: String,
    pub checkout_server_url: String,
}

impl ProviderConfig {
    pub fn from_env() -> CreditsResult<Self> {
        let var = |name: &str| {
            std::env::var(name)
                .map_err(|_| CreditsError::Configuration(format!("{name} must be set")))
        };
        Ok(Self {
            stripe_webhook_secret: var("STRIPE_WEBHOOK_SECRET")?,
            liqpay_public_key: var("LIQPAY_PUBLIC_KEY")?,
            liqpay_private_key: var("LIQPAY_PRIVATE_KEY")?,
            checkout_result_url: var("CHECKOUT_RESULT_URL")?,
            checkout_server_url: var("CHECKOUT_SERVER_URL")?,
        })
    }
}

// ---------------- Stripe ----------------

#[derive(Debug, Deserialize)]
struct StripeEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: Value,
}

#[derive(Debug, Deserialize)]
struct StripePaymentIntent {
    id: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

/// Verify `Stripe-Signature` against the raw request body and extract the
/// canonical event. The payload is only parsed after the HMAC checks out.
pub fn verify_stripe_event(
    config: &ProviderConfig,
    payload: &str,
    signature_header: &str,
) -> CreditsResult<ProviderEvent> {
    let (timestamp, signatures) = parse_stripe_signature_header(signature_header)?;

    let now = time::OffsetDateTime::now_utc().unix_timestamp();
    if (now - timestamp).abs() > STRIPE_SIGNATURE_TOLERANCE_SECS {
        return Err(CreditsError::WebhookSignatureInvalid);
    }

    // Dashboard-copied secrets carry a whsec_ prefix; the HMAC key is the rest.
    let secret = config
        .stripe_webhook_secret
        .strip_prefix("whsec_")
        .unwrap_or(&config.stripe_webhook_secret);

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| CreditsError::Configuration("invalid Stripe webhook secret".to_string()))?;
    mac.update(format!("{timestamp}.{payload}").as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    let valid = signatures
        .iter()
        .any(|sig| sig.as_bytes().ct_eq(expected.as_bytes()).into());
    if !valid {
        return Err(CreditsError::WebhookSignatureInvalid);
    }

    parse_stripe_payload(payload)
}

fn parse_stripe_signature_header(header: &str) -> CreditsResult<(i64, Vec<String>)> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(value.parse::<i64>().map_err(|_| {
                    CreditsError::MalformedPayload("non-numeric signature timestamp".to_string())
                })?);
            }
            Some(("v1", value)) => signatures.push(value.to_string()),
            _ => {}
        }
    }

    match (timestamp, signatures.is_empty()) {
        (Some(t), false) => Ok((t, signatures)),
        _ => Err(CreditsError::WebhookSignatureInvalid),
    }
}

fn parse_stripe_payload(payload: &str) -> CreditsResult<ProviderEvent> {
    let envelope: StripeEnvelope = serde_json::from_str(payload)
        .map_err(|e| CreditsError::MalformedPayload(format!("stripe envelope: {e}")))?;

    let outcome = match envelope.event_type.as_str() {
        "payment_intent.succeeded" => PaymentOutcome::Succeeded,
        "payment_intent.payment_failed" | "payment_intent.canceled" => PaymentOutcome::Failed,
        "invoice.payment_succeeded" => PaymentOutcome::SubscriptionConfirmed,
        "customer.subscription.deleted" => PaymentOutcome::SubscriptionCancelled,
        other => {
            tracing::debug!(event_type = other, "Ignoring unhandled Stripe event type");
            PaymentOutcome::Pending
        }
    };

    let intent: StripePaymentIntent = serde_json::from_value(envelope.data.object)
        .map_err(|e| CreditsError::MalformedPayload(format!("stripe object: {e}")))?;

    let order_id = intent
        .metadata
        .get("order_id")
        .ok_or_else(|| CreditsError::MalformedPayload("missing order_id metadata".to_string()))?;
    let order_id = Uuid::parse_str(order_id)
        .map_err(|_| CreditsError::MalformedPayload("order_id is not a UUID".to_string()))?;

    Ok(ProviderEvent {
        order_id,
        outcome,
        provider_payment_id: Some(intent.id),
    })
}

// ---------------- LiqPay ----------------

#[derive(Debug, Deserialize)]
struct LiqpayCallback {
    order_id: String,
    #[serde(default)]
    payment_id: Option<Value>,
    status: String,
    #[serde(default)]
    action: Option<String>,
}

/// Compute the LiqPay request/callback signature for a base64 data blob.
pub fn liqpay_signature(private_key: &str, data: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(private_key.as_bytes());
    hasher.update(data.as_bytes());
    hasher.update(private_key.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Verify a LiqPay server callback and extract the canonical event.
pub fn verify_liqpay_event(
    config: &ProviderConfig,
    data: &str,
    signature: &str,
) -> CreditsResult<ProviderEvent> {
    let expected = liqpay_signature(&config.liqpay_private_key, data);
    if !bool::from(signature.as_bytes().ct_eq(expected.as_bytes())) {
        return Err(CreditsError::WebhookSignatureInvalid);
    }

    let decoded = BASE64
        .decode(data)
        .map_err(|e| CreditsError::MalformedPayload(format!("liqpay data base64: {e}")))?;
    let callback: LiqpayCallback = serde_json::from_slice(&decoded)
        .map_err(|e| CreditsError::MalformedPayload(format!("liqpay data json: {e}")))?;

    let order_id = Uuid::parse_str(&callback.order_id)
        .map_err(|_| CreditsError::MalformedPayload("order_id is not a UUID".to_string()))?;

    let outcome = match callback.action.as_deref() {
        Some("subscribe") => match callback.status.as_str() {
            "subscribed" | "success" => PaymentOutcome::SubscriptionConfirmed,
            "unsubscribed" => PaymentOutcome::SubscriptionCancelled,
            "failure" | "error" => PaymentOutcome::Failed,
            _ => PaymentOutcome::Pending,
        },
        _ => match callback.status.as_str() {
            // sandbox counts as success so staging flows settle end to end
            "success" | "sandbox" => PaymentOutcome::Succeeded,
            "failure" | "error" | "reversed" => PaymentOutcome::Failed,
            _ => PaymentOutcome::Pending,
        },
    };

    let provider_payment_id = callback.payment_id.map(|v| match v {
        Value::String(s) => s,
        other => other.to_string(),
    });

    Ok(ProviderEvent {
        order_id,
        outcome,
        provider_payment_id,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config() -> ProviderConfig {
        ProviderConfig {
            stripe_webhook_secret: "whsec_test_secret".to_string(),
            liqpay_public_key: "pub".to_string(),
            liqpay_private_key: "priv".to_string(),
            checkout_result_url: "https://app.example.com/billing/result".to_string(),
            checkout_server_url: "https://api.example.com/webhook/liqpay".to_string(),
        }
    }

    fn sign_stripe(secret: &str, timestamp: i64, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.{payload}").as_bytes());
        format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn stripe_payload(order_id: Uuid) -> String {
        format!(
            r#"{{"type":"payment_intent.succeeded","data":{{"object":{{"id":"pi_123","metadata":{{"order_id":"{order_id}"}}}}}}}}"#
        )
    }

    #[test]
    fn stripe_valid_signature_accepted() {
        let cfg = config();
        let order_id = Uuid::new_v4();
        let payload = stripe_payload(order_id);
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        let header = sign_stripe("test_secret", now, &payload);

        let event = verify_stripe_event(&cfg, &payload, &header).unwrap();
        assert_eq!(event.order_id, order_id);
        assert_eq!(event.outcome, PaymentOutcome::Succeeded);
        assert_eq!(event.provider_payment_id.as_deref(), Some("pi_123"));
    }

    #[test]
    fn stripe_bad_signature_rejected() {
        let cfg = config();
        let payload = stripe_payload(Uuid::new_v4());
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        let header = sign_stripe("wrong_secret", now, &payload);

        assert!(matches!(
            verify_stripe_event(&cfg, &payload, &header),
            Err(CreditsError::WebhookSignatureInvalid)
        ));
    }

    #[test]
    fn stripe_stale_timestamp_rejected() {
        let cfg = config();
        let payload = stripe_payload(Uuid::new_v4());
        let stale = time::OffsetDateTime::now_utc().unix_timestamp() - 3600;
        let header = sign_stripe("test_secret", stale, &payload);

        assert!(matches!(
            verify_stripe_event(&cfg, &payload, &header),
            Err(CreditsError::WebhookSignatureInvalid)
        ));
    }

    #[test]
    fn stripe_missing_order_id_is_malformed() {
        let cfg = config();
        let payload =
            r#"{"type":"payment_intent.succeeded","data":{"object":{"id":"pi_1","metadata":{}}}}"#;
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        let header = sign_stripe("test_secret", now, payload);

        assert!(matches!(
            verify_stripe_event(&cfg, payload, &header),
            Err(CreditsError::MalformedPayload(_))
        ));
    }

    fn liqpay_data(order_id: Uuid, status: &str, action: &str) -> String {
        BASE64.encode(format!(
            r#"{{"order_id":"{order_id}","payment_id":998877,"status":"{status}","action":"{action}"}}"#
        ))
    }

    #[test]
    fn liqpay_valid_callback_accepted() {
        let cfg = config();
        let order_id = Uuid::new_v4();
        let data = liqpay_data(order_id, "success", "pay");
        let signature = liqpay_signature(&cfg.liqpay_private_key, &data);

        let event = verify_liqpay_event(&cfg, &data, &signature).unwrap();
        assert_eq!(event.order_id, order_id);
        assert_eq!(event.outcome, PaymentOutcome::Succeeded);
        assert_eq!(event.provider_payment_id.as_deref(), Some("998877"));
    }

    #[test]
    fn liqpay_sandbox_counts_as_success() {
        let cfg = config();
        let data = liqpay_data(Uuid::new_v4(), "sandbox", "pay");
        let signature = liqpay_signature(&cfg.liqpay_private_key, &data);
        let event = verify_liqpay_event(&cfg, &data, &signature).unwrap();
        assert_eq!(event.outcome, PaymentOutcome::Succeeded);
    }

    #[test]
    fn liqpay_tampered_data_rejected() {
        let cfg = config();
        let data = liqpay_data(Uuid::new_v4(), "success", "pay");
        let signature = liqpay_signature(&cfg.liqpay_private_key, &data);
        let tampered = liqpay_data(Uuid::new_v4(), "success", "pay");

        assert!(matches!(
            verify_liqpay_event(&cfg, &tampered, &signature),
            Err(CreditsError::WebhookSignatureInvalid)
        ));
    }

    #[test]
    fn liqpay_subscribe_statuses_map_to_subscription_outcomes() {
        let cfg = config();
        for (status, expected) in [
            ("subscribed", PaymentOutcome::SubscriptionConfirmed),
            ("unsubscribed", PaymentOutcome::SubscriptionCancelled),
            ("failure", PaymentOutcome::Failed),
        ] {
            let data = liqpay_data(Uuid::new_v4(), status, "subscribe");
            let signature = liqpay_signature(&cfg.liqpay_private_key, &data);
            let event = verify_liqpay_event(&cfg, &data, &signature).unwrap();
            assert_eq!(event.outcome, expected, "status {status}");
        }
    }
}
