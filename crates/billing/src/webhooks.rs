//! Stripe webhook handling
//!
//! Verifies the `Stripe-Signature` header with async-stripe's verifier, falling
//! back to a manual HMAC-SHA256 check over `"{timestamp}.{payload}"` that
//! accepts any of several `v1` entries, and classifies the subscription
//! lifecycle events the simulations produce.

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use stripe::WebhookError;

use crate::error::{BillingError, BillingResult};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed delivery, in seconds
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Minimal event envelope; the payload object is kept as raw JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub created: Option<i64>,
    pub data: WebhookEventData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEventData {
    pub object: serde_json::Value,
}

/// What the receiver does with an event type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
    /// Acknowledged without logging the payload
    Ignored,
    /// Subscription or schedule change; the object is logged
    Logged,
    Unhandled,
}

impl EventDisposition {
    pub fn for_event_type(event_type: &str) -> Self {
        match event_type {
            "payment_intent.succeeded" => EventDisposition::Ignored,
            "customer.subscription.updated"
            | "customer.subscription.deleted"
            | "subscription_schedule.created"
            | "subscription_schedule.updated"
            | "subscription_schedule.canceled"
            | "subscription_schedule.released" => EventDisposition::Logged,
            _ => EventDisposition::Unhandled,
        }
    }
}

/// Parsed `t=..,v1=..` header
#[derive(Debug)]
struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<String>,
}

impl SignatureHeader {
    fn parse(header: &str) -> BillingResult<Self> {
        let mut timestamp: Option<i64> = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse().ok(),
                Some(("v1", value)) => signatures.push(value.to_string()),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            tracing::warn!("Missing timestamp in signature header");
            BillingError::WebhookSignatureInvalid
        })?;

        if signatures.is_empty() {
            tracing::warn!("Missing v1 signature in signature header");
            return Err(BillingError::WebhookSignatureInvalid);
        }

        Ok(Self {
            timestamp,
            signatures,
        })
    }
}

/// Verifies webhook deliveries against one endpoint secret
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Verify and parse a webhook delivery
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<WebhookEvent> {
        self.verify_event_at(payload, signature, Utc::now().timestamp())
    }

    /// Verify against an explicit current time (unix seconds)
    pub fn verify_event_at(
        &self,
        payload: &str,
        signature: &str,
        now: i64,
    ) -> BillingResult<WebhookEvent> {
        // The typed event is dropped; the lean envelope keeps unknown shapes.
        match stripe::Webhook::construct_event_with_timestamp(payload, signature, &self.secret, now)
        {
            Ok(_) | Err(WebhookError::BadParse(_)) => return Self::parse_event(payload),
            Err(WebhookError::BadTimestamp(timestamp)) => {
                tracing::warn!(timestamp, now, "Webhook timestamp outside tolerance");
                return Err(BillingError::WebhookSignatureInvalid);
            }
            Err(WebhookError::BadKey) => {
                return Err(BillingError::Config("Invalid webhook secret".to_string()));
            }
            Err(e) => {
                tracing::debug!(error = %e, "Falling back to manual signature check");
            }
        }

        let header = SignatureHeader::parse(signature)?;

        if (now - header.timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            tracing::warn!(
                timestamp = header.timestamp,
                now = now,
                "Webhook timestamp outside tolerance"
            );
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let signed_payload = format!("{}.{}", header.timestamp, payload);
        let matched = header.signatures.iter().any(|candidate| {
            let Ok(expected) = hex::decode(candidate) else {
                return false;
            };
            self.mac_for(&signed_payload)
                .map(|mac| mac.verify_slice(&expected).is_ok())
                .unwrap_or(false)
        });

        if !matched {
            tracing::warn!("Webhook signature mismatch");
            return Err(BillingError::WebhookSignatureInvalid);
        }

        Self::parse_event(payload)
    }

    fn parse_event(payload: &str) -> BillingResult<WebhookEvent> {
        serde_json::from_str(payload).map_err(|e| BillingError::WebhookPayload(e.to_string()))
    }

    /// Produce a header value for `payload`, as the platform would.
    pub fn sign(&self, payload: &str, timestamp: i64) -> BillingResult<String> {
        let mac = self.mac_for(&format!("{}.{}", timestamp, payload))?;
        Ok(format!(
            "t={},v1={}",
            timestamp,
            hex::encode(mac.finalize().into_bytes())
        ))
    }

    fn mac_for(&self, signed_payload: &str) -> BillingResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| BillingError::Config("Invalid webhook secret".to_string()))?;
        mac.update(signed_payload.as_bytes());
        Ok(mac)
    }
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier").finish_non_exhaustive()
    }
}

/// Log a verified event according to its disposition.
pub fn log_event(event: &WebhookEvent) -> EventDisposition {
    let disposition = EventDisposition::for_event_type(&event.type_);
    tracing::info!(event_type = %event.type_, event_id = %event.id, "Webhook event received");

    match disposition {
        EventDisposition::Ignored => {}
        EventDisposition::Logged => {
            tracing::info!(
                event_type = %event.type_,
                object = %event.data.object,
                "Subscription event data"
            );
        }
        EventDisposition::Unhandled => {
            tracing::info!(event_type = %event.type_, "Unhandled event type");
        }
    }

    disposition
}
