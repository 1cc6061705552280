//! Stripe Webhook Handling
//!
//! Verifies the `stripe-signature` header and turns completed checkout
//! sessions into exactly one `purchase` ledger entry, however many times
//! Stripe delivers the event.

use std::collections::HashMap;
use std::sync::Arc;

use hmac::{Hmac, Mac};
use rexpet_core::{AuditEventType, Auditor, CoreError, CreditMutation, LedgerEntry, Store};
use serde::Deserialize;
use sha2::Sha256;
use uuid::Uuid;

use crate::error::{PaymentError, Result};
use crate::package::Package;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed delivery
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

/// Verify a Stripe signature header (`t=<unix>,v1=<hex>[,v1=<hex>]`).
///
/// The signed payload is `"{t}.{body}"`. Any one matching `v1` passes.
pub fn verify_signature(
    payload: &str,
    header: &str,
    secret: &str,
    now: i64,
    tolerance_secs: i64,
) -> Result<()> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| PaymentError::WebhookSignature("missing timestamp".into()))?;
    if signatures.is_empty() {
        return Err(PaymentError::WebhookSignature("missing v1 signature".into()));
    }
    if now.abs_diff(timestamp) > tolerance_secs.unsigned_abs() {
        return Err(PaymentError::WebhookSignature(
            "timestamp outside tolerance".into(),
        ));
    }

    let mac = signed_payload_mac(payload, secret, timestamp)?;
    let matched = signatures.iter().any(|candidate| {
        hex::decode(candidate)
            .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    });

    if matched {
        Ok(())
    } else {
        Err(PaymentError::WebhookSignature("signature mismatch".into()))
    }
}

/// Build a valid `stripe-signature` header for `payload`, as Stripe's own
/// SDKs do for webhook tests and local replays
pub fn signature_header(payload: &str, secret: &str, timestamp: i64) -> Result<String> {
    let mac = signed_payload_mac(payload, secret, timestamp)?;
    Ok(format!(
        "t={timestamp},v1={}",
        hex::encode(mac.finalize().into_bytes())
    ))
}

fn signed_payload_mac(payload: &str, secret: &str, timestamp: i64) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| PaymentError::Config(e.to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());
    Ok(mac)
}

/// The subset of a Stripe event this service reads
#[derive(Debug, Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CompletedSession {
    id: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

/// Credit grant carried in session metadata
#[derive(Clone, Debug, PartialEq, Eq)]
struct Grant {
    user_id: Uuid,
    credits: i64,
    package_id: String,
}

impl Grant {
    fn from_metadata(metadata: &HashMap<String, String>) -> Result<Self> {
        let user_id = metadata
            .get("user_id")
            .and_then(|v| Uuid::parse_str(v).ok())
            .ok_or_else(|| PaymentError::MissingMetadata("user_id".into()))?;
        let credits = metadata
            .get("credits")
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|c| (1..=Package::max_credits()).contains(c))
            .ok_or_else(|| PaymentError::MissingMetadata("credits".into()))?;
        let package_id = metadata
            .get("package_id")
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());

        Ok(Self {
            user_id,
            credits,
            package_id,
        })
    }
}

/// What a delivery amounted to; all variants are acknowledged with 200
#[derive(Clone, Debug, PartialEq)]
pub enum WebhookOutcome {
    /// Credits granted by this delivery
    Granted(LedgerEntry),

    /// The session was already credited
    AlreadyProcessed { session_id: String },

    /// Event type or order kind this service does not act on
    Ignored { event_type: String },
}

/// Webhook handler
#[derive(Clone)]
pub struct WebhookHandler {
    store: Arc<dyn Store>,
    auditor: Auditor,
    secret: String,
}

impl WebhookHandler {
    pub fn new(store: Arc<dyn Store>, secret: impl Into<String>) -> Self {
        Self {
            auditor: Auditor::new(store.clone()),
            store,
            secret: secret.into(),
        }
    }

    /// Verify, parse and apply one delivery
    pub async fn handle(&self, payload: &str, signature: Option<&str>) -> Result<WebhookOutcome> {
        let signature = signature
            .ok_or_else(|| PaymentError::WebhookSignature("missing stripe-signature".into()))?;
        verify_signature(
            payload,
            signature,
            &self.secret,
            chrono::Utc::now().timestamp(),
            SIGNATURE_TOLERANCE_SECS,
        )?;

        let event: StripeEvent =
            serde_json::from_str(payload).map_err(|e| PaymentError::WebhookParse(e.to_string()))?;

        if event.event_type != CHECKOUT_COMPLETED {
            tracing::debug!(event_id = %event.id, event_type = %event.event_type, "Unhandled webhook event");
            return Ok(WebhookOutcome::Ignored {
                event_type: event.event_type,
            });
        }

        let session: CompletedSession = serde_json::from_value(event.data.object)
            .map_err(|e| PaymentError::WebhookParse(e.to_string()))?;

        if session.metadata.get("order_type").map(String::as_str) == Some("print") {
            tracing::info!(session_id = %session.id, "Print order session acknowledged");
            return Ok(WebhookOutcome::Ignored {
                event_type: event.event_type,
            });
        }

        let grant = Grant::from_metadata(&session.metadata).map_err(|e| {
            tracing::error!(session_id = %session.id, error = %e, "Completed session without usable metadata");
            e
        })?;

        self.grant(&session.id, grant).await
    }

    async fn grant(&self, session_id: &str, grant: Grant) -> Result<WebhookOutcome> {
        if self.store.entry_for_session(session_id).await?.is_some() {
            tracing::info!(session_id = %session_id, "Session already credited");
            return Ok(WebhookOutcome::AlreadyProcessed {
                session_id: session_id.to_string(),
            });
        }

        self.store.ensure_account(grant.user_id).await?;

        let mutation =
            CreditMutation::purchase(grant.user_id, grant.credits, session_id, &grant.package_id);
        let entry = match self.store.apply_credit(mutation).await {
            Ok(entry) => entry,
            // A concurrent delivery won the unique session reference
            Err(CoreError::Conflict(_)) => {
                tracing::info!(session_id = %session_id, "Session credited by concurrent delivery");
                return Ok(WebhookOutcome::AlreadyProcessed {
                    session_id: session_id.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            user_id = %grant.user_id,
            credits = grant.credits,
            package = %grant.package_id,
            balance_after = entry.balance_after,
            "Credits granted"
        );

        self.auditor
            .record(
                AuditEventType::CreditPurchase,
                Some(grant.user_id),
                serde_json::json!({
                    "session_id": session_id,
                    "package_id": grant.package_id,
                    "credits": grant.credits,
                }),
                None,
            )
            .await;

        Ok(WebhookOutcome::Granted(entry))
    }
}

#[cfg(test)]
mod tests {
    use rexpet_core::{MemoryStore, TransactionKind};
    use serde_json::json;

    use super::*;

    const SECRET: &str = "whsec_test_secret";

    fn sign(payload: &str, secret: &str, t: i64) -> String {
        signature_header(payload, secret, t).unwrap()
    }

    fn signed(payload: &str) -> String {
        sign(payload, SECRET, chrono::Utc::now().timestamp())
    }

    fn completed_event(session_id: &str, metadata: serde_json::Value) -> String {
        json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": { "object": { "id": session_id, "metadata": metadata } }
        })
        .to_string()
    }

    fn bundle_for(user: Uuid) -> serde_json::Value {
        json!({ "user_id": user.to_string(), "credits": "10", "package_id": "bundle" })
    }

    fn handler() -> (Arc<MemoryStore>, WebhookHandler) {
        let store = Arc::new(MemoryStore::new());
        let handler = WebhookHandler::new(store.clone(), SECRET);
        (store, handler)
    }

    #[test]
    fn test_signature_accepts_valid_and_rejects_tampered() {
        let payload = r#"{"id":"evt_1"}"#;
        let header = sign(payload, SECRET, 1_000);

        assert!(verify_signature(payload, &header, SECRET, 1_010, 300).is_ok());
        assert!(verify_signature(r#"{"id":"evt_2"}"#, &header, SECRET, 1_010, 300).is_err());
        assert!(verify_signature(payload, &header, "whsec_other", 1_010, 300).is_err());
        assert!(verify_signature(payload, &header, SECRET, 2_000, 300).is_err());
        assert!(verify_signature(payload, "v1=abcd", SECRET, 1_000, 300).is_err());
        assert!(verify_signature(payload, "t=1000,v1=zz", SECRET, 1_000, 300).is_err());
    }

    #[test]
    fn test_extreme_timestamps_rejected_without_panic() {
        let payload = "{}";
        for t in [i64::MIN, i64::MAX, -1] {
            let header = format!("t={t},v1=00ff");
            let err = verify_signature(payload, &header, SECRET, 1_700_000_000, 300).unwrap_err();
            assert!(matches!(err, PaymentError::WebhookSignature(_)));
        }

        let header = "t=-9223372036854775808,v1=00ff";
        assert!(verify_signature(payload, header, SECRET, i64::MAX, 300).is_err());
        assert!(verify_signature(payload, header, SECRET, i64::MIN, 300).is_err());
    }

    #[test]
    fn test_signature_any_v1_matches() {
        let payload = "{}";
        let good = sign(payload, SECRET, 500);
        let header = format!("t=500,v1=00ff,{}", good.split_once(',').unwrap().1);
        assert!(verify_signature(payload, &header, SECRET, 500, 300).is_ok());
    }

    #[tokio::test]
    async fn test_grant_then_replay_credits_once() {
        let (store, handler) = handler();
        let user = Uuid::new_v4();
        let payload = completed_event("cs_test_1", bundle_for(user));

        let first = handler.handle(&payload, Some(&signed(&payload))).await.unwrap();
        let WebhookOutcome::Granted(entry) = first else {
            panic!("expected grant, got {first:?}");
        };
        assert_eq!(entry.kind, TransactionKind::Purchase);
        assert_eq!(entry.amount, 10);
        assert_eq!(entry.idempotency_key.as_deref(), Some("stripe-cs_test_1"));
        assert_eq!(entry.description.as_deref(), Some("Purchased 10 credits (bundle)"));

        let second = handler.handle(&payload, Some(&signed(&payload))).await.unwrap();
        assert!(matches!(second, WebhookOutcome::AlreadyProcessed { .. }));

        let account = store.account(user).await.unwrap().unwrap();
        assert_eq!(account.credit_balance, 10);
        assert_eq!(store.ledger(user).await.unwrap().len(), 1);

        let purchases = store
            .audit_events()
            .unwrap()
            .into_iter()
            .filter(|e| e.event_type == AuditEventType::CreditPurchase)
            .count();
        assert_eq!(purchases, 1);
    }

    #[tokio::test]
    async fn test_concurrent_replays_credit_once() {
        let (store, handler) = handler();
        let handler = Arc::new(handler);
        let user = Uuid::new_v4();
        let payload = Arc::new(completed_event("cs_race", bundle_for(user)));

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let handler = handler.clone();
            let payload = payload.clone();
            tasks.push(tokio::spawn(async move {
                handler.handle(&payload, Some(&signed(&payload))).await
            }));
        }

        let mut granted = 0;
        for task in tasks {
            if let WebhookOutcome::Granted(_) = task.await.unwrap().unwrap() {
                granted += 1;
            }
        }

        assert_eq!(granted, 1);
        assert_eq!(store.account(user).await.unwrap().unwrap().credit_balance, 10);
    }

    #[tokio::test]
    async fn test_bad_signature_processes_nothing() {
        let (store, handler) = handler();
        let user = Uuid::new_v4();
        let payload = completed_event("cs_forged", bundle_for(user));
        let forged = sign(&payload, "whsec_attacker", chrono::Utc::now().timestamp());

        let err = handler.handle(&payload, Some(&forged)).await.unwrap_err();
        assert!(matches!(err, PaymentError::WebhookSignature(_)));

        let err = handler.handle(&payload, None).await.unwrap_err();
        assert!(matches!(err, PaymentError::WebhookSignature(_)));

        assert!(store.account(user).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_zero_or_oversized_credits_rejected() {
        let (store, handler) = handler();
        let user = Uuid::new_v4();

        for metadata in [
            json!({ "user_id": user.to_string() }),
            json!({ "user_id": user.to_string(), "credits": "0" }),
            json!({ "user_id": user.to_string(), "credits": "ten" }),
            json!({ "user_id": user.to_string(), "credits": "21" }),
            json!({ "user_id": user.to_string(), "credits": "9223372036854775807" }),
            json!({ "credits": "10" }),
        ] {
            let payload = completed_event("cs_bad", metadata);
            let err = handler.handle(&payload, Some(&signed(&payload))).await.unwrap_err();
            assert!(matches!(err, PaymentError::MissingMetadata(_)));
        }

        assert!(store.ledger(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_other_events_and_print_orders_ignored() {
        let (store, handler) = handler();
        let user = Uuid::new_v4();

        let payload = json!({
            "id": "evt_2",
            "type": "payment_intent.succeeded",
            "data": { "object": { "id": "pi_1" } }
        })
        .to_string();
        let outcome = handler.handle(&payload, Some(&signed(&payload))).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::Ignored { .. }));

        let payload = completed_event(
            "cs_print",
            json!({ "user_id": user.to_string(), "order_type": "print" }),
        );
        let outcome = handler.handle(&payload, Some(&signed(&payload))).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::Ignored { .. }));

        assert!(store.account(user).await.unwrap().is_none());
    }
}
