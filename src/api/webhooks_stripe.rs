// src/api/webhooks_stripe.rs
//
// Provider callback. Reconciles the same way as `verify-payment`, so a
// client that never comes back from checkout still gets enrolled.

use actix_web::{post, web, HttpRequest, HttpResponse};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

use crate::error::AppError;
use crate::{billing, AppState};

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Maximum age of a signed payload, in seconds.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature header")]
    Missing,
    #[error("malformed signature header")]
    Malformed,
    #[error("signature timestamp outside tolerance")]
    Stale,
    #[error("signature mismatch")]
    Mismatch,
}

#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: CheckoutSessionObject,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutSessionObject {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub client_reference_id: Option<String>,
}

impl StripeEvent {
    /// Purchase id of a checkout that finished with money collected.
    pub fn paid_purchase_reference(&self) -> Option<Uuid> {
        let completes_checkout = matches!(
            self.event_type.as_str(),
            "checkout.session.completed" | "checkout.session.async_payment_succeeded"
        );
        if !completes_checkout || self.data.object.payment_status.as_deref() != Some("paid") {
            return None;
        }
        self.data
            .object
            .client_reference_id
            .as_deref()
            .and_then(|r| Uuid::parse_str(r).ok())
    }
}

/// Checks a `t=<unix>,v1=<hex>[,v1=...]` header against `"{t}.{payload}"`.
pub fn verify_signature(
    secret: &str,
    header: Option<&str>,
    payload: &[u8],
    now: i64,
) -> Result<(), SignatureError> {
    let header = header.ok_or(SignatureError::Missing)?;

    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<Vec<u8>> = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => {
                timestamp = Some(v.parse().map_err(|_| SignatureError::Malformed)?);
            }
            Some(("v1", v)) => {
                candidates.push(hex::decode(v).map_err(|_| SignatureError::Malformed)?);
            }
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if candidates.is_empty() {
        return Err(SignatureError::Malformed);
    }
    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(SignatureError::Stale);
    }

    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Mismatch)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    let matches = candidates
        .iter()
        .any(|sig| mac.clone().verify_slice(sig).is_ok());

    if matches {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

#[post("/webhook/stripe")]
pub async fn stripe_webhook(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let Some(secret) = state.config.stripe_webhook_secret.as_deref() else {
        return Err(AppError::not_found("Not found"));
    };

    let header = req
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok());
    if let Err(e) = verify_signature(secret, header, &body, Utc::now().timestamp()) {
        log::warn!("stripe webhook rejected: {e}");
        return Err(AppError::Unauthorized(e.to_string()));
    }

    let event: StripeEvent = match serde_json::from_slice(&body) {
        Ok(ev) => ev,
        Err(e) => {
            log::warn!("stripe webhook payload parse error: {e}");
            return Err(AppError::validation("invalid payload"));
        }
    };

    let Some(purchase_id) = event.paid_purchase_reference() else {
        // other events and unpaid sessions: acknowledge so the provider stops retrying
        return Ok(HttpResponse::Ok().json(json!({"ok": true, "ignored": true})));
    };

    match billing::reconcile_paid_reference(&state.pool, purchase_id).await {
        Ok(Some(reconciled)) => {
            log::info!(
                "stripe webhook reconciled session_id={:?} purchase_id={}",
                event.data.object.id,
                reconciled.ledger.purchase_id()
            );
            Ok(HttpResponse::Ok().json(json!({"ok": true})))
        }
        Ok(None) => {
            log::warn!("stripe webhook for unknown purchase_id={purchase_id}");
            Ok(HttpResponse::Ok().json(json!({"ok": true, "ignored": true})))
        }
        Err(AppError::NotFound(msg)) => {
            log::warn!("stripe webhook purchase_id={purchase_id}: {msg}");
            Ok(HttpResponse::Ok().json(json!({"ok": true, "ignored": true})))
        }
        Err(e) => Err(e),
    }
}
