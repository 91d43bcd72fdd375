// src/api/webhooks.rs

use actix_web::{post, web, HttpRequest, HttpResponse};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;

use crate::error::BillingError;
use crate::models::PaymentOutcome;
use crate::reconcile;
use crate::AppState;

/// Provider payloads vary between gateways and API versions; we accept
/// the common minimum:
/// - contractId / orderId / reference
/// - status (completed/failed/cancelled) or paid=true
#[derive(Debug, Deserialize, ToSchema)]
pub struct PaymentWebhook {
    #[serde(alias = "contractId", alias = "orderId", alias = "order_id")]
    pub reference: String,

    pub status: Option<String>,

    pub paid: Option<bool>,

    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub extra: serde_json::Value,
}

pub fn webhook_outcome(payload: &PaymentWebhook) -> Option<PaymentOutcome> {
    if payload.paid.unwrap_or(false) {
        return Some(PaymentOutcome::Success);
    }
    match payload.status.as_deref() {
        Some("completed") | Some("succeeded") | Some("success") | Some("paid") => {
            Some(PaymentOutcome::Success)
        }
        Some("failed") | Some("fail") | Some("error") => Some(PaymentOutcome::Failed),
        Some("cancelled") | Some("canceled") => Some(PaymentOutcome::Cancelled),
        _ => None,
    }
}

#[utoipa::path(
    post,
    path = "/webhook/payments",
    tag = "webhooks",
    request_body = PaymentWebhook,
    responses(
        (status = 200, description = "Outcome applied or redundant delivery acknowledged"),
        (status = 401, description = "Bad webhook key"),
        (status = 500, description = "Storage error, provider should retry")
    )
)]
#[post("/webhook/payments")]
pub async fn payment_webhook(
    req: HttpRequest,
    payload: web::Json<PaymentWebhook>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let key = req
        .headers()
        .get("X-Api-Key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if key != state.webhook_key {
        return HttpResponse::Unauthorized().json(json!({"error": "invalid webhook key"}));
    }

    let payload = payload.into_inner();

    let Some(outcome) = webhook_outcome(&payload) else {
        // Unknown status, ack so the provider stops retrying.
        return HttpResponse::Ok().json(json!({"ok": true, "ignored": true}));
    };

    match reconcile::report_outcome(state.store.as_ref(), &payload.reference, outcome, Utc::now())
        .await
    {
        Ok(res) => HttpResponse::Ok().json(json!({
            "ok": true,
            "status": res.status,
            "applied": res.applied,
            "idempotent": res.idempotent,
        })),
        Err(BillingError::OrderNotFound) => {
            // Unknown reference: ack anyway (likely another environment's
            // order), the provider must not retry forever.
            log::warn!("webhook for unknown reference {}", payload.reference);
            HttpResponse::Ok().json(json!({"ok": true, "ignored": true}))
        }
        Err(e) => {
            log::error!("webhook reconcile error ref={}: {e}", payload.reference);
            HttpResponse::InternalServerError().finish()
        }
    }
}
