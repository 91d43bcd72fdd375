// src/api/payments.rs

use actix_web::{get, post, web, HttpRequest, HttpResponse, Responder};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::BillingError;
use crate::models::PaymentOutcome;
use crate::tiers::{effective_tier, incremental_price, pending_extension_tier, TierKey};
use crate::{provider, reconcile, AppState};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOrderRequest {
    pub gift_id: Uuid,
}

/// Initiates the initial purchase for a gift: creates a gateway invoice
/// for the gift's selected tier and records a pending order carrying
/// the invoice id as the provider reference.
#[post("/orders")]
pub async fn create_order(
    state: web::Data<AppState>,
    payload: web::Json<CreateOrderRequest>,
) -> impl Responder {
    let gift = match state.store.get_gift(payload.gift_id).await {
        Ok(Some(g)) => g,
        Ok(None) => return HttpResponse::NotFound().json(json!({"error": "gift not found"})),
        Err(e) => {
            log::error!("create_order get_gift error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    let tier = effective_tier(&gift.addon_history);
    let amount = tier.price();

    let invoice = match provider::create_invoice(
        &state.provider_api_key,
        provider::CreateInvoiceRequest {
            amount_minor: amount,
            currency: state.currency.clone(),
            description: Some(format!("gift access, {tier}")),
        },
    )
    .await
    {
        Ok(r) => r,
        Err(e) => {
            log::error!("create_invoice error gift_id={}: {e}", payload.gift_id);
            return HttpResponse::BadRequest().json(json!({
                "error": "invoice create failed",
                "details": e.to_string()
            }));
        }
    };

    let order = match state
        .store
        .create_order(
            gift.id,
            provider::PROVIDER_NAME,
            &invoice.id,
            amount,
            &state.currency,
        )
        .await
    {
        Ok(o) => o,
        Err(e) => {
            log::error!("create_order insert error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    HttpResponse::Ok().json(json!({
        "order_id": order.id,
        "provider": order.provider,
        "provider_reference": order.provider_reference,
        "amount": order.amount,
        "currency": order.currency,
        "payment_url": invoice.payment_url,
    }))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ExtendRequest {
    /// Requested tier key: "24h", "3d", "1w" or "lifetime".
    pub tier: String,
}

/// Records a pending extension and initiates its payment at the
/// incremental price. The tier must be a strict upgrade.
#[post("/gifts/{gift_id}/extend")]
pub async fn extend_gift(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    payload: web::Json<ExtendRequest>,
) -> impl Responder {
    let gift_id = path.into_inner();

    let Some(tier) = TierKey::parse(&payload.tier) else {
        return HttpResponse::BadRequest().json(json!({"error": "unknown tier"}));
    };

    let gift = match state.store.get_gift(gift_id).await {
        Ok(Some(g)) => g,
        Ok(None) => return HttpResponse::NotFound().json(json!({"error": "gift not found"})),
        Err(e) => {
            log::error!("extend get_gift error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    if pending_extension_tier(&gift.addon_history).is_some() {
        return HttpResponse::Conflict().json(json!({
            "error": "an unpaid extension is already recorded"
        }));
    }

    let current = effective_tier(&gift.addon_history);
    if tier.rank() <= current.rank() {
        return HttpResponse::BadRequest().json(json!({
            "error": "invalid tier",
            "current": current,
            "requested": tier,
        }));
    }

    let amount = incremental_price(current, tier);

    let invoice = match provider::create_invoice(
        &state.provider_api_key,
        provider::CreateInvoiceRequest {
            amount_minor: amount,
            currency: state.currency.clone(),
            description: Some(format!("gift extension, {current} -> {tier}")),
        },
    )
    .await
    {
        Ok(r) => r,
        Err(e) => {
            log::error!("extend create_invoice error gift_id={gift_id}: {e}");
            return HttpResponse::BadRequest().json(json!({
                "error": "invoice create failed",
                "details": e.to_string()
            }));
        }
    };

    // Authoritative check: the store re-validates under lock, so a
    // racing second extension still ends up rejected here. A rejection
    // at this point voids the invoice created above, since no order
    // will ever carry its reference.
    match state
        .store
        .record_pending_extension(gift_id, tier, amount, &invoice.id)
        .await
    {
        Ok(()) => {}
        Err(BillingError::InvalidTier { current, requested }) => {
            void_invoice(&state.provider_api_key, &invoice.id).await;
            return HttpResponse::BadRequest().json(json!({
                "error": "invalid tier",
                "current": current,
                "requested": requested,
            }));
        }
        Err(BillingError::ExtensionPending) => {
            void_invoice(&state.provider_api_key, &invoice.id).await;
            return HttpResponse::Conflict().json(json!({
                "error": "an unpaid extension is already recorded"
            }));
        }
        Err(e) => {
            log::error!("record_pending_extension error gift_id={gift_id}: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    }

    let order = match state
        .store
        .create_order(
            gift_id,
            provider::PROVIDER_NAME,
            &invoice.id,
            amount,
            &state.currency,
        )
        .await
    {
        Ok(o) => o,
        Err(e) => {
            log::error!("extend create_order insert error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    HttpResponse::Ok().json(json!({
        "order_id": order.id,
        "provider_reference": order.provider_reference,
        "amount": order.amount,
        "currency": order.currency,
        "payment_url": invoice.payment_url,
    }))
}

/// A cancel failure only leaves an unpayable invoice dangling at the
/// gateway; nothing references it locally, so it is logged and dropped.
async fn void_invoice(api_key: &str, reference: &str) {
    if let Err(e) = provider::cancel_invoice(api_key, reference).await {
        log::warn!("cancel_invoice failed ref={reference}: {e}");
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ConfirmRequest {
    pub reference: String,
    /// HMAC-SHA256 hex over the reference, issued to the redirect URL.
    pub signature: String,
}

/// Client return-redirect confirm channel. The browser cannot be
/// trusted, so the redirect carries a signature over the reference.
#[post("/payments/confirm")]
pub async fn confirm_payment(
    state: web::Data<AppState>,
    payload: web::Json<ConfirmRequest>,
) -> impl Responder {
    if !provider::verify_hmac_sha256_hex(&state.webhook_key, &payload.reference, &payload.signature)
    {
        return HttpResponse::Unauthorized().json(json!({"error": "bad signature"}));
    }

    match reconcile::report_outcome(
        state.store.as_ref(),
        &payload.reference,
        PaymentOutcome::Success,
        Utc::now(),
    )
    .await
    {
        Ok(res) => HttpResponse::Ok().json(json!({
            "status": res.status,
            "applied": res.applied,
        })),
        Err(BillingError::OrderNotFound) => {
            HttpResponse::NotFound().json(json!({"error": "order not found"}))
        }
        Err(e) => {
            log::error!("confirm reconcile error ref={}: {e}", payload.reference);
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Manual verify poll channel: asks the gateway for the invoice status
/// and applies whatever it reports. Safe to call any number of times.
#[utoipa::path(
    get,
    path = "/api/payments/verify/{reference}",
    tag = "payments",
    params(("reference" = String, Path, description = "Provider invoice reference")),
    responses(
        (status = 200, description = "Current order status after verification"),
        (status = 404, description = "Unknown reference"),
        (status = 502, description = "Gateway verify call failed")
    )
)]
#[get("/payments/verify/{reference}")]
pub async fn verify_payment(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let reference = path.into_inner();

    let invoice = match provider::fetch_invoice(&state.provider_api_key, &reference).await {
        Ok(r) => r,
        Err(e) => {
            log::error!("verify fetch_invoice error ref={reference}: {e}");
            return HttpResponse::BadGateway().json(json!({
                "error": "provider verify failed",
                "details": e.to_string()
            }));
        }
    };

    let Some(outcome) = provider::map_invoice_status(&invoice.status) else {
        return HttpResponse::Ok().json(json!({"status": "pending"}));
    };

    match reconcile::report_outcome(state.store.as_ref(), &reference, outcome, Utc::now()).await {
        Ok(res) => HttpResponse::Ok().json(json!({
            "status": res.status,
            "applied": res.applied,
        })),
        Err(BillingError::OrderNotFound) => {
            HttpResponse::NotFound().json(json!({"error": "order not found"}))
        }
        Err(e) => {
            log::error!("verify reconcile error ref={reference}: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DevCompleteRequest {
    pub gift_id: Uuid,
}

/// Dev bypass channel: an allowed caller gets a zero-price order that
/// is completed on the spot, through the same reconciliation path as
/// every real payment.
#[post("/payments/dev-complete")]
pub async fn dev_complete(
    req: HttpRequest,
    state: web::Data<AppState>,
    payload: web::Json<DevCompleteRequest>,
) -> impl Responder {
    let key = req
        .headers()
        .get("X-Dev-Key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !state.bypass.allows(key) {
        return HttpResponse::Forbidden().json(json!({"error": "not allowed"}));
    }

    match state.store.get_gift(payload.gift_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return HttpResponse::NotFound().json(json!({"error": "gift not found"})),
        Err(e) => {
            log::error!("dev_complete get_gift error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    }

    let reference = format!("dev-{}", Uuid::new_v4());
    if let Err(e) = state
        .store
        .create_order(payload.gift_id, "dev", &reference, 0, &state.currency)
        .await
    {
        log::error!("dev_complete create_order error: {e}");
        return HttpResponse::InternalServerError().finish();
    }

    match reconcile::report_outcome(
        state.store.as_ref(),
        &reference,
        PaymentOutcome::Success,
        Utc::now(),
    )
    .await
    {
        Ok(res) => HttpResponse::Ok().json(json!({
            "status": res.status,
            "applied": res.applied,
            "provider_reference": reference,
        })),
        Err(e) => {
            log::error!("dev_complete reconcile error ref={reference}: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}
