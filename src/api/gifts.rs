// src/api/gifts.rs

use actix_web::{get, web, HttpResponse, Responder};
use serde_json::json;
use uuid::Uuid;

use crate::error::BillingError;
use crate::{reconcile, AppState};

#[utoipa::path(
    get,
    path = "/api/gifts/{gift_id}/status",
    tag = "gifts",
    params(("gift_id" = Uuid, Path, description = "Gift id")),
    responses(
        (status = 200, description = "Access state and effective tier"),
        (status = 404, description = "Gift not found")
    )
)]
#[get("/gifts/{gift_id}/status")]
pub async fn gift_status(state: web::Data<AppState>, path: web::Path<Uuid>) -> impl Responder {
    let gift_id = path.into_inner();
    match reconcile::get_entitlement_status(state.store.as_ref(), gift_id).await {
        Ok(status) => HttpResponse::Ok().json(status),
        Err(BillingError::GiftNotFound) => {
            HttpResponse::NotFound().json(json!({"error": "gift not found"}))
        }
        Err(e) => {
            log::error!("gift_status error gift_id={gift_id}: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}
