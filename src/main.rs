// src/main.rs
use std::env;
use std::sync::Arc;

use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use dotenvy::dotenv;
use sqlx::PgPool;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use giftlease::db::PgStore;
use giftlease::{api, docs, AppState, BypassPolicy};

async fn index() -> impl Responder {
    HttpResponse::Ok().body("Service ready!")
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = PgPool::connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let provider_api_key = env::var("PROVIDER_API_KEY").expect("PROVIDER_API_KEY required");
    let webhook_key = env::var("PAYMENT_WEBHOOK_KEY").expect("PAYMENT_WEBHOOK_KEY required");
    let currency = env::var("CURRENCY").unwrap_or_else(|_| "USD".to_string());

    let state = web::Data::new(AppState {
        store: Arc::new(PgStore::new(pool)),
        provider_api_key,
        webhook_key,
        currency,
        bypass: BypassPolicy::from_env(),
    });

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/", web::get().to(index))
            .service(
                SwaggerUi::new("/docs/{_:.*}")
                    .url("/api-docs/openapi.json", docs::ApiDoc::openapi()),
            )
            // Order initiation + confirmation channels
            .service(
                web::scope("/api")
                    .service(api::payments::create_order)
                    .service(api::payments::extend_gift)
                    .service(api::payments::confirm_payment)
                    .service(api::payments::verify_payment)
                    .service(api::payments::dev_complete)
                    .service(api::gifts::gift_status),
            )
            // Webhooks (public, key-checked in the handler)
            .service(api::webhooks::payment_webhook)
    })
    .bind(("0.0.0.0", 8070))?
    .run()
    .await
}
