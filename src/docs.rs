use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::webhooks::payment_webhook,
        crate::api::payments::verify_payment,
        crate::api::gifts::gift_status
    ),
    components(
        schemas(
            crate::api::webhooks::PaymentWebhook,
            crate::api::payments::CreateOrderRequest,
            crate::api::payments::ExtendRequest,
            crate::api::payments::ConfirmRequest,
            crate::api::payments::DevCompleteRequest
        )
    ),
    tags(
        (name = "payments", description = "Order initiation and confirmation channels"),
        (name = "gifts", description = "Gift access status"),
        (name = "webhooks", description = "Callbacks from the payment gateway")
    )
)]
pub struct ApiDoc;
