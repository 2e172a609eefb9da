use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Payments Reconciler API",
        description = r#"
Reconciles payment state between MercadoPago and the order-management
backend.

- **Checkout**: create gateway checkout preferences for pending transactions
- **Payments**: admin capture and refund, authorization probes
- **Webhooks**: inbound gateway notifications, reconciled idempotently

Webhook deliveries are acknowledged with `200` regardless of internal
outcome; duplicated and reordered notifications are safe because payment
status is always re-fetched from the gateway and completion is idempotent.
"#
    ),
    paths(
        crate::handlers::checkout::start_checkout,
        crate::handlers::payments::capture_payment,
        crate::handlers::payments::refund_payment,
        crate::handlers::payments::payment_status,
        crate::handlers::payment_webhooks::payment_webhook,
    ),
    tags(
        (name = "Checkout", description = "Checkout preference creation"),
        (name = "Payments", description = "Capture, refund, and status probes"),
        (name = "Webhooks", description = "Inbound gateway notifications")
    )
)]
pub struct ApiDoc;

/// Swagger UI router, mounted at /docs.
pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi())
}
