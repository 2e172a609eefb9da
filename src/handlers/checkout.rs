use crate::{
    errors::ServiceError,
    events::Event,
    handlers::AppState,
    provider::{InitiateRequest, InitiateResult},
    ApiResponse,
};
use axum::{
    extract::{Json, State},
    http::StatusCode,
    routing::post,
    Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::warn;
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[schema(example = json!({
    "amount": "199.90",
    "currency": "ARS",
    "payer_email": "customer@example.com",
    "transaction_id": "txn_01HV2K8"
}))]
pub struct StartCheckoutRequest {
    /// Total to collect. Must be a positive number.
    #[schema(example = "199.90")]
    #[validate(custom = "crate::handlers::validate_positive_decimal")]
    pub amount: Decimal,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub payer_email: Option<String>,
    /// Transaction the checkout pays for; used as the gateway reference
    #[serde(default)]
    pub transaction_id: Option<String>,
    /// Checkout-session id, used as the reference when no transaction id exists yet
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub item_title: Option<String>,
}

/// Create a checkout preference and return the redirect URL.
#[utoipa::path(
    post,
    path = "/api/v1/checkout/sessions",
    request_body = StartCheckoutRequest,
    responses(
        (status = 201, description = "Checkout created", body = crate::ApiResponse<InitiateResult>),
        (status = 400, description = "Bad request", body = crate::errors::ErrorResponse),
        (status = 500, description = "Gateway not configured", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway error", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn start_checkout(
    State(state): State<AppState>,
    Json(request): Json<StartCheckoutRequest>,
) -> Result<(StatusCode, Json<ApiResponse<InitiateResult>>), ServiceError> {
    request.validate()?;

    let result = state
        .provider()
        .initiate(InitiateRequest {
            amount: request.amount,
            currency: request.currency,
            payer_email: request.payer_email,
            resource_id: request.transaction_id,
            session_id: request.session_id,
            item_title: request.item_title,
        })
        .await?;

    let event = Event::CheckoutStarted {
        reference: result
            .data
            .resource_id
            .clone()
            .unwrap_or_default(),
        preference_id: result.preference_id.clone(),
    };
    if let Err(err) = state.event_sender.send(event).await {
        warn!(%err, "failed to send checkout event");
    }

    Ok((StatusCode::CREATED, Json(ApiResponse::success(result))))
}

/// Checkout routes
pub fn checkout_routes() -> Router<AppState> {
    Router::new().route("/sessions", post(start_checkout))
}
