use crate::{
    errors::ServiceError,
    events::Event,
    handlers::AppState,
    provider::{AuthorizeOutcome, CaptureRequest, CaptureTarget, SessionData},
    store::{InternalPayment, SESSION_PREFIX},
    ApiResponse,
};
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[schema(example = json!({
    "amount": "149.99",
    "payment_collection_id": "pcol_01HV2K8"
}))]
pub struct CapturePaymentRequest {
    /// Amount to capture. Must be a positive number.
    #[schema(example = "149.99")]
    #[validate(custom = "crate::handlers::validate_positive_decimal")]
    pub amount: Decimal,
    /// Explicit ledger payment id, overriding the path id
    #[serde(default)]
    pub payment_id: Option<String>,
    /// Payment collection to resolve the ledger payment through
    #[serde(default)]
    pub payment_collection_id: Option<String>,
    /// Checkout session to resolve the ledger payment through
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CaptureResponse {
    /// Whether the internal ledger recorded the capture. `false` means the
    /// capture was recorded in session data only.
    pub captured: bool,
    pub payment: Option<InternalPayment>,
    pub session_data: SessionData,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[schema(example = json!({
    "payment_id": "pay_01HV2K8",
    "amount": "50.00",
    "reason": "customer returned one item"
}))]
pub struct RefundPaymentRequest {
    /// Ledger payment to refund
    pub payment_id: String,
    /// Refund amount (defaults to the full transaction amount)
    #[serde(default)]
    pub amount: Option<Decimal>,
    /// Reason for the refund
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RefundResponse {
    pub payment_id: String,
    pub amount_refunded: Decimal,
    pub session_data: SessionData,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentStatusResponse {
    /// "authorized", "pending", or "error"
    #[schema(example = "authorized")]
    pub status: String,
    pub mp_payment_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Capture a payment.
///
/// The path id names the ledger payment directly, or the payment collection
/// or checkout session to resolve it through, distinguished by prefix.
#[utoipa::path(
    post,
    path = "/api/v1/payments/{id}/capture",
    params(("id" = String, Path, description = "Payment, payment-collection, or checkout-session id")),
    request_body = CapturePaymentRequest,
    responses(
        (status = 200, description = "Capture processed", body = crate::ApiResponse<CaptureResponse>),
        (status = 400, description = "Bad request", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway error", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn capture_payment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<CapturePaymentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CaptureResponse>>), ServiceError> {
    request.validate()?;

    let mut target = CaptureTarget {
        payment_id: request.payment_id,
        payment_collection_id: request.payment_collection_id,
        session_id: request.session_id,
    };
    if id.starts_with("pcol_") {
        target.payment_collection_id.get_or_insert(id);
    } else if id.starts_with(SESSION_PREFIX) {
        target.session_id.get_or_insert(id);
    } else {
        target.payment_id.get_or_insert(id);
    }

    let result = state
        .provider()
        .capture_payment(CaptureRequest {
            amount: request.amount,
            target,
            data: SessionData::default(),
        })
        .await?;

    if let Some(payment) = &result.payment {
        let event = Event::PaymentCaptured {
            payment_id: payment.id.clone(),
            amount: request.amount,
        };
        if let Err(err) = state.event_sender.send(event).await {
            warn!(%err, "failed to send capture event");
        }
    }

    let response = CaptureResponse {
        captured: result.payment.is_some(),
        payment: result.payment,
        session_data: result.data,
    };
    Ok((StatusCode::OK, Json(ApiResponse::success(response))))
}

/// Refund a payment, partially or in full.
#[utoipa::path(
    post,
    path = "/api/v1/payments/refund",
    request_body = RefundPaymentRequest,
    responses(
        (status = 201, description = "Refund processed", body = crate::ApiResponse<RefundResponse>),
        (status = 400, description = "Bad request", body = crate::errors::ErrorResponse),
        (status = 404, description = "Payment not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway error", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn refund_payment(
    State(state): State<AppState>,
    Json(request): Json<RefundPaymentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<RefundResponse>>), ServiceError> {
    request.validate()?;

    let payment = state
        .store
        .find_payment(&request.payment_id)
        .await?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("payment {} not found", request.payment_id))
        })?;

    let data = SessionData::from_value(&payment.data)?;
    let updated = state
        .provider()
        .refund_payment(&data, request.amount)
        .await?;

    state
        .store
        .update_payment_data(&payment.id, updated.to_value()?)
        .await?;

    if let Some(mp_payment_id) = updated.mp_payment_id {
        let event = Event::PaymentRefunded {
            mp_payment_id,
            amount: request
                .amount
                .or(data.transaction_amount)
                .unwrap_or_default(),
        };
        if let Err(err) = state.event_sender.send(event).await {
            warn!(%err, "failed to send refund event");
        }
    }

    let response = RefundResponse {
        payment_id: payment.id,
        amount_refunded: updated.amount_refunded.unwrap_or_default(),
        session_data: updated,
    };
    Ok((StatusCode::CREATED, Json(ApiResponse::success(response))))
}

/// Authorization probe for a payment session.
///
/// Re-queries the gateway once; a query failure is reported as status
/// "error" rather than a transport failure, since polling callers decide
/// the cadence.
#[utoipa::path(
    get,
    path = "/api/v1/payments/{id}/status",
    params(("id" = String, Path, description = "Payment or checkout-session id")),
    responses(
        (status = 200, description = "Current authorization status", body = crate::ApiResponse<PaymentStatusResponse>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<PaymentStatusResponse>>, ServiceError> {
    let payment = lookup_payment(&state, &id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("no payment behind {id}")))?;

    let data = SessionData::from_value(&payment.data)?;

    let response = match state.provider().authorize(&data).await {
        Ok(AuthorizeOutcome::Authorized { data: enriched }) => {
            let mp_payment_id = enriched.mp_payment_id;
            // Persist the enriched correlation fields so later calls skip the search.
            state
                .store
                .update_payment_data(&payment.id, enriched.to_value()?)
                .await?;
            PaymentStatusResponse {
                status: "authorized".to_string(),
                mp_payment_id,
                detail: None,
            }
        }
        Ok(AuthorizeOutcome::Pending) => PaymentStatusResponse {
            status: "pending".to_string(),
            mp_payment_id: data.mp_payment_id,
            detail: None,
        },
        Err(err) => {
            warn!(id, %err, "authorization probe failed");
            PaymentStatusResponse {
                status: "error".to_string(),
                mp_payment_id: data.mp_payment_id,
                detail: Some(err.response_message()),
            }
        }
    };

    Ok(Json(ApiResponse::success(response)))
}

async fn lookup_payment(
    state: &AppState,
    id: &str,
) -> Result<Option<InternalPayment>, ServiceError> {
    if id.starts_with(SESSION_PREFIX) {
        let Some(session) = state.store.checkout_session(id).await? else {
            return Ok(None);
        };
        let Some(collection_id) = session.payment_collection_id else {
            return Ok(None);
        };
        let payments = state.store.payments_for_collection(&collection_id).await?;
        return Ok(payments.into_iter().next());
    }
    if id.starts_with("pcol_") {
        let payments = state.store.payments_for_collection(id).await?;
        return Ok(payments.into_iter().next());
    }
    state.store.find_payment(id).await
}

/// Payment routes, including the inbound webhook.
pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/:id/capture", post(capture_payment))
        .route("/:id/status", get(payment_status))
        .route("/refund", post(refund_payment))
        .route(
            "/webhook",
            post(crate::handlers::payment_webhooks::payment_webhook),
        )
}
