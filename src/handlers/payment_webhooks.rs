use crate::{errors::ServiceError, AppState};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

// POST /api/v1/payments/webhook
//
// Inbound gateway notifications. Always acknowledged with 200 regardless of
// internal outcome; the only non-2xx cases are bodies that are not JSON at
// all and, when a secret is configured, signature failures.
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Notification acknowledged"),
        (status = 400, description = "Malformed body", body = crate::errors::ErrorResponse),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse)
    ),
    tag = "Webhooks"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::BadRequest(format!("invalid json: {e}")))?;

    if let Some(secret) = state.config.webhook_secret.as_deref() {
        let ok = verify_signature(
            &headers,
            &payload,
            secret,
            state.config.webhook_tolerance_secs,
        );
        if !ok {
            warn!("payment webhook signature verification failed");
            return Err(ServiceError::Unauthorized(
                "invalid webhook signature".to_string(),
            ));
        }
    }

    let outcome = state.reconciler().process(&payload).await;

    Ok((
        StatusCode::OK,
        Json(json!({ "status": outcome.ack_label() })),
    ))
}

/// MercadoPago-style signature: `x-signature: ts=...,v1=...` where v1 is an
/// HMAC-SHA256 over `id:<data.id>;request-id:<x-request-id>;ts:<ts>;`,
/// segments included only when present. The timestamp is milliseconds.
fn verify_signature(
    headers: &HeaderMap,
    payload: &Value,
    secret: &str,
    tolerance_secs: u64,
) -> bool {
    let Some(signature) = headers.get("x-signature").and_then(|v| v.to_str().ok()) else {
        return false;
    };

    let mut ts = "";
    let mut v1 = "";
    for part in signature.split(',') {
        let mut it = part.trim().splitn(2, '=');
        match (it.next(), it.next()) {
            (Some("ts"), Some(val)) => ts = val,
            (Some("v1"), Some(val)) => v1 = val,
            _ => {}
        }
    }
    if ts.is_empty() || v1.is_empty() {
        return false;
    }

    if let Ok(ts_ms) = ts.parse::<i64>() {
        let now_ms = chrono::Utc::now().timestamp_millis();
        if (now_ms - ts_ms).unsigned_abs() > tolerance_secs * 1000 {
            return false;
        }
    }

    let data_id = payload
        .pointer("/data/id")
        .map(|v| match v {
            Value::String(s) => s.to_ascii_lowercase(),
            other => other.to_string(),
        })
        .unwrap_or_default();
    let request_id = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let mut manifest = String::new();
    if !data_id.is_empty() {
        manifest.push_str(&format!("id:{data_id};"));
    }
    if !request_id.is_empty() {
        manifest.push_str(&format!("request-id:{request_id};"));
    }
    manifest.push_str(&format!("ts:{ts};"));

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(manifest.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(&expected, v1)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, manifest: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(manifest.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn valid_signature_passes() {
        let secret = "whsec_test";
        let ts = chrono::Utc::now().timestamp_millis().to_string();
        let payload = serde_json::json!({"type": "payment", "data": {"id": "123"}});
        let manifest = format!("id:123;request-id:req-1;ts:{ts};");
        let v1 = sign(secret, &manifest);

        let mut headers = HeaderMap::new();
        headers.insert("x-signature", format!("ts={ts},v1={v1}").parse().unwrap());
        headers.insert("x-request-id", "req-1".parse().unwrap());

        assert!(verify_signature(&headers, &payload, secret, 300));
    }

    #[test]
    fn tampered_payload_fails() {
        let secret = "whsec_test";
        let ts = chrono::Utc::now().timestamp_millis().to_string();
        let manifest = format!("id:123;ts:{ts};");
        let v1 = sign(secret, &manifest);

        let mut headers = HeaderMap::new();
        headers.insert("x-signature", format!("ts={ts},v1={v1}").parse().unwrap());

        let other_payment = serde_json::json!({"type": "payment", "data": {"id": "999"}});
        assert!(!verify_signature(&headers, &other_payment, secret, 300));
    }

    #[test]
    fn stale_timestamp_fails() {
        let secret = "whsec_test";
        let ts = (chrono::Utc::now().timestamp_millis() - 3_600_000).to_string();
        let payload = serde_json::json!({"data": {"id": "123"}});
        let manifest = format!("id:123;ts:{ts};");
        let v1 = sign(secret, &manifest);

        let mut headers = HeaderMap::new();
        headers.insert("x-signature", format!("ts={ts},v1={v1}").parse().unwrap());

        assert!(!verify_signature(&headers, &payload, secret, 300));
    }

    #[test]
    fn missing_signature_header_fails() {
        let payload = serde_json::json!({"data": {"id": "123"}});
        assert!(!verify_signature(&HeaderMap::new(), &payload, "secret", 300));
    }
}
