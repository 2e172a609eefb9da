use super::types::{
    CheckoutPreference, CheckoutRequest, GatewayPayment, PaymentSearchPage, RefundReceipt,
};
use crate::errors::ServiceError;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry behavior applied uniformly to every gateway call.
///
/// Only timeout-class transport failures are retried; gateway rejections and
/// malformed responses propagate immediately.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn is_retryable(err: &reqwest::Error) -> bool {
        err.is_timeout() || err.is_connect()
    }
}

/// Client for the MercadoPago REST API.
///
/// The access credential is injected at construction; the client holds no
/// mutable state and is shared freely across request tasks.
#[derive(Debug, Clone)]
pub struct MercadoPagoClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
    retry: RetryPolicy,
}

impl MercadoPagoClient {
    pub fn new(
        access_token: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("reqwest client construction cannot fail with static options"),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Create a checkout preference and return its id plus redirect URL.
    pub async fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutPreference, ServiceError> {
        self.execute("create_checkout", || {
            self.http
                .post(self.url("/checkout/preferences"))
                .bearer_auth(&self.access_token)
                .json(request)
        })
        .await
    }

    /// Fetch a payment by gateway id. `Ok(None)` when the gateway has no such payment.
    pub async fn get_payment(&self, id: i64) -> Result<Option<GatewayPayment>, ServiceError> {
        let response = self
            .send_with_retry("get_payment", || {
                self.http
                    .get(self.url(&format!("/v1/payments/{id}")))
                    .bearer_auth(&self.access_token)
            })
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::read_json("get_payment", response).await.map(Some)
    }

    /// Search payments carrying the given external reference, most recent first.
    pub async fn search_payments_by_reference(
        &self,
        reference: &str,
    ) -> Result<Vec<GatewayPayment>, ServiceError> {
        let page: PaymentSearchPage = self
            .execute("search_payments", || {
                self.http
                    .get(self.url("/v1/payments/search"))
                    .bearer_auth(&self.access_token)
                    .query(&[
                        ("external_reference", reference),
                        ("sort", "date_created"),
                        ("criteria", "desc"),
                    ])
            })
            .await?;
        Ok(page.results)
    }

    /// Capture previously authorized funds, optionally adjusting the amount down.
    pub async fn capture(
        &self,
        payment_id: i64,
        amount: Option<Decimal>,
    ) -> Result<GatewayPayment, ServiceError> {
        let body = match amount {
            Some(amount) => json!({ "capture": true, "transaction_amount": amount }),
            None => json!({ "capture": true }),
        };
        self.execute("capture", || {
            self.http
                .put(self.url(&format!("/v1/payments/{payment_id}")))
                .bearer_auth(&self.access_token)
                .json(&body)
        })
        .await
    }

    /// Refund a payment. `None` refunds the full remaining amount.
    pub async fn refund(
        &self,
        payment_id: i64,
        amount: Option<Decimal>,
    ) -> Result<RefundReceipt, ServiceError> {
        let body = match amount {
            Some(amount) => json!({ "amount": amount }),
            None => json!({}),
        };
        self.execute("refund", || {
            self.http
                .post(self.url(&format!("/v1/payments/{payment_id}/refunds")))
                .bearer_auth(&self.access_token)
                .json(&body)
        })
        .await
    }

    /// Cancel a pending payment.
    pub async fn cancel(&self, payment_id: i64) -> Result<(), ServiceError> {
        let _: GatewayPayment = self
            .execute("cancel", || {
                self.http
                    .put(self.url(&format!("/v1/payments/{payment_id}")))
                    .bearer_auth(&self.access_token)
                    .json(&json!({ "status": "cancelled" }))
            })
            .await?;
        Ok(())
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        op: &'static str,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<T, ServiceError> {
        let response = self.send_with_retry(op, build).await?;
        Self::read_json(op, response).await
    }

    async fn send_with_retry(
        &self,
        op: &'static str,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ServiceError> {
        let mut attempt = 1u32;
        loop {
            debug!(op, attempt, "gateway request");
            match build().send().await {
                Ok(response) => return Ok(response),
                Err(err) if RetryPolicy::is_retryable(&err) => {
                    if attempt >= self.retry.max_attempts {
                        return Err(ServiceError::GatewayTimeout(format!(
                            "{op} timed out after {attempt} attempts: {err}"
                        )));
                    }
                    warn!(
                        op,
                        attempt,
                        error = %err,
                        "gateway request timed out, retrying"
                    );
                    tokio::time::sleep(self.retry.backoff).await;
                    attempt += 1;
                }
                Err(err) => {
                    return Err(ServiceError::GatewayRejection(format!("{op}: {err}")));
                }
            }
        }
    }

    async fn read_json<T: DeserializeOwned>(
        op: &'static str,
        response: reqwest::Response,
    ) -> Result<T, ServiceError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::GatewayRejection(format!(
                "{op}: gateway returned {status}: {body}"
            )));
        }
        response.json::<T>().await.map_err(|err| {
            ServiceError::GatewayRejection(format!("{op}: invalid response body: {err}"))
        })
    }
}
