//! Narrow interface to the order-management backend.
//!
//! The store owns transactions, orders, payment collections, and the payment
//! ledger. This service never touches those records directly: every mutation
//! goes through the operations documented here, and correctness under
//! concurrent webhooks comes from those operations being idempotent rather
//! than from any locking on our side.

use crate::errors::ServiceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

/// Store id prefixes. A reference's prefix tells us which entity it names
/// without a lookup.
pub const TRANSACTION_PREFIX: &str = "txn_";
pub const ORDER_PREFIX: &str = "ord_";
pub const SESSION_PREFIX: &str = "chk_";

/// Checkout session minted by the store when a customer begins payment.
/// Superseded once a concrete transaction id is resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub payment_collection_id: Option<String>,
}

/// Groups the payments backing one transaction/order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCollection {
    pub id: String,
    /// Pre-completion transaction the collection belongs to, when still open.
    #[serde(default)]
    pub transaction_id: Option<String>,
    /// Order the collection belongs to, once completed.
    #[serde(default)]
    pub order_id: Option<String>,
}

/// A payment record in the store's ledger.
///
/// `captured_amount` is set only by an explicit capture call; it is distinct
/// from the amount requested at initiation. The `data` blob holds the
/// gateway correlation fields managed by the provider adapter.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct InternalPayment {
    pub id: String,
    pub amount: Decimal,
    #[serde(default)]
    pub captured_amount: Option<Decimal>,
    #[serde(default)]
    pub captured_at: Option<DateTime<Utc>>,
    pub payment_collection_id: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub data: serde_json::Value,
}

/// Signature check for the store's "already completed" completion failure.
///
/// Completion is one-way and the store reports a duplicate attempt as an
/// error; callers must treat that error as success.
pub fn is_already_completed(err: &ServiceError) -> bool {
    let message = err.to_string().to_ascii_lowercase();
    message.contains("already completed") || message.contains("already been completed")
}

/// Operations the order-management backend exposes to payment integrations.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn checkout_session(&self, id: &str) -> Result<Option<CheckoutSession>, ServiceError>;

    async fn payment_collection(&self, id: &str)
        -> Result<Option<PaymentCollection>, ServiceError>;

    /// The collection attached to a completed order, when one exists.
    async fn collection_for_order(
        &self,
        order_id: &str,
    ) -> Result<Option<PaymentCollection>, ServiceError>;

    async fn payments_for_collection(
        &self,
        collection_id: &str,
    ) -> Result<Vec<InternalPayment>, ServiceError>;

    async fn find_payment(&self, payment_id: &str)
        -> Result<Option<InternalPayment>, ServiceError>;

    /// Finalize the amount on a ledger payment. Must run before capture:
    /// capture records whatever amount is stored at that moment.
    async fn set_payment_amount(
        &self,
        payment_id: &str,
        amount: Decimal,
    ) -> Result<(), ServiceError>;

    async fn capture_payment(&self, payment_id: &str) -> Result<InternalPayment, ServiceError>;

    async fn update_payment_data(
        &self,
        payment_id: &str,
        data: serde_json::Value,
    ) -> Result<(), ServiceError>;

    /// Turn a transaction into an order. Returns the order id. A transaction
    /// that was completed earlier fails with the "already completed"
    /// signature recognized by [`is_already_completed`].
    async fn complete_transaction(&self, transaction_id: &str) -> Result<String, ServiceError>;

    async fn set_order_payment_status(
        &self,
        order_id: &str,
        status: &str,
    ) -> Result<(), ServiceError>;

    async fn set_order_captured_total(
        &self,
        order_id: &str,
        total: Decimal,
    ) -> Result<(), ServiceError>;

    async fn ping(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

/// HTTP implementation against the order-management backend's REST API.
#[derive(Debug, Clone)]
pub struct HttpOrderStore {
    http: reqwest::Client,
    base_url: String,
}

impl HttpOrderStore {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("reqwest client construction cannot fail with static options"),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_optional<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<T>, ServiceError> {
        let response = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("GET {path}: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::read_json(path, response).await.map(Some)
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        path: &str,
        response: reqwest::Response,
    ) -> Result<T, ServiceError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::ExternalServiceError(format!(
                "{path}: store returned {status}: {body}"
            )));
        }
        response.json::<T>().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("{path}: invalid response body: {e}"))
        })
    }

    async fn send_json(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, ServiceError> {
        let response = self
            .http
            .request(method.clone(), self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("{method} {path}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::ExternalServiceError(format!(
                "{path}: store returned {status}: {body}"
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl OrderStore for HttpOrderStore {
    async fn checkout_session(&self, id: &str) -> Result<Option<CheckoutSession>, ServiceError> {
        self.get_optional(&format!("/checkout-sessions/{id}")).await
    }

    async fn payment_collection(
        &self,
        id: &str,
    ) -> Result<Option<PaymentCollection>, ServiceError> {
        self.get_optional(&format!("/payment-collections/{id}"))
            .await
    }

    async fn collection_for_order(
        &self,
        order_id: &str,
    ) -> Result<Option<PaymentCollection>, ServiceError> {
        self.get_optional(&format!("/orders/{order_id}/payment-collection"))
            .await
    }

    async fn payments_for_collection(
        &self,
        collection_id: &str,
    ) -> Result<Vec<InternalPayment>, ServiceError> {
        let path = format!("/payment-collections/{collection_id}/payments");
        Ok(self
            .get_optional::<Vec<InternalPayment>>(&path)
            .await?
            .unwrap_or_default())
    }

    async fn find_payment(
        &self,
        payment_id: &str,
    ) -> Result<Option<InternalPayment>, ServiceError> {
        self.get_optional(&format!("/payments/{payment_id}")).await
    }

    async fn set_payment_amount(
        &self,
        payment_id: &str,
        amount: Decimal,
    ) -> Result<(), ServiceError> {
        self.send_json(
            reqwest::Method::POST,
            &format!("/payments/{payment_id}/amount"),
            &json!({ "amount": amount }),
        )
        .await?;
        Ok(())
    }

    async fn capture_payment(&self, payment_id: &str) -> Result<InternalPayment, ServiceError> {
        let path = format!("/payments/{payment_id}/capture");
        let response = self
            .send_json(reqwest::Method::POST, &path, &json!({}))
            .await?;
        Self::read_json(&path, response).await
    }

    async fn update_payment_data(
        &self,
        payment_id: &str,
        data: serde_json::Value,
    ) -> Result<(), ServiceError> {
        self.send_json(
            reqwest::Method::POST,
            &format!("/payments/{payment_id}/data"),
            &json!({ "data": data }),
        )
        .await?;
        Ok(())
    }

    async fn complete_transaction(&self, transaction_id: &str) -> Result<String, ServiceError> {
        #[derive(Deserialize)]
        struct Completed {
            order_id: String,
        }

        let path = format!("/transactions/{transaction_id}/complete");
        let response = self
            .send_json(reqwest::Method::POST, &path, &json!({}))
            .await?;
        let completed: Completed = Self::read_json(&path, response).await?;
        Ok(completed.order_id)
    }

    async fn set_order_payment_status(
        &self,
        order_id: &str,
        status: &str,
    ) -> Result<(), ServiceError> {
        self.send_json(
            reqwest::Method::PUT,
            &format!("/orders/{order_id}/payment-status"),
            &json!({ "status": status }),
        )
        .await?;
        Ok(())
    }

    async fn set_order_captured_total(
        &self,
        order_id: &str,
        total: Decimal,
    ) -> Result<(), ServiceError> {
        self.send_json(
            reqwest::Method::PUT,
            &format!("/orders/{order_id}/captured-total"),
            &json!({ "total": total }),
        )
        .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), ServiceError> {
        let response = self
            .http
            .get(self.url("/health"))
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("store ping: {e}")))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ServiceError::ExternalServiceError(format!(
                "store ping returned {}",
                response.status()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_completed_signature_matches_store_messages() {
        let err = ServiceError::ExternalServiceError(
            "/transactions/txn_1/complete: store returned 409 Conflict: \
             transaction txn_1 has already been completed"
                .to_string(),
        );
        assert!(is_already_completed(&err));

        let err =
            ServiceError::ExternalServiceError("Transaction already completed".to_string());
        assert!(is_already_completed(&err));

        let err = ServiceError::ExternalServiceError("transaction not found".to_string());
        assert!(!is_already_completed(&err));
    }
}
