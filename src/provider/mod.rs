//! MercadoPago provider adapter.
//!
//! Implements the payment-provider contract the order-management backend
//! expects: a state machine over a transaction's payment session, mapping
//! the gateway lifecycle onto initiate / authorize / capture / cancel /
//! refund / status operations. The adapter holds no per-request state; all
//! context travels in the session data blob and the store's ledger.

pub mod session;

pub use session::SessionData;

use crate::{
    errors::ServiceError,
    gateway::{
        types::{BackUrls, CheckoutRequest, PreferenceItem, PreferencePayer},
        GatewayPayment, MercadoPagoClient,
    },
    services::reconciler::WebhookAction,
    store::{InternalPayment, OrderStore},
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Immutable configuration the adapter needs beyond its collaborators.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Storefront base URL for checkout return links.
    pub store_url: String,
    /// Where the gateway should deliver payment notifications.
    pub notification_url: String,
    pub default_currency: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct InitiateRequest {
    pub amount: Decimal,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub payer_email: Option<String>,
    /// Explicit resource id to use as the gateway `external_reference`.
    #[serde(default)]
    pub resource_id: Option<String>,
    /// Checkout-session id, used as the reference when no resource id exists.
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub item_title: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct InitiateResult {
    pub preference_id: String,
    pub data: SessionData,
}

/// Outcome of a single authorization probe. A query failure surfaces as the
/// error of the call; polling cadence is the caller's responsibility.
#[derive(Debug, Clone)]
pub enum AuthorizeOutcome {
    Authorized { data: SessionData },
    Pending,
}

/// Where to look for the internal ledger payment backing a capture.
#[derive(Debug, Clone, Default)]
pub struct CaptureTarget {
    pub payment_id: Option<String>,
    pub payment_collection_id: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub amount: Decimal,
    pub target: CaptureTarget,
    /// Correlation hints from the caller, used when the ledger blob is sparse
    /// or no ledger payment resolves at all.
    pub data: SessionData,
}

#[derive(Debug, Clone)]
pub struct CaptureResult {
    pub data: SessionData,
    /// The captured ledger payment. `None` on the degraded path where no
    /// internal payment could be resolved: the capture is then recorded in
    /// session data only.
    pub payment: Option<InternalPayment>,
}

/// Session status as reported by the fixed contract. Authoritative state
/// lives in [`MercadoPagoProvider::authorize`]; once a session exists this
/// reports the optimistic value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Authorized,
}

#[derive(Clone)]
pub struct MercadoPagoProvider {
    gateway: Option<Arc<MercadoPagoClient>>,
    store: Arc<dyn OrderStore>,
    config: ProviderConfig,
}

impl MercadoPagoProvider {
    pub fn new(
        gateway: Option<Arc<MercadoPagoClient>>,
        store: Arc<dyn OrderStore>,
        config: ProviderConfig,
    ) -> Self {
        Self {
            gateway,
            store,
            config,
        }
    }

    fn gateway(&self) -> Result<&MercadoPagoClient, ServiceError> {
        self.gateway.as_deref().ok_or_else(|| {
            ServiceError::ConfigurationError(
                "MercadoPago access token is not configured".to_string(),
            )
        })
    }

    /// Start a payment session: create a checkout preference and hand back
    /// the redirect URL plus the correlation data later calls need.
    #[instrument(skip(self, request), fields(amount = %request.amount))]
    pub async fn initiate(&self, request: InitiateRequest) -> Result<InitiateResult, ServiceError> {
        let gateway = self.gateway()?;

        if request.amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "checkout amount must be greater than 0".to_string(),
            ));
        }

        let external_reference = request
            .resource_id
            .clone()
            .or_else(|| request.session_id.clone())
            .unwrap_or_else(fallback_reference);

        let currency = request
            .currency
            .unwrap_or_else(|| self.config.default_currency.clone());
        let store_url = self.config.store_url.trim_end_matches('/');

        let checkout = CheckoutRequest {
            items: vec![PreferenceItem {
                title: request
                    .item_title
                    .unwrap_or_else(|| format!("Order {external_reference}")),
                quantity: 1,
                unit_price: request.amount,
                currency_id: currency,
            }],
            payer: request.payer_email.map(|email| PreferencePayer { email }),
            external_reference: external_reference.clone(),
            notification_url: self.config.notification_url.clone(),
            back_urls: BackUrls {
                success: format!("{store_url}/checkout/success"),
                failure: format!("{store_url}/checkout/failure"),
                pending: format!("{store_url}/checkout/pending"),
            },
        };

        let preference = gateway.create_checkout(&checkout).await?;

        info!(
            preference_id = %preference.id,
            external_reference,
            "checkout preference created"
        );

        let data = SessionData {
            preference_id: Some(preference.id.clone()),
            init_point: Some(preference.init_point),
            resource_id: Some(external_reference),
            transaction_amount: Some(request.amount),
            ..Default::default()
        };

        Ok(InitiateResult {
            preference_id: preference.id,
            data,
        })
    }

    /// One authorization probe against the gateway: by known payment id when
    /// we have one, otherwise by searching the external reference and taking
    /// the most recently created approved record.
    #[instrument(skip(self, data))]
    pub async fn authorize(&self, data: &SessionData) -> Result<AuthorizeOutcome, ServiceError> {
        let gateway = self.gateway()?;

        if let Some(payment_id) = data.mp_payment_id {
            return match gateway.get_payment(payment_id).await? {
                Some(payment) if payment.is_settled() => {
                    Ok(AuthorizeOutcome::Authorized {
                        data: enrich(data, &payment),
                    })
                }
                _ => Ok(AuthorizeOutcome::Pending),
            };
        }

        let Some(reference) = data.resource_id.as_deref() else {
            warn!("session has neither payment id nor external reference; cannot authorize");
            return Ok(AuthorizeOutcome::Pending);
        };

        let results = gateway.search_payments_by_reference(reference).await?;
        let best = results
            .into_iter()
            .filter(|p| p.is_settled())
            .max_by_key(|p| p.date_created);

        match best {
            Some(payment) => {
                info!(
                    mp_payment_id = payment.id,
                    reference, "approved payment found by reference"
                );
                Ok(AuthorizeOutcome::Authorized {
                    data: enrich(data, &payment),
                })
            }
            None => Ok(AuthorizeOutcome::Pending),
        }
    }

    /// Record collected funds on the internal ledger, finalizing the amount
    /// first since the store's capture reads the stored amount.
    ///
    /// A capture with no resolvable ledger payment is degraded but not
    /// fatal: session data is updated and the ledger is left for later
    /// reconciliation.
    #[instrument(skip(self, request), fields(amount = %request.amount))]
    pub async fn capture_payment(
        &self,
        request: CaptureRequest,
    ) -> Result<CaptureResult, ServiceError> {
        if request.amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "capture amount must be greater than 0".to_string(),
            ));
        }

        let target = self.resolve_capture_target(&request.target).await?;

        let mut data = match &target {
            Some(payment) => {
                let mut data = SessionData::from_value(&payment.data)?;
                data.merge_missing(&request.data);
                data
            }
            None => request.data.clone(),
        };

        // Collect the authorized funds at the gateway when we know the payment.
        if let Some(mp_payment_id) = data.mp_payment_id {
            let captured: GatewayPayment = self
                .gateway()?
                .capture(mp_payment_id, Some(request.amount))
                .await?;
            info!(
                mp_payment_id,
                status = ?captured.status,
                "gateway capture accepted"
            );
        }

        data.transaction_amount = Some(request.amount);

        match target {
            Some(payment) => {
                self.store
                    .set_payment_amount(&payment.id, request.amount)
                    .await?;
                let captured = self.store.capture_payment(&payment.id).await?;
                self.store
                    .update_payment_data(&payment.id, data.to_value()?)
                    .await?;

                info!(
                    payment_id = %payment.id,
                    amount = %request.amount,
                    "ledger payment captured"
                );
                Ok(CaptureResult {
                    data,
                    payment: Some(captured),
                })
            }
            None => {
                warn!(
                    amount = %request.amount,
                    session_id = request.target.session_id.as_deref().unwrap_or(""),
                    "no ledger payment resolved for capture; recording in session data only"
                );
                Ok(CaptureResult {
                    data,
                    payment: None,
                })
            }
        }
    }

    /// Best-effort cancellation. The surrounding workflow must never block
    /// on gateway cancellation, so failures are logged and swallowed.
    #[instrument(skip(self, data))]
    pub async fn cancel_payment(&self, data: &SessionData) -> SessionData {
        if let Some(mp_payment_id) = data.mp_payment_id {
            match self.gateway() {
                Ok(gateway) => {
                    if let Err(err) = gateway.cancel(mp_payment_id).await {
                        warn!(mp_payment_id, %err, "gateway cancellation failed; continuing");
                    }
                }
                Err(err) => {
                    warn!(%err, "gateway not configured; skipping cancellation");
                }
            }
        }
        data.clone()
    }

    pub async fn delete_payment(&self, data: &SessionData) -> SessionData {
        self.cancel_payment(data).await
    }

    /// Refund against the gateway. Unlike cancel, refund failures propagate:
    /// this is a synchronous user-initiated action that must report failure.
    #[instrument(skip(self, data))]
    pub async fn refund_payment(
        &self,
        data: &SessionData,
        amount: Option<Decimal>,
    ) -> Result<SessionData, ServiceError> {
        let mp_payment_id = data.mp_payment_id.ok_or_else(|| {
            ServiceError::MissingReference(
                "refund requires a known gateway payment id".to_string(),
            )
        })?;

        let amount = amount.or(data.transaction_amount).ok_or_else(|| {
            ServiceError::ValidationError(
                "refund amount unknown: no explicit amount and no recorded transaction amount"
                    .to_string(),
            )
        })?;
        if amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "refund amount must be greater than 0".to_string(),
            ));
        }

        let receipt = self.gateway()?.refund(mp_payment_id, Some(amount)).await?;

        let mut updated = data.clone();
        updated.amount_refunded =
            Some(updated.amount_refunded.unwrap_or(Decimal::ZERO) + amount);

        info!(
            mp_payment_id,
            refund_id = receipt.id,
            amount = %amount,
            total_refunded = %updated.amount_refunded.unwrap_or_default(),
            "refund accepted by gateway"
        );

        Ok(updated)
    }

    /// Fixed optimistic status once a session exists; authoritative state
    /// lives in [`Self::authorize`].
    pub fn get_payment_status(&self, data: &SessionData) -> SessionStatus {
        if data.preference_id.is_some() {
            SessionStatus::Authorized
        } else {
            SessionStatus::Pending
        }
    }

    pub fn retrieve_payment(&self, data: &SessionData) -> SessionData {
        data.clone()
    }

    /// Idempotent regeneration of the checkout link.
    pub async fn update_payment(
        &self,
        request: InitiateRequest,
    ) -> Result<InitiateResult, ServiceError> {
        self.initiate(request).await
    }

    /// Normalize an inbound notification payload into an action, or
    /// `Unparseable` when no known shape matches.
    pub fn webhook_action_and_data(&self, payload: &serde_json::Value) -> WebhookAction {
        WebhookAction::parse(payload)
    }

    /// Capture target resolution order: explicit payment id, then the
    /// payment collection, then the collection behind the checkout session.
    async fn resolve_capture_target(
        &self,
        target: &CaptureTarget,
    ) -> Result<Option<InternalPayment>, ServiceError> {
        if let Some(payment_id) = target.payment_id.as_deref() {
            if let Some(payment) = self.store.find_payment(payment_id).await? {
                return Ok(Some(payment));
            }
            warn!(payment_id, "explicit capture target not found in ledger");
        }

        if let Some(collection_id) = target.payment_collection_id.as_deref() {
            let payments = self.store.payments_for_collection(collection_id).await?;
            if let Some(payment) = pick_capture_candidate(payments) {
                return Ok(Some(payment));
            }
        }

        if let Some(session_id) = target.session_id.as_deref() {
            if let Some(session) = self.store.checkout_session(session_id).await? {
                if let Some(collection_id) = session.payment_collection_id.as_deref() {
                    let payments = self.store.payments_for_collection(collection_id).await?;
                    if let Some(payment) = pick_capture_candidate(payments) {
                        return Ok(Some(payment));
                    }
                }
            }
        }

        Ok(None)
    }
}

/// Prefer an uncaptured payment; re-capture of a fully captured collection
/// targets the first record so repeated requests stay stable.
fn pick_capture_candidate(payments: Vec<InternalPayment>) -> Option<InternalPayment> {
    let uncaptured = payments.iter().position(|p| p.captured_at.is_none());
    match uncaptured {
        Some(index) => payments.into_iter().nth(index),
        None => payments.into_iter().next(),
    }
}

fn enrich(data: &SessionData, payment: &GatewayPayment) -> SessionData {
    let mut enriched = data.clone();
    enriched.mp_payment_id = Some(payment.id);
    enriched.transaction_amount = Some(payment.transaction_amount);
    enriched
}

/// Unique fallback when neither a resource id nor a session id was supplied.
fn fallback_reference() -> String {
    let tag = Uuid::new_v4().simple().to_string();
    format!("ref-{}-{}", &tag[..8], Utc::now().timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CheckoutSession, PaymentCollection};
    use async_trait::async_trait;

    /// Store stub for operations that never reach the store.
    struct EmptyStore;

    #[async_trait]
    impl OrderStore for EmptyStore {
        async fn checkout_session(
            &self,
            _id: &str,
        ) -> Result<Option<CheckoutSession>, ServiceError> {
            Ok(None)
        }
        async fn payment_collection(
            &self,
            _id: &str,
        ) -> Result<Option<PaymentCollection>, ServiceError> {
            Ok(None)
        }
        async fn collection_for_order(
            &self,
            _order_id: &str,
        ) -> Result<Option<PaymentCollection>, ServiceError> {
            Ok(None)
        }
        async fn payments_for_collection(
            &self,
            _collection_id: &str,
        ) -> Result<Vec<InternalPayment>, ServiceError> {
            Ok(vec![])
        }
        async fn find_payment(
            &self,
            _payment_id: &str,
        ) -> Result<Option<InternalPayment>, ServiceError> {
            Ok(None)
        }
        async fn set_payment_amount(
            &self,
            _payment_id: &str,
            _amount: Decimal,
        ) -> Result<(), ServiceError> {
            Ok(())
        }
        async fn capture_payment(
            &self,
            _payment_id: &str,
        ) -> Result<InternalPayment, ServiceError> {
            Err(ServiceError::NotFound("no payments".to_string()))
        }
        async fn update_payment_data(
            &self,
            _payment_id: &str,
            _data: serde_json::Value,
        ) -> Result<(), ServiceError> {
            Ok(())
        }
        async fn complete_transaction(
            &self,
            _transaction_id: &str,
        ) -> Result<String, ServiceError> {
            Err(ServiceError::NotFound("no transactions".to_string()))
        }
        async fn set_order_payment_status(
            &self,
            _order_id: &str,
            _status: &str,
        ) -> Result<(), ServiceError> {
            Ok(())
        }
        async fn set_order_captured_total(
            &self,
            _order_id: &str,
            _total: Decimal,
        ) -> Result<(), ServiceError> {
            Ok(())
        }
    }

    fn bare_provider() -> MercadoPagoProvider {
        MercadoPagoProvider::new(
            None,
            Arc::new(EmptyStore),
            ProviderConfig {
                store_url: "https://shop.example.com".to_string(),
                notification_url: "https://payments.example.com/webhook".to_string(),
                default_currency: "ARS".to_string(),
            },
        )
    }

    #[test]
    fn fallback_references_are_unique() {
        let a = fallback_reference();
        let b = fallback_reference();
        assert_ne!(a, b);
        assert!(a.starts_with("ref-"));
    }

    #[test]
    fn status_is_optimistic_once_session_exists() {
        let provider = bare_provider();

        assert_eq!(
            provider.get_payment_status(&SessionData::default()),
            SessionStatus::Pending
        );
        assert_eq!(
            provider.get_payment_status(&SessionData {
                preference_id: Some("123-abc".to_string()),
                ..Default::default()
            }),
            SessionStatus::Authorized
        );
    }

    #[tokio::test]
    async fn operations_without_credential_fail_with_configuration_error() {
        let provider = bare_provider();
        let data = SessionData {
            mp_payment_id: Some(7),
            transaction_amount: Some(Decimal::ONE),
            ..Default::default()
        };

        let err = provider.authorize(&data).await.unwrap_err();
        assert!(matches!(err, ServiceError::ConfigurationError(_)));

        let err = provider.refund_payment(&data, None).await.unwrap_err();
        assert!(matches!(err, ServiceError::ConfigurationError(_)));
    }

    #[test]
    fn capture_candidate_prefers_uncaptured() {
        use chrono::Utc;
        let captured = InternalPayment {
            id: "pay_1".into(),
            amount: Decimal::ONE,
            captured_amount: Some(Decimal::ONE),
            captured_at: Some(Utc::now()),
            payment_collection_id: "pcol_1".into(),
            data: serde_json::Value::Null,
        };
        let open = InternalPayment {
            id: "pay_2".into(),
            amount: Decimal::ONE,
            captured_amount: None,
            captured_at: None,
            payment_collection_id: "pcol_1".into(),
            data: serde_json::Value::Null,
        };

        let picked = pick_capture_candidate(vec![captured.clone(), open]).unwrap();
        assert_eq!(picked.id, "pay_2");

        let picked = pick_capture_candidate(vec![captured]).unwrap();
        assert_eq!(picked.id, "pay_1");

        assert!(pick_capture_candidate(vec![]).is_none());
    }
}
