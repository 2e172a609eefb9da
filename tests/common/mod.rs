//! Shared test harness: an in-memory order store, a wiremock-backed gateway,
//! and an application router wired like production.
#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, Response},
    Router,
};
use chrono::Utc;
use payments_reconciler::{
    api_v1_routes,
    config::AppConfig,
    errors::ServiceError,
    events::{process_events, EventSender},
    services::repair::RepairTask,
    store::{CheckoutSession, InternalPayment, OrderStore, PaymentCollection},
    AppState,
};
use rust_decimal::Decimal;
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use wiremock::MockServer;

#[derive(Default)]
pub struct StoreState {
    pub sessions: HashMap<String, CheckoutSession>,
    pub collections: HashMap<String, PaymentCollection>,
    pub payments: HashMap<String, InternalPayment>,
    /// transaction id -> order id for completed transactions
    pub completed: HashMap<String, String>,
    /// order id -> collection id, populated at completion unless disabled
    pub order_collections: HashMap<String, String>,
    pub order_payment_status: HashMap<String, String>,
    pub order_captured_total: HashMap<String, Decimal>,
    /// Ordered log of ledger mutations, for asserting call sequences
    pub ops: Vec<String>,
    pub completion_attempts: u32,
    pub lookups: u32,
    pub fail_status_write: bool,
    pub fail_total_write: bool,
    pub link_collections_on_complete: bool,
}

/// In-memory stand-in for the order-management backend.
#[derive(Default)]
pub struct InMemoryStore {
    pub state: Mutex<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        let store = Self::default();
        store.state.lock().unwrap().link_collections_on_complete = true;
        store
    }

    pub fn seed_session(&self, id: &str, collection_id: Option<&str>) {
        self.state.lock().unwrap().sessions.insert(
            id.to_string(),
            CheckoutSession {
                id: id.to_string(),
                payment_collection_id: collection_id.map(str::to_string),
            },
        );
    }

    pub fn seed_collection(&self, id: &str, transaction_id: Option<&str>, order_id: Option<&str>) {
        self.state.lock().unwrap().collections.insert(
            id.to_string(),
            PaymentCollection {
                id: id.to_string(),
                transaction_id: transaction_id.map(str::to_string),
                order_id: order_id.map(str::to_string),
            },
        );
    }

    pub fn seed_payment(&self, payment: InternalPayment) {
        self.state
            .lock()
            .unwrap()
            .payments
            .insert(payment.id.clone(), payment);
    }

    pub fn seed_order_collection(&self, order_id: &str, collection_id: &str) {
        self.state
            .lock()
            .unwrap()
            .order_collections
            .insert(order_id.to_string(), collection_id.to_string());
    }

    pub fn ops(&self) -> Vec<String> {
        self.state.lock().unwrap().ops.clone()
    }

    pub fn completion_attempts(&self) -> u32 {
        self.state.lock().unwrap().completion_attempts
    }

    pub fn completed_orders(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .completed
            .values()
            .cloned()
            .collect()
    }

    pub fn lookups(&self) -> u32 {
        self.state.lock().unwrap().lookups
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn checkout_session(&self, id: &str) -> Result<Option<CheckoutSession>, ServiceError> {
        let mut state = self.state.lock().unwrap();
        state.lookups += 1;
        Ok(state.sessions.get(id).cloned())
    }

    async fn payment_collection(
        &self,
        id: &str,
    ) -> Result<Option<PaymentCollection>, ServiceError> {
        let mut state = self.state.lock().unwrap();
        state.lookups += 1;
        Ok(state.collections.get(id).cloned())
    }

    async fn collection_for_order(
        &self,
        order_id: &str,
    ) -> Result<Option<PaymentCollection>, ServiceError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .order_collections
            .get(order_id)
            .and_then(|cid| state.collections.get(cid))
            .cloned())
    }

    async fn payments_for_collection(
        &self,
        collection_id: &str,
    ) -> Result<Vec<InternalPayment>, ServiceError> {
        let state = self.state.lock().unwrap();
        let mut payments: Vec<_> = state
            .payments
            .values()
            .filter(|p| p.payment_collection_id == collection_id)
            .cloned()
            .collect();
        payments.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(payments)
    }

    async fn find_payment(
        &self,
        payment_id: &str,
    ) -> Result<Option<InternalPayment>, ServiceError> {
        Ok(self.state.lock().unwrap().payments.get(payment_id).cloned())
    }

    async fn set_payment_amount(
        &self,
        payment_id: &str,
        amount: Decimal,
    ) -> Result<(), ServiceError> {
        let mut state = self.state.lock().unwrap();
        state.ops.push(format!("set_amount {payment_id} {amount}"));
        match state.payments.get_mut(payment_id) {
            Some(payment) => {
                payment.amount = amount;
                Ok(())
            }
            None => Err(ServiceError::NotFound(format!(
                "payment {payment_id} not found"
            ))),
        }
    }

    async fn capture_payment(&self, payment_id: &str) -> Result<InternalPayment, ServiceError> {
        let mut state = self.state.lock().unwrap();
        state.ops.push(format!("capture {payment_id}"));
        match state.payments.get_mut(payment_id) {
            Some(payment) => {
                payment.captured_amount = Some(payment.amount);
                payment.captured_at = Some(Utc::now());
                Ok(payment.clone())
            }
            None => Err(ServiceError::NotFound(format!(
                "payment {payment_id} not found"
            ))),
        }
    }

    async fn update_payment_data(
        &self,
        payment_id: &str,
        data: Value,
    ) -> Result<(), ServiceError> {
        let mut state = self.state.lock().unwrap();
        state.ops.push(format!("update_data {payment_id}"));
        match state.payments.get_mut(payment_id) {
            Some(payment) => {
                payment.data = data;
                Ok(())
            }
            None => Err(ServiceError::NotFound(format!(
                "payment {payment_id} not found"
            ))),
        }
    }

    async fn complete_transaction(&self, transaction_id: &str) -> Result<String, ServiceError> {
        let mut state = self.state.lock().unwrap();
        state.completion_attempts += 1;

        if state.completed.contains_key(transaction_id) {
            return Err(ServiceError::ExternalServiceError(format!(
                "transaction {transaction_id} has already been completed"
            )));
        }

        let order_id = transaction_id.replacen("txn_", "ord_", 1);
        state
            .completed
            .insert(transaction_id.to_string(), order_id.clone());

        if state.link_collections_on_complete {
            let linked: Option<String> = state
                .collections
                .values()
                .find(|c| c.transaction_id.as_deref() == Some(transaction_id))
                .map(|c| c.id.clone());
            if let Some(collection_id) = linked {
                state
                    .order_collections
                    .insert(order_id.clone(), collection_id);
            }
        }

        Ok(order_id)
    }

    async fn set_order_payment_status(
        &self,
        order_id: &str,
        status: &str,
    ) -> Result<(), ServiceError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_status_write {
            return Err(ServiceError::ExternalServiceError(
                "status write rejected".to_string(),
            ));
        }
        state.ops.push(format!("order_status {order_id} {status}"));
        state
            .order_payment_status
            .insert(order_id.to_string(), status.to_string());
        Ok(())
    }

    async fn set_order_captured_total(
        &self,
        order_id: &str,
        total: Decimal,
    ) -> Result<(), ServiceError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_total_write {
            return Err(ServiceError::ExternalServiceError(
                "total write rejected".to_string(),
            ));
        }
        state.ops.push(format!("order_total {order_id} {total}"));
        state
            .order_captured_total
            .insert(order_id.to_string(), total);
        Ok(())
    }
}

pub fn test_config(gateway_base_url: String) -> AppConfig {
    AppConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        environment: "test".to_string(),
        log_level: "warn".to_string(),
        log_json: false,
        mp_access_token: Some("TEST-access-token".to_string()),
        mp_public_key: None,
        gateway_base_url,
        gateway_timeout_secs: 5,
        store_url: "https://shop.example.com".to_string(),
        backend_url: "https://payments.example.com".to_string(),
        store_api_url: "http://unused.invalid".to_string(),
        webhook_secret: None,
        webhook_tolerance_secs: 300,
        default_currency: "ARS".to_string(),
        cors_allowed_origins: None,
    }
}

/// Full application wired like production, with the gateway mocked and the
/// order store in memory.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<InMemoryStore>,
    pub gateway: MockServer,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config_mut(|_| {}).await
    }

    pub async fn with_config_mut(mutate: impl FnOnce(&mut AppConfig)) -> Self {
        let gateway = MockServer::start().await;
        let mut cfg = test_config(gateway.uri());
        mutate(&mut cfg);

        let store = Arc::new(InMemoryStore::new());
        let store_dyn: Arc<dyn OrderStore> = store.clone();

        let (event_tx, event_rx) = mpsc::channel(64);
        let event_sender = EventSender::new(event_tx);
        let repair = Arc::new(RepairTask::new(store_dyn.clone()));
        let event_task = tokio::spawn(process_events(event_rx, repair));

        let state = AppState::new(cfg, store_dyn, event_sender);
        let router = Router::new()
            .nest("/api/v1", api_v1_routes())
            .with_state(state.clone());

        Self {
            router,
            state,
            store,
            gateway,
            _event_task: event_task,
        }
    }

    pub async fn post_json(&self, path: &str, body: Value) -> Response<Body> {
        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("response")
    }

    pub async fn get(&self, path: &str) -> Response<Body> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Body::empty())
            .expect("request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("response")
    }
}

pub async fn response_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// A ledger payment with sensible defaults for seeding.
pub fn payment(id: &str, collection_id: &str, amount: Decimal) -> InternalPayment {
    InternalPayment {
        id: id.to_string(),
        amount,
        captured_amount: None,
        captured_at: None,
        payment_collection_id: collection_id.to_string(),
        data: Value::Null,
    }
}

/// Gateway payment JSON as the mock server should report it.
pub fn gateway_payment_json(
    id: i64,
    status: &str,
    amount: &str,
    external_reference: Option<&str>,
    date_created: &str,
) -> Value {
    let mut payment = serde_json::json!({
        "id": id,
        "status": status,
        "transaction_amount": amount,
        "currency_id": "ARS",
        "date_created": date_created,
    });
    if let Some(reference) = external_reference {
        payment["external_reference"] = Value::String(reference.to_string());
    }
    payment
}
