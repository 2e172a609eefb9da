//! Payments Reconciler Library
//!
//! Reconciles payment state between the MercadoPago gateway and the
//! order-management backend when the two are updated asynchronously and out
//! of order.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod openapi;
pub mod provider;
pub mod resolver;
pub mod services;
pub mod store;

use axum::{extract::State, response::Json, routing::get, Router};
use gateway::MercadoPagoClient;
use provider::{MercadoPagoProvider, ProviderConfig};
use resolver::SessionResolver;
use serde::Serialize;
use serde_json::{json, Value};
use services::reconciler::WebhookReconciler;
use std::sync::Arc;
use std::time::Duration;
use store::OrderStore;
use utoipa::ToSchema;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub config: config::AppConfig,
    pub gateway: Option<Arc<MercadoPagoClient>>,
    pub store: Arc<dyn OrderStore>,
    pub event_sender: events::EventSender,
}

impl AppState {
    /// Compose state from configuration and collaborators. The gateway
    /// client exists only when an access token is configured; operations
    /// that need it surface a configuration error.
    pub fn new(
        config: config::AppConfig,
        store: Arc<dyn OrderStore>,
        event_sender: events::EventSender,
    ) -> Self {
        let gateway = config.mp_access_token.as_ref().map(|token| {
            Arc::new(MercadoPagoClient::new(
                token.clone(),
                config.gateway_base_url.clone(),
                Duration::from_secs(config.gateway_timeout_secs),
            ))
        });
        Self {
            config,
            gateway,
            store,
            event_sender,
        }
    }

    pub fn provider(&self) -> MercadoPagoProvider {
        MercadoPagoProvider::new(
            self.gateway.clone(),
            self.store.clone(),
            ProviderConfig {
                store_url: self.config.store_url.clone(),
                notification_url: self.config.notification_url(),
                default_currency: self.config.default_currency.clone(),
            },
        )
    }

    pub fn reconciler(&self) -> WebhookReconciler {
        WebhookReconciler::new(
            self.gateway.clone(),
            self.store.clone(),
            self.event_sender.clone(),
        )
    }

    pub fn resolver(&self) -> SessionResolver {
        SessionResolver::new(self.store.clone())
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    /// ISO 8601 response timestamp
    pub timestamp: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

// Enhanced API routes function
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        // Status and health endpoints
        .route("/status", get(api_status))
        .route("/health", get(health_check))
        // Payments API: capture, refund, status probe, inbound webhook
        .nest("/payments", handlers::payments::payment_routes())
        // Checkout API
        .nest("/checkout", handlers::checkout::checkout_routes())
}

async fn api_status() -> Result<Json<ApiResponse<Value>>, errors::ServiceError> {
    let version = env!("CARGO_PKG_VERSION");
    let status_data = json!({
        "status": "ok",
        "version": version,
        "service": "payments-reconciler",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "environment": std::env::var("RUN_ENV").unwrap_or_else(|_| "development".to_string()),
    });

    Ok(Json(ApiResponse::success(status_data)))
}

async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Value>>, errors::ServiceError> {
    // Check order-management backend connectivity
    let store_status = match state.store.ping().await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };

    let health_data = json!({
        "status": if store_status == "healthy" { "healthy" } else { "unhealthy" },
        "checks": {
            "order_store": store_status,
            "gateway": if state.gateway.is_some() { "configured" } else { "unconfigured" },
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(health_data)))
}
