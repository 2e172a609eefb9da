use std::{sync::Arc, time::Duration};

use anyhow::Context;
use axum::{routing::get, Router};
use http::HeaderValue;
use tokio::{signal, sync::mpsc};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

use payments_reconciler as api;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Order-management backend collaborator
    let store: Arc<dyn api::store::OrderStore> = Arc::new(api::store::HttpOrderStore::new(
        cfg.store_api_url.clone(),
        Duration::from_secs(cfg.gateway_timeout_secs),
    ));

    // Init events
    let (event_tx, event_rx) = mpsc::channel(1024);
    let event_sender = api::events::EventSender::new(event_tx);

    // Spawn event processor; completion events drive the repair task
    let repair = Arc::new(api::services::repair::RepairTask::new(store.clone()));
    tokio::spawn(api::events::process_events(event_rx, repair));

    // Compose shared app state
    let app_state = api::AppState::new(cfg.clone(), store, event_sender);
    if app_state.gateway.is_none() {
        warn!(
            "MercadoPago access token not configured; gateway operations will fail until \
             APP__MP_ACCESS_TOKEN is set"
        );
    }

    // Build CORS layer from config
    let configured_origins: Option<Vec<HeaderValue>> = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        HeaderValue::from_str(trimmed).ok()
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    let cors_layer = if let Some(origins) = configured_origins {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        if !cfg.is_development() {
            warn!("No CORS origins configured; falling back to permissive CORS");
        }
        CorsLayer::permissive()
    };

    // Build router: status/health + v1 API + Swagger UI
    let app = Router::new()
        .route("/", get(|| async { "payments-reconciler up" }))
        .nest("/api/v1", api::api_v1_routes())
        .merge(api::openapi::swagger_ui())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(TimeoutLayer::new(Duration::from_secs(30)))
                .layer(cors_layer),
        )
        .with_state(app_state);

    let addr = cfg.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "payments-reconciler listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(%err, "failed to install shutdown signal handler");
        return;
    }
    info!("shutdown signal received");
}
