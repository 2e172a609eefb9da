//! Webhook reconciliation engine.
//!
//! Notifications arrive at-least-once, out of order, and under several
//! payload schemas. Reconciliation never trusts the payload beyond the
//! payment id it names: authoritative status is re-fetched from the gateway
//! on every attempt, and completion is idempotent, so redelivery and
//! reordering are safe without any seen-event log.

use crate::{
    events::{Event, EventSender},
    gateway::{MercadoPagoClient, PaymentStatus},
    resolver::{Resolution, SessionResolver},
    store::{is_already_completed, OrderStore, SESSION_PREFIX},
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

/// Normalized form of an inbound notification.
///
/// Parsing tries each known schema in a fixed priority order; downstream
/// code never re-inspects the raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookAction {
    Payment { payment_id: i64 },
    NotPayment { topic: String },
    Unparseable,
}

impl WebhookAction {
    pub fn parse(payload: &Value) -> Self {
        // Shape 1: {"type": "payment", "data": {"id": ...}}
        if let Some(topic) = payload.get("type").and_then(Value::as_str) {
            return Self::classify(topic, data_id(payload));
        }

        // Shape 2: {"topic": "payment", "data": {"id": ...}}
        // Shape 3: {"topic": "payment", "resource": "<id or URL>"}
        if let Some(topic) = payload.get("topic").and_then(Value::as_str) {
            let id = data_id(payload).or_else(|| {
                payload
                    .get("resource")
                    .and_then(Value::as_str)
                    .and_then(resource_id)
            });
            return Self::classify(topic, id);
        }

        // Shape 4: {"resource": "<id or URL>"} with no topic at all.
        if let Some(resource) = payload.get("resource").and_then(Value::as_str) {
            return Self::classify("payment", resource_id(resource));
        }

        Self::Unparseable
    }

    fn classify(topic: &str, payment_id: Option<i64>) -> Self {
        if !topic.eq_ignore_ascii_case("payment") {
            return Self::NotPayment {
                topic: topic.to_string(),
            };
        }
        match payment_id {
            Some(payment_id) => Self::Payment { payment_id },
            None => Self::Unparseable,
        }
    }
}

fn data_id(payload: &Value) -> Option<i64> {
    numeric_id(payload.get("data")?.get("id")?)
}

fn numeric_id(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str()?.trim().parse().ok())
}

/// A resource is either the bare payment id or a URL whose trailing path
/// segment is the id.
fn resource_id(resource: &str) -> Option<i64> {
    let trimmed = resource.trim();
    if let Ok(id) = trimmed.parse() {
        return Some(id);
    }
    let url = Url::parse(trimmed).ok()?;
    url.path_segments()?
        .filter(|segment| !segment.is_empty())
        .next_back()?
        .parse()
        .ok()
}

/// Terminal state of one notification. Every variant is acknowledged with a
/// 2xx; the distinction exists for logging and tests, not for the notifier.
#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    Completed {
        transaction_id: String,
        order_id: String,
    },
    /// The store had already completed this transaction; redelivery is success.
    AlreadyCompleted { transaction_id: String },
    NotApproved {
        payment_id: i64,
        status: PaymentStatus,
    },
    Ignored { reason: String },
    /// The reference could not be resolved to a concrete transaction;
    /// completion is skipped and manual reconciliation is the fallback.
    Unresolved {
        payment_id: i64,
        reference: Option<String>,
    },
    Failed { detail: String },
}

impl ReconcileOutcome {
    /// Small acknowledgement label sent back to the notifier.
    pub fn ack_label(&self) -> &'static str {
        match self {
            Self::Completed { .. } | Self::AlreadyCompleted { .. } => "ok",
            Self::NotApproved { .. } => "pending",
            Self::Ignored { .. } => "ignored",
            Self::Unresolved { .. } => "unresolved",
            Self::Failed { .. } => "error",
        }
    }
}

#[derive(Clone)]
pub struct WebhookReconciler {
    gateway: Option<Arc<MercadoPagoClient>>,
    store: Arc<dyn OrderStore>,
    resolver: SessionResolver,
    events: EventSender,
}

impl WebhookReconciler {
    pub fn new(
        gateway: Option<Arc<MercadoPagoClient>>,
        store: Arc<dyn OrderStore>,
        events: EventSender,
    ) -> Self {
        let resolver = SessionResolver::new(store.clone());
        Self {
            gateway,
            store,
            resolver,
            events,
        }
    }

    /// Run one notification through parse → filter → fetch → resolve →
    /// complete. Never returns an error: failures are terminal for this
    /// notification and must not leak to the notifier transport.
    #[instrument(skip(self, payload))]
    pub async fn process(&self, payload: &Value) -> ReconcileOutcome {
        match WebhookAction::parse(payload) {
            WebhookAction::Unparseable => {
                info!("ignoring notification with unrecognized payload shape");
                ReconcileOutcome::Ignored {
                    reason: "unrecognized payload shape".to_string(),
                }
            }
            WebhookAction::NotPayment { topic } => {
                debug!(topic, "ignoring non-payment notification");
                ReconcileOutcome::Ignored {
                    reason: format!("topic {topic}"),
                }
            }
            WebhookAction::Payment { payment_id } => self.reconcile_payment(payment_id).await,
        }
    }

    async fn reconcile_payment(&self, payment_id: i64) -> ReconcileOutcome {
        let Some(gateway) = self.gateway.as_deref() else {
            error!("gateway credential not configured; cannot verify notification");
            return ReconcileOutcome::Failed {
                detail: "gateway not configured".to_string(),
            };
        };

        // Always re-fetch: the payload's claim about status is untrusted.
        let payment = match gateway.get_payment(payment_id).await {
            Ok(Some(payment)) => payment,
            Ok(None) => {
                warn!(payment_id, "gateway has no record of notified payment");
                return ReconcileOutcome::Failed {
                    detail: format!("payment {payment_id} not found at gateway"),
                };
            }
            Err(err) => {
                warn!(payment_id, %err, "failed to fetch authoritative payment status");
                return ReconcileOutcome::Failed {
                    detail: err.to_string(),
                };
            }
        };

        if !payment.is_settled() {
            debug!(
                payment_id,
                status = ?payment.status,
                "payment not approved; nothing to reconcile"
            );
            return ReconcileOutcome::NotApproved {
                payment_id,
                status: payment.status,
            };
        }

        let Some(reference) = payment.external_reference else {
            warn!(payment_id, "approved payment carries no external reference");
            return ReconcileOutcome::Unresolved {
                payment_id,
                reference: None,
            };
        };

        let resolution = match self.resolver.resolve(&reference).await {
            Ok(resolution) => resolution,
            Err(err) => {
                warn!(payment_id, reference, %err, "resolution lookup failed");
                return ReconcileOutcome::Failed {
                    detail: err.to_string(),
                };
            }
        };

        let Resolution::Transaction(transaction_id) = resolution else {
            warn!(
                payment_id,
                reference, "reference did not resolve to a transaction; leaving for manual reconciliation"
            );
            return ReconcileOutcome::Unresolved {
                payment_id,
                reference: Some(reference),
            };
        };

        self.complete(payment_id, &reference, transaction_id).await
    }

    async fn complete(
        &self,
        payment_id: i64,
        reference: &str,
        transaction_id: String,
    ) -> ReconcileOutcome {
        match self.store.complete_transaction(&transaction_id).await {
            Ok(order_id) => {
                info!(
                    payment_id,
                    transaction_id, order_id, "transaction completed from webhook"
                );
                let session_id = reference
                    .starts_with(SESSION_PREFIX)
                    .then(|| reference.to_string());
                let event = Event::TransactionCompleted {
                    transaction_id: transaction_id.clone(),
                    order_id: order_id.clone(),
                    session_id,
                };
                if let Err(err) = self.events.send(event).await {
                    warn!(order_id, %err, "failed to queue completion event");
                }
                ReconcileOutcome::Completed {
                    transaction_id,
                    order_id,
                }
            }
            Err(err) if is_already_completed(&err) => {
                info!(
                    payment_id,
                    transaction_id, "transaction already completed; redelivery treated as success"
                );
                ReconcileOutcome::AlreadyCompleted { transaction_id }
            }
            Err(err) => {
                error!(payment_id, transaction_id, %err, "transaction completion failed");
                ReconcileOutcome::Failed {
                    detail: err.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    #[test_case(json!({"type": "payment", "data": {"id": "123"}}); "type with string id")]
    #[test_case(json!({"type": "payment", "data": {"id": 123}}); "type with numeric id")]
    #[test_case(json!({"topic": "payment", "data": {"id": "123"}}); "topic with data id")]
    #[test_case(json!({"resource": "123"}); "bare resource id")]
    #[test_case(json!({"resource": "https://api.mercadopago.com/v1/payments/123"}); "resource url")]
    #[test_case(json!({"topic": "payment", "resource": "https://api.mercadopago.com/v1/payments/123"}); "topic with resource url")]
    fn all_shapes_extract_the_same_id(payload: Value) {
        assert_eq!(
            WebhookAction::parse(&payload),
            WebhookAction::Payment { payment_id: 123 }
        );
    }

    #[test]
    fn merchant_order_topic_is_not_payment() {
        let payload = json!({
            "topic": "merchant_order",
            "resource": "https://api.mercadolibre.com/merchant_orders/555"
        });
        assert_eq!(
            WebhookAction::parse(&payload),
            WebhookAction::NotPayment {
                topic: "merchant_order".to_string()
            }
        );
    }

    #[test]
    fn garbage_payloads_are_unparseable() {
        assert_eq!(
            WebhookAction::parse(&json!({"hello": "world"})),
            WebhookAction::Unparseable
        );
        assert_eq!(
            WebhookAction::parse(&json!({"type": "payment"})),
            WebhookAction::Unparseable
        );
        assert_eq!(
            WebhookAction::parse(&json!({"type": "payment", "data": {"id": "not-a-number"}})),
            WebhookAction::Unparseable
        );
        assert_eq!(
            WebhookAction::parse(&json!({"resource": "https://api.example.com/"})),
            WebhookAction::Unparseable
        );
    }

    #[test]
    fn trailing_slash_url_uses_last_segment() {
        assert_eq!(
            resource_id("https://api.mercadopago.com/collections/notifications/99/"),
            Some(99)
        );
    }

    #[test]
    fn ack_labels_are_stable() {
        assert_eq!(
            ReconcileOutcome::Ignored {
                reason: "x".into()
            }
            .ack_label(),
            "ignored"
        );
        assert_eq!(
            ReconcileOutcome::AlreadyCompleted {
                transaction_id: "txn_1".into()
            }
            .ack_label(),
            "ok"
        );
    }
}
