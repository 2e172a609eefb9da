use crate::services::repair::RepairTask;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Events emitted as payment state changes flow through the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    CheckoutStarted {
        reference: String,
        preference_id: String,
    },
    PaymentCaptured {
        payment_id: String,
        amount: Decimal,
    },
    PaymentRefunded {
        mp_payment_id: i64,
        amount: Decimal,
    },
    /// A transaction became an order. Drives the post-completion repair pass.
    TransactionCompleted {
        transaction_id: String,
        order_id: String,
        session_id: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Event processing loop. Completion events trigger the repair task; other
/// events are recorded for observability.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>, repair: Arc<RepairTask>) {
    while let Some(event) = receiver.recv().await {
        match event {
            Event::TransactionCompleted {
                transaction_id,
                order_id,
                session_id,
            } => {
                debug!(transaction_id, order_id, "running post-completion repair");
                if let Err(err) = repair.run(&order_id, session_id.as_deref()).await {
                    // Repair failures never propagate to the emitter; the
                    // summary stays eventually consistent.
                    error!(order_id, %err, "post-completion repair failed");
                }
            }
            other => {
                debug!(event = ?other, "event recorded");
            }
        }
    }
    info!("event channel closed; processor exiting");
}
