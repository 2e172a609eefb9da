//! Post-completion repair task.
//!
//! Completion does not atomically propagate capture totals into the order
//! summary fields other subsystems read. After every completion this task
//! re-derives the truth from the ledger and writes the summary fields back,
//! one write per field so a single failure cannot block its sibling.

use crate::{
    errors::ServiceError,
    store::{OrderStore, PaymentCollection},
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// What the repair pass derived and which writes landed.
#[derive(Debug, Clone)]
pub struct RepairReport {
    pub collection_id: Option<String>,
    pub captured_total: Decimal,
    pub status_written: bool,
    pub total_written: bool,
}

impl RepairReport {
    fn skipped() -> Self {
        Self {
            collection_id: None,
            captured_total: Decimal::ZERO,
            status_written: false,
            total_written: false,
        }
    }
}

pub struct RepairTask {
    store: Arc<dyn OrderStore>,
}

impl RepairTask {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }

    /// Re-derive captured state for a completed order and repair its summary
    /// fields. Read failures abort the pass; write failures are isolated
    /// per-field and logged.
    #[instrument(skip(self))]
    pub async fn run(
        &self,
        order_id: &str,
        session_id: Option<&str>,
    ) -> Result<RepairReport, ServiceError> {
        let collection = match self.store.collection_for_order(order_id).await? {
            Some(collection) => Some(collection),
            None => match session_id {
                Some(session_id) => self.collection_via_session(session_id).await?,
                None => None,
            },
        };

        let Some(collection) = collection else {
            warn!(order_id, "no payment collection found for completed order; skipping repair");
            return Ok(RepairReport::skipped());
        };

        let payments = self.store.payments_for_collection(&collection.id).await?;

        let latest_capture = payments
            .iter()
            .filter(|p| p.captured_at.is_some())
            .max_by_key(|p| p.captured_at);
        let captured_total: Decimal = payments.iter().filter_map(|p| p.captured_amount).sum();

        let Some(latest) = latest_capture else {
            info!(
                order_id,
                collection_id = %collection.id,
                "no captured payments yet; summary left untouched"
            );
            return Ok(RepairReport {
                collection_id: Some(collection.id),
                captured_total,
                status_written: false,
                total_written: false,
            });
        };

        info!(
            order_id,
            collection_id = %collection.id,
            latest_payment_id = %latest.id,
            captured_total = %captured_total,
            "repairing order payment summary"
        );

        // Independent writes: one failing must not block the other.
        let (status_result, total_result) = futures::join!(
            self.store.set_order_payment_status(order_id, "captured"),
            self.store.set_order_captured_total(order_id, captured_total),
        );

        if let Err(err) = &status_result {
            warn!(order_id, %err, "failed to write order payment status");
        }
        if let Err(err) = &total_result {
            warn!(order_id, %err, "failed to write order captured total");
        }

        Ok(RepairReport {
            collection_id: Some(collection.id),
            captured_total,
            status_written: status_result.is_ok(),
            total_written: total_result.is_ok(),
        })
    }

    /// Join to the collection through the originating checkout session when
    /// the order itself carries no direct reference.
    async fn collection_via_session(
        &self,
        session_id: &str,
    ) -> Result<Option<PaymentCollection>, ServiceError> {
        let Some(session) = self.store.checkout_session(session_id).await? else {
            return Ok(None);
        };
        let Some(collection_id) = session.payment_collection_id else {
            return Ok(None);
        };
        self.store.payment_collection(&collection_id).await
    }
}
