use crate::{
    errors::ServiceError,
    store::{OrderStore, ORDER_PREFIX, TRANSACTION_PREFIX},
};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Outcome of resolving an external reference to a completion key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A concrete transaction (or order) id the completion call accepts.
    Transaction(String),
    /// No linkage from the reference to a concrete id; completion is skipped
    /// and the case is left to manual reconciliation.
    Unresolved,
}

/// Resolves the opaque `external_reference` echoed back by the gateway into
/// the id the store's completion operation needs.
///
/// The gateway returns exactly the string it was given at initiation, which
/// is sometimes a checkout-session id minted before the underlying
/// transaction was finalized. Resolution walks session → payment collection
/// → transaction/order and takes the first concrete id at each hop.
#[derive(Clone)]
pub struct SessionResolver {
    store: Arc<dyn OrderStore>,
}

impl SessionResolver {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self))]
    pub async fn resolve(&self, reference: &str) -> Result<Resolution, ServiceError> {
        // Already transaction-shaped: nothing to look up.
        if reference.starts_with(TRANSACTION_PREFIX) || reference.starts_with(ORDER_PREFIX) {
            return Ok(Resolution::Transaction(reference.to_string()));
        }

        let Some(session) = self.store.checkout_session(reference).await? else {
            warn!(reference, "no checkout session behind reference");
            return Ok(Resolution::Unresolved);
        };

        let Some(collection_id) = session.payment_collection_id else {
            warn!(reference, "checkout session has no payment collection");
            return Ok(Resolution::Unresolved);
        };

        let Some(collection) = self.store.payment_collection(&collection_id).await? else {
            warn!(
                reference,
                collection_id, "payment collection vanished during resolution"
            );
            return Ok(Resolution::Unresolved);
        };

        match collection.transaction_id.or(collection.order_id) {
            Some(concrete) => {
                debug!(reference, concrete, "resolved external reference");
                Ok(Resolution::Transaction(concrete))
            }
            None => {
                warn!(
                    reference,
                    collection_id = collection.id,
                    "payment collection is not linked to a transaction"
                );
                Ok(Resolution::Unresolved)
            }
        }
    }
}
