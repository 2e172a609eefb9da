use crate::errors::ServiceError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Typed view over the gateway correlation fields the adapter keeps in a
/// payment's `data` blob.
///
/// The blob is the only place gateway state is cached between calls; the
/// gateway itself stays the source of truth and is re-queried whenever a
/// decision depends on payment status. Unknown keys written by other
/// integrations are preserved across round-trips.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SessionData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preference_id: Option<String>,
    /// Redirect URL handed to the customer at checkout start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init_point: Option<String>,
    /// The `external_reference` sent to the gateway at initiation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mp_payment_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_amount: Option<Decimal>,
    /// Running total across repeated partial refunds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_refunded: Option<Decimal>,
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SessionData {
    pub fn from_value(value: &serde_json::Value) -> Result<Self, ServiceError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value.clone()).map_err(|e| {
            ServiceError::SerializationError(format!("malformed payment session data: {e}"))
        })
    }

    pub fn to_value(&self) -> Result<serde_json::Value, ServiceError> {
        serde_json::to_value(self)
            .map_err(|e| ServiceError::SerializationError(format!("session data: {e}")))
    }

    /// Fill fields this instance is missing from `other`. Used when a caller
    /// supplies correlation hints alongside a sparsely populated blob.
    pub fn merge_missing(&mut self, other: &SessionData) {
        if self.preference_id.is_none() {
            self.preference_id = other.preference_id.clone();
        }
        if self.init_point.is_none() {
            self.init_point = other.init_point.clone();
        }
        if self.resource_id.is_none() {
            self.resource_id = other.resource_id.clone();
        }
        if self.mp_payment_id.is_none() {
            self.mp_payment_id = other.mp_payment_id;
        }
        if self.transaction_amount.is_none() {
            self.transaction_amount = other.transaction_amount;
        }
        if self.amount_refunded.is_none() {
            self.amount_refunded = other.amount_refunded;
        }
    }
}
