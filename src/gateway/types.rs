use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Gateway payment lifecycle states.
///
/// The gateway owns these records; we only ever read them fresh. Unknown
/// states map to `Other` so new gateway statuses never break deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Approved,
    Authorized,
    InProcess,
    InMediation,
    Rejected,
    Cancelled,
    Refunded,
    ChargedBack,
    #[serde(other)]
    Other,
}

impl PaymentStatus {
    pub fn is_approved(&self) -> bool {
        matches!(self, PaymentStatus::Approved)
    }
}

/// A payment record as reported by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPayment {
    pub id: i64,
    pub status: PaymentStatus,
    #[serde(default)]
    pub status_detail: Option<String>,
    pub transaction_amount: Decimal,
    #[serde(default)]
    pub currency_id: Option<String>,
    #[serde(default)]
    pub external_reference: Option<String>,
    pub date_created: DateTime<Utc>,
    #[serde(default)]
    pub date_approved: Option<DateTime<Utc>>,
}

impl GatewayPayment {
    /// Whether this record represents collected funds. Some gateway flows
    /// report approval only through the `accredited` status detail.
    pub fn is_settled(&self) -> bool {
        self.status.is_approved()
            || self
                .status_detail
                .as_deref()
                .is_some_and(|d| d.eq_ignore_ascii_case("accredited"))
    }
}

/// Envelope returned by the payment search endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentSearchPage {
    #[serde(default)]
    pub results: Vec<GatewayPayment>,
}

/// Redirect targets the checkout page sends the customer back to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackUrls {
    pub success: String,
    pub failure: String,
    pub pending: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferenceItem {
    pub title: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub currency_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferencePayer {
    pub email: String,
}

/// Request body for creating a checkout preference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub items: Vec<PreferenceItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer: Option<PreferencePayer>,
    pub external_reference: String,
    pub notification_url: String,
    pub back_urls: BackUrls,
}

/// A created checkout preference: the id is echoed back by later gateway
/// calls, the init point is the redirect URL handed to the customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutPreference {
    pub id: String,
    pub init_point: String,
    #[serde(default)]
    pub sandbox_init_point: Option<String>,
}

/// Receipt for a refund accepted by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundReceipt {
    pub id: i64,
    pub amount: Decimal,
    #[serde(default)]
    pub status: Option<String>,
}
