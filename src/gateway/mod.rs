//! MercadoPago gateway client.
//!
//! A thin, typed wrapper over the gateway REST API. No business logic lives
//! here: callers receive payment records or errors and decide what they mean.

pub mod client;
pub mod types;

pub use client::{MercadoPagoClient, RetryPolicy};
pub use types::{
    BackUrls, CheckoutPreference, CheckoutRequest, GatewayPayment, PaymentStatus, PreferenceItem,
    RefundReceipt,
};
