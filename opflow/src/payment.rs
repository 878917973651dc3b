//! Payment resources and their creation request bodies.
//!
//! One transfer creates three resources in strict order: an incoming payment
//! on the recipient's account, a quote on the sender's account whose
//! `receiver` is the incoming payment's id, and an outgoing payment whose
//! `quote_id` is the quote's id. None of them is reused across runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::amount::Amount;

/// Request body for creating an incoming payment.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingPaymentRequest {
    /// The recipient wallet the payment is addressed to.
    pub wallet_address: Url,
    /// The amount the recipient should receive, in the recipient's asset.
    pub incoming_amount: Amount,
    /// When the unpaid incoming payment expires server-side.
    pub expires_at: DateTime<Utc>,
}

/// An incoming payment resource on the recipient's resource server.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingPayment {
    /// The resource URL; consumed by quote creation as the `receiver`.
    pub id: Url,
    /// The recipient wallet.
    pub wallet_address: Url,
    /// The amount to be received.
    pub incoming_amount: Amount,
    /// Server-side expiry of the unpaid payment.
    pub expires_at: DateTime<Utc>,
}

/// Request body for creating a quote.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    /// The payment method to quote over.
    pub method: String,
    /// The sender wallet the quote debits.
    pub wallet_address: Url,
    /// The incoming payment this quote pays into.
    pub receiver: Url,
}

impl QuoteRequest {
    /// Builds an ILP quote request for the given sender and receiver.
    #[must_use]
    pub fn ilp(wallet_address: Url, receiver: Url) -> Self {
        Self {
            method: "ilp".to_owned(),
            wallet_address,
            receiver,
        }
    }
}

/// A quote resource on the sender's resource server.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    /// The resource URL; consumed by outgoing-payment creation.
    pub id: Url,
    /// The sender wallet.
    pub wallet_address: Url,
    /// The incoming payment this quote pays into.
    pub receiver: Url,
    /// What the sender will be debited, once priced.
    #[serde(default)]
    pub debit_amount: Option<Amount>,
    /// What the recipient will receive, once priced.
    #[serde(default)]
    pub receive_amount: Option<Amount>,
}

/// Request body for creating an outgoing payment.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingPaymentRequest {
    /// The sender wallet the payment debits.
    pub wallet_address: Url,
    /// The quote this payment executes.
    pub quote_id: Url,
}

/// An outgoing payment resource, the terminal artifact of one transfer.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingPayment {
    /// The resource URL.
    pub id: Url,
    /// The sender wallet.
    pub wallet_address: Url,
    /// The quote this payment executes.
    pub quote_id: Url,
}
