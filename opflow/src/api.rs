//! The operations trait between the payment flow and its transport.
//!
//! Everything the pipeline does on the network (wallet metadata lookup,
//! grant negotiation, and the three resource creations) is expressed as a
//! method on [`PaymentOps`]. The trait is object-safe so callers can hold an
//! `Arc<dyn PaymentOps>` and tests can substitute a recording mock.

use std::future::Future;
use std::pin::Pin;

use url::Url;

use crate::error::AuthError;
use crate::grant::{GrantRequest, GrantResponse};
use crate::payment::{
    IncomingPayment, IncomingPaymentRequest, OutgoingPayment, OutgoingPaymentRequest, Quote,
    QuoteRequest,
};
use crate::wallet::WalletMetadata;

/// Boxed future type used by [`PaymentOps`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Transport-level errors surfaced by [`PaymentOps`] implementations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// The request could not be sent or the connection failed.
    #[error("transport error: {context}: {message}")]
    Transport {
        /// Human-readable request identifier, e.g. `"GET wallet-address"`.
        context: &'static str,
        /// The underlying transport failure.
        message: String,
    },

    /// The server answered with an unexpected status code.
    #[error("unexpected HTTP status {status}: {context}: {body}")]
    Status {
        /// Human-readable request identifier.
        context: &'static str,
        /// The HTTP status code.
        status: u16,
        /// The response body, for diagnostics.
        body: String,
    },

    /// The server rejected the request's authorization or signature.
    #[error("authorization rejected ({status}): {context}: {body}")]
    Unauthorized {
        /// Human-readable request identifier.
        context: &'static str,
        /// The HTTP status code (401 or 403).
        status: u16,
        /// The response body, for diagnostics.
        body: String,
    },

    /// A request body could not be encoded or a response body decoded.
    #[error("codec error: {context}: {message}")]
    Codec {
        /// Human-readable request identifier.
        context: &'static str,
        /// The underlying encode/decode failure.
        message: String,
    },

    /// An endpoint URL could not be constructed.
    #[error("URL construction failed: {context}: {message}")]
    Url {
        /// Human-readable request identifier.
        context: &'static str,
        /// The underlying parse failure.
        message: String,
    },
}

impl ApiError {
    /// Returns the HTTP status carried by this error, if any.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } | Self::Unauthorized { status, .. } => Some(*status),
            Self::Transport { .. } | Self::Codec { .. } | Self::Url { .. } => None,
        }
    }

    /// Returns the server-side signature/authorization rejection behind this
    /// error, if that is what it is.
    #[must_use]
    pub const fn auth_rejection(&self) -> Option<AuthError> {
        match self {
            Self::Unauthorized { status, .. } => Some(AuthError::Rejected { status: *status }),
            Self::Transport { .. } | Self::Status { .. } | Self::Codec { .. } | Self::Url { .. } => {
                None
            }
        }
    }
}

/// Signed protocol operations against wallet, authorization, and resource
/// servers.
///
/// Implementations are expected to sign every request with the key material
/// they were bound to. All methods borrow their arguments for the lifetime of
/// the returned future.
pub trait PaymentOps: Send + Sync {
    /// Fetches the public metadata document for a wallet address.
    fn fetch_wallet_metadata<'a>(
        &'a self,
        wallet_url: &'a Url,
    ) -> BoxFuture<'a, Result<WalletMetadata, ApiError>>;

    /// Requests a new grant from an authorization server.
    fn request_grant<'a>(
        &'a self,
        auth_server: &'a Url,
        request: &'a GrantRequest,
    ) -> BoxFuture<'a, Result<GrantResponse, ApiError>>;

    /// Continues a pending grant negotiation.
    ///
    /// `continue_access_token` is the continuation token from the pending
    /// grant, not a bearer token for resource access.
    fn continue_grant<'a>(
        &'a self,
        continue_uri: &'a Url,
        continue_access_token: &'a str,
    ) -> BoxFuture<'a, Result<GrantResponse, ApiError>>;

    /// Creates an incoming payment on the recipient's resource server.
    fn create_incoming_payment<'a>(
        &'a self,
        resource_base: &'a Url,
        access_token: &'a str,
        request: &'a IncomingPaymentRequest,
    ) -> BoxFuture<'a, Result<IncomingPayment, ApiError>>;

    /// Creates a quote on the sender's resource server.
    fn create_quote<'a>(
        &'a self,
        resource_base: &'a Url,
        access_token: &'a str,
        request: &'a QuoteRequest,
    ) -> BoxFuture<'a, Result<Quote, ApiError>>;

    /// Creates an outgoing payment on the sender's resource server.
    fn create_outgoing_payment<'a>(
        &'a self,
        resource_base: &'a Url,
        access_token: &'a str,
        request: &'a OutgoingPaymentRequest,
    ) -> BoxFuture<'a, Result<OutgoingPayment, ApiError>>;
}
