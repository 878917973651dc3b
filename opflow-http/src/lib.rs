#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Signed HTTP transport for the Open Payments transfer flow.
//!
//! Provides [`AuthenticatedClient`], a `reqwest`-backed implementation of
//! [`opflow::PaymentOps`] bound to one wallet identity and its signing key.
//! Every outbound request carries HTTP message signature headers produced by
//! a [`RequestSigner`] capability; the bundled [`Ed25519Signer`] backs that
//! capability with an Ed25519 key.

pub mod client;
pub mod signature;

pub use client::{AuthenticatedClient, ClientConfig};
pub use signature::{Ed25519Signer, RequestSigner};
