#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types for the Open Payments transfer flow.
//!
//! This crate provides the foundational types and orchestration logic for
//! moving value between two wallet-style accounts through an Open Payments
//! resource server. It is transport-agnostic: every network operation goes
//! through the [`api::PaymentOps`] trait, with the HTTP implementation
//! provided by a separate crate.
//!
//! # Overview
//!
//! A transfer is a chain of three dependent resource creations: an incoming
//! payment on the recipient's account, a quote on the sender's account
//! referencing it, and an outgoing payment referencing the quote. Each step
//! is gated by its own scoped authorization: the first two by short-lived
//! grants negotiated per run, the last by a long-lived token provisioned
//! ahead of time.
//!
//! # Modules
//!
//! - [`amount`] - Asset amounts with wire-precision string values
//! - [`api`] - The [`api::PaymentOps`] operations trait and transport errors
//! - [`error`] - Error taxonomy for resolution, authorization, and pipeline runs
//! - [`grant`] - Access scopes, grant wire shapes, and the pending/finalized split
//! - [`negotiator`] - The grant negotiation state machine with bounded polling
//! - [`payment`] - Incoming payment, quote, and outgoing payment resources
//! - [`pipeline`] - The ordered three-step payment pipeline
//! - [`wallet`] - Wallet address resolution and payment-pointer normalization

pub mod amount;
pub mod api;
pub mod error;
pub mod grant;
pub mod negotiator;
pub mod payment;
pub mod pipeline;
pub mod wallet;

#[cfg(test)]
pub(crate) mod testing;

pub use amount::Amount;
pub use api::{ApiError, PaymentOps};
pub use error::{AuthError, GrantError, PipelineError, PipelineStep, ResolutionError};
pub use grant::{AccessAction, AccessScope, AccessType, FinalizedGrant, Grant, PendingGrant};
pub use negotiator::{GrantNegotiator, Interaction, PollPolicy};
pub use payment::{IncomingPayment, OutgoingPayment, Quote};
pub use pipeline::{PaymentPipeline, PaymentRequest};
pub use wallet::{WalletAddress, WalletAddressResolver};
