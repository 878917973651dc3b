//! Error taxonomy for the payment flow.
//!
//! Each concern carries its own error type; a pipeline run wraps whichever
//! one occurred together with the step it occurred at. Only the grant
//! continuation poll retries anything automatically; every other failure
//! aborts the run.

use std::fmt;
use std::time::Duration;

use crate::api::ApiError;

/// Failure to turn a wallet identifier into a usable wallet address.
#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    /// The identifier is not a payment pointer or an http(s) URL.
    #[error("invalid wallet identifier `{identifier}`: {reason}")]
    InvalidIdentifier {
        /// The identifier as supplied by the caller.
        identifier: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The wallet address or metadata endpoint could not be reached.
    #[error("wallet address unreachable: {0}")]
    Unreachable(#[source] ApiError),

    /// The metadata endpoint answered with an unrecognized document shape.
    #[error("wallet metadata has an unrecognized shape: {0}")]
    UnrecognizedShape(#[source] ApiError),
}

/// Failure to bind or use signing key material.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The private key material could not be parsed.
    #[error("invalid key material: {reason}")]
    InvalidKey {
        /// Why the key was rejected.
        reason: String,
    },

    /// A server rejected the request signature.
    #[error("request signature rejected ({status})")]
    Rejected {
        /// The HTTP status code of the rejection.
        status: u16,
    },
}

/// Failure of a grant negotiation.
#[derive(Debug, thiserror::Error)]
pub enum GrantError {
    /// The authorization server denied the grant. Terminal, never retried.
    #[error("grant rejected by the authorization server ({status}): {detail}")]
    Rejected {
        /// The HTTP status code of the denial.
        status: u16,
        /// The server's response body, for diagnostics.
        detail: String,
    },

    /// The continuation poll exhausted its bounds without finalizing.
    #[error("grant negotiation did not finalize within {attempts} attempts ({elapsed:?})")]
    Expired {
        /// Continuation attempts performed.
        attempts: u32,
        /// Wall-clock time spent polling.
        elapsed: Duration,
    },

    /// A non-interactive grant request unexpectedly answered pending.
    ///
    /// This is a protocol violation by the server, not a retryable state:
    /// the caller must fail immediately rather than enter the poll loop.
    #[error("authorization server answered pending for a non-interactive grant request")]
    ProtocolViolation,

    /// The grant response matched neither the pending nor the finalized shape.
    #[error("grant response has an unrecognized shape: {reason}")]
    Malformed {
        /// Which expectation the response failed.
        reason: String,
    },

    /// The negotiation was cancelled between poll iterations.
    #[error("grant negotiation cancelled")]
    Cancelled,

    /// A transport failure while talking to the authorization server.
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// One step of a payment pipeline run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    /// Resolving the sender's wallet address.
    ResolveSender,
    /// Resolving the recipient's wallet address.
    ResolveRecipient,
    /// Negotiating the incoming-payment grant and creating the incoming payment.
    IncomingPayment,
    /// Negotiating the quote grant and creating the quote.
    Quote,
    /// Creating the outgoing payment with the pre-provisioned token.
    OutgoingPayment,
}

impl PipelineStep {
    /// Returns a stable lowercase name for logs and user-facing messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ResolveSender => "resolve-sender",
            Self::ResolveRecipient => "resolve-recipient",
            Self::IncomingPayment => "incoming-payment",
            Self::Quote => "quote",
            Self::OutgoingPayment => "outgoing-payment",
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The failure behind a [`PipelineError::Step`].
#[derive(Debug, thiserror::Error)]
pub enum PipelineStepError {
    /// Wallet resolution failed.
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// Grant negotiation failed.
    #[error(transparent)]
    Grant(#[from] GrantError),

    /// A resource creation call failed at the transport level.
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Failure of a payment pipeline run.
///
/// A failed run performs no compensating actions: resources created by
/// earlier steps (an incoming payment, a quote) remain on their servers and
/// are left to expire.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A step failed; the run aborted at that step.
    #[error("payment step `{step}` failed: {source}")]
    Step {
        /// The step that failed.
        step: PipelineStep,
        /// The underlying failure.
        #[source]
        source: PipelineStepError,
    },

    /// The run was cancelled before reaching the named step.
    #[error("payment run cancelled before step `{step}`")]
    Cancelled {
        /// The step that would have run next.
        step: PipelineStep,
    },

    /// The payment reference was already used by an in-flight or completed run.
    #[error("duplicate payment reference `{reference}`")]
    Duplicate {
        /// The rejected reference.
        reference: String,
    },
}

impl PipelineError {
    /// Wraps a step failure.
    pub fn step(step: PipelineStep, source: impl Into<PipelineStepError>) -> Self {
        Self::Step {
            step,
            source: source.into(),
        }
    }

    /// Returns the step a failed or cancelled run stopped at, if any.
    #[must_use]
    pub const fn failed_step(&self) -> Option<PipelineStep> {
        match self {
            Self::Step { step, .. } | Self::Cancelled { step } => Some(*step),
            Self::Duplicate { .. } => None,
        }
    }
}
