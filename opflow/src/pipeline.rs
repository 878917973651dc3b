//! The ordered three-step payment pipeline.
//!
//! One run resolves both wallets, then creates incoming payment, quote, and
//! outgoing payment in strict order. The first two creations are gated by
//! fresh non-interactive grants negotiated per run; the outgoing payment is
//! authorized by a long-lived token provisioned ahead of time. There is no
//! rollback: a failure surfaces the step it happened at and leaves earlier
//! artifacts to expire server-side.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio_util::sync::CancellationToken;

use crate::amount::Amount;
use crate::api::PaymentOps;
use crate::error::{PipelineError, PipelineStep};
use crate::grant::{AccessAction, AccessScope, AccessType};
use crate::negotiator::{GrantNegotiator, PollPolicy};
use crate::payment::{
    IncomingPaymentRequest, OutgoingPayment, OutgoingPaymentRequest, QuoteRequest,
};
use crate::wallet::WalletAddressResolver;

/// Default lifetime of a created incoming payment.
pub const DEFAULT_INCOMING_PAYMENT_TTL: Duration = Duration::from_secs(30 * 60);

/// One payment to execute.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    /// Sender wallet identifier (may carry the payment-pointer sigil).
    pub sender: String,
    /// Recipient wallet identifier (may carry the payment-pointer sigil).
    pub recipient: String,
    /// Amount in base units of the recipient's asset.
    pub amount: u128,
    /// Caller-supplied idempotency reference. Runs sharing a reference are
    /// rejected while one is in flight or after one has completed.
    pub reference: Option<String>,
}

/// Outcome of a completed run, remembered per reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    InFlight,
    Completed,
}

/// Releases an in-flight reference unless the run completed.
struct RunGuard<'a> {
    runs: &'a DashMap<String, RunState>,
    reference: Option<String>,
    finished: bool,
}

impl RunGuard<'_> {
    fn complete(mut self) {
        if let Some(reference) = &self.reference {
            self.runs.insert(reference.clone(), RunState::Completed);
        }
        self.finished = true;
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Some(reference) = &self.reference {
                // A failed run releases its reference so the caller may retry.
                self.runs.remove(reference);
            }
        }
    }
}

/// Executes wallet-to-wallet payments as ordered three-step runs.
pub struct PaymentPipeline {
    ops: Arc<dyn PaymentOps>,
    resolver: WalletAddressResolver,
    negotiator: GrantNegotiator,
    outgoing_access_token: String,
    incoming_payment_ttl: Duration,
    runs: DashMap<String, RunState>,
}

impl std::fmt::Debug for PaymentPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentPipeline")
            .field("incoming_payment_ttl", &self.incoming_payment_ttl)
            .field("tracked_runs", &self.runs.len())
            .finish_non_exhaustive()
    }
}

impl PaymentPipeline {
    /// Creates a pipeline over the given operations.
    ///
    /// `outgoing_access_token` is the pre-provisioned long-lived token scoped
    /// for outgoing-payment creation on the sender's account.
    #[must_use]
    pub fn new(ops: Arc<dyn PaymentOps>, outgoing_access_token: impl Into<String>) -> Self {
        Self {
            resolver: WalletAddressResolver::new(Arc::clone(&ops)),
            negotiator: GrantNegotiator::new(Arc::clone(&ops)),
            ops,
            outgoing_access_token: outgoing_access_token.into(),
            incoming_payment_ttl: DEFAULT_INCOMING_PAYMENT_TTL,
            runs: DashMap::new(),
        }
    }

    /// Replaces the grant poll policy.
    #[must_use]
    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.negotiator = self.negotiator.with_policy(policy);
        self
    }

    /// Replaces the incoming-payment lifetime.
    #[must_use]
    pub const fn with_incoming_payment_ttl(mut self, ttl: Duration) -> Self {
        self.incoming_payment_ttl = ttl;
        self
    }

    /// Executes one payment run.
    ///
    /// Steps, strictly ordered: resolve sender, resolve recipient, create the
    /// incoming payment under a fresh recipient-side grant, create the quote
    /// under a fresh sender-side grant, create the outgoing payment under the
    /// pre-provisioned token. Each artifact's id feeds the next call.
    ///
    /// `cancel` is honored between steps; an already-started network call is
    /// never interrupted mid-flight.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Duplicate`] when the request's reference is
    /// already taken, [`PipelineError::Cancelled`] on cancellation, and
    /// [`PipelineError::Step`] for any step failure. No compensating action
    /// is taken for artifacts created before the failure.
    pub async fn execute_payment(
        &self,
        request: &PaymentRequest,
        cancel: &CancellationToken,
    ) -> Result<OutgoingPayment, PipelineError> {
        let guard = self.claim(request.reference.clone())?;

        tracing::info!(
            sender = %request.sender,
            recipient = %request.recipient,
            amount = request.amount,
            "starting payment run"
        );

        ensure_live(cancel, PipelineStep::ResolveSender)?;
        let sender = self
            .resolver
            .resolve(&request.sender)
            .await
            .map_err(|e| PipelineError::step(PipelineStep::ResolveSender, e))?;

        ensure_live(cancel, PipelineStep::ResolveRecipient)?;
        let recipient = self
            .resolver
            .resolve(&request.recipient)
            .await
            .map_err(|e| PipelineError::step(PipelineStep::ResolveRecipient, e))?;

        // Step 2: incoming payment on the recipient's account.
        ensure_live(cancel, PipelineStep::IncomingPayment)?;
        let incoming_grant = self
            .negotiator
            .request_finalized(
                &recipient.auth_server,
                AccessScope::new(
                    AccessType::IncomingPayment,
                    vec![
                        AccessAction::Create,
                        AccessAction::Read,
                        AccessAction::Complete,
                    ],
                ),
            )
            .await
            .map_err(|e| PipelineError::step(PipelineStep::IncomingPayment, e))?;

        let incoming_request = IncomingPaymentRequest {
            wallet_address: recipient.resource_id.clone(),
            incoming_amount: Amount::new(
                request.amount,
                recipient.asset_code.clone(),
                recipient.asset_scale,
            ),
            expires_at: Utc::now()
                + chrono::Duration::from_std(self.incoming_payment_ttl)
                    .unwrap_or_else(|_| chrono::Duration::minutes(30)),
        };
        let incoming = self
            .ops
            .create_incoming_payment(
                &recipient.resource_base(),
                &incoming_grant.access_token,
                &incoming_request,
            )
            .await
            .map_err(|e| PipelineError::step(PipelineStep::IncomingPayment, e))?;

        tracing::debug!(incoming_payment = %incoming.id, "created incoming payment");

        // Step 3: quote on the sender's account, paying into the incoming payment.
        ensure_live(cancel, PipelineStep::Quote)?;
        let quote_grant = self
            .negotiator
            .request_finalized(
                &sender.auth_server,
                AccessScope::new(
                    AccessType::Quote,
                    vec![
                        AccessAction::Create,
                        AccessAction::Read,
                        AccessAction::ReadAll,
                    ],
                ),
            )
            .await
            .map_err(|e| PipelineError::step(PipelineStep::Quote, e))?;

        let quote_request = QuoteRequest::ilp(sender.resource_id.clone(), incoming.id.clone());
        let quote = self
            .ops
            .create_quote(
                &sender.resource_base(),
                &quote_grant.access_token,
                &quote_request,
            )
            .await
            .map_err(|e| PipelineError::step(PipelineStep::Quote, e))?;

        tracing::debug!(quote = %quote.id, "created quote");

        // Step 4: outgoing payment under the pre-provisioned token.
        ensure_live(cancel, PipelineStep::OutgoingPayment)?;
        let outgoing_request = OutgoingPaymentRequest {
            wallet_address: sender.resource_id.clone(),
            quote_id: quote.id.clone(),
        };
        let outgoing = self
            .ops
            .create_outgoing_payment(
                &sender.resource_base(),
                &self.outgoing_access_token,
                &outgoing_request,
            )
            .await
            .map_err(|e| PipelineError::step(PipelineStep::OutgoingPayment, e))?;

        tracing::info!(outgoing_payment = %outgoing.id, "payment run completed");
        guard.complete();
        Ok(outgoing)
    }

    /// Claims the request's reference for this run.
    fn claim(&self, reference: Option<String>) -> Result<RunGuard<'_>, PipelineError> {
        if let Some(reference) = reference {
            match self.runs.entry(reference.clone()) {
                Entry::Occupied(_) => {
                    return Err(PipelineError::Duplicate { reference });
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(RunState::InFlight);
                }
            }
            Ok(RunGuard {
                runs: &self.runs,
                reference: Some(reference),
                finished: false,
            })
        } else {
            Ok(RunGuard {
                runs: &self.runs,
                reference: None,
                finished: false,
            })
        }
    }
}

/// Fails the run if it was cancelled before reaching `step`.
fn ensure_live(cancel: &CancellationToken, step: PipelineStep) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        Err(PipelineError::Cancelled { step })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::error::{GrantError, PipelineStepError, ResolutionError};
    use crate::testing::{Call, MockOps, pending_response};

    const ALICE: &str = "https://pay.example/alice";
    const BOB: &str = "https://pay.example/bob";

    fn request() -> PaymentRequest {
        PaymentRequest {
            sender: "$pay.example/alice".to_owned(),
            recipient: "$pay.example/bob".to_owned(),
            amount: 500,
            reference: None,
        }
    }

    fn pipeline(ops: &Arc<MockOps>) -> PaymentPipeline {
        PaymentPipeline::new(
            Arc::clone(ops) as Arc<dyn PaymentOps>,
            "provisioned-outgoing-token",
        )
    }

    #[tokio::test]
    async fn artifacts_chain_in_strict_order() {
        let ops = Arc::new(MockOps::happy(&[ALICE, BOB]));
        let outgoing = pipeline(&ops)
            .execute_payment(&request(), &CancellationToken::new())
            .await
            .unwrap();

        let calls = ops.calls();

        // Both wallets are resolved first, sender then recipient.
        let fetched: Vec<_> = calls
            .iter()
            .filter_map(|c| match c {
                Call::FetchWallet { url } => Some(url.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(fetched, vec![ALICE.to_owned(), BOB.to_owned()]);

        // Exactly two grant negotiations: incoming-payment, then quote.
        let grants: Vec<_> = calls
            .iter()
            .filter_map(|c| match c {
                Call::RequestGrant {
                    auth_server,
                    resource_type,
                    interactive,
                } => Some((auth_server.clone(), *resource_type, *interactive)),
                _ => None,
            })
            .collect();
        assert_eq!(grants.len(), 2);
        assert_eq!(
            grants[0],
            (
                format!("{BOB}-auth"),
                AccessType::IncomingPayment,
                false
            )
        );
        assert_eq!(grants[1], (format!("{ALICE}-auth"), AccessType::Quote, false));

        // The quote pays into the created incoming payment, and the outgoing
        // payment executes the created quote.
        let incoming_id = calls
            .iter()
            .find_map(|c| match c {
                Call::CreateIncoming { id, .. } => Some(id.clone()),
                _ => None,
            })
            .unwrap();
        let (receiver, quote_id) = calls
            .iter()
            .find_map(|c| match c {
                Call::CreateQuote { receiver, id, .. } => Some((receiver.clone(), id.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(receiver, incoming_id);

        let outgoing_quote = calls
            .iter()
            .find_map(|c| match c {
                Call::CreateOutgoing { quote_id, .. } => Some(quote_id.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(outgoing_quote, quote_id);
        assert_eq!(outgoing.quote_id.as_str(), quote_id);
    }

    #[tokio::test]
    async fn grant_tokens_are_scoped_per_step_and_outgoing_uses_the_provisioned_token() {
        let ops = Arc::new(MockOps::happy(&[ALICE, BOB]));
        pipeline(&ops)
            .execute_payment(&request(), &CancellationToken::new())
            .await
            .unwrap();

        let calls = ops.calls();
        for call in &calls {
            match call {
                Call::CreateIncoming { token, .. } => {
                    assert_eq!(token, "incoming-payment-token");
                }
                Call::CreateQuote { token, .. } => assert_eq!(token, "quote-token"),
                Call::CreateOutgoing { token, .. } => {
                    assert_eq!(token, "provisioned-outgoing-token");
                }
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn unreachable_recipient_fails_before_any_authorization_call() {
        let ops = Arc::new(MockOps::happy(&[ALICE]));
        let err = pipeline(&ops)
            .execute_payment(&request(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.failed_step(), Some(PipelineStep::ResolveRecipient));
        assert!(matches!(
            err,
            PipelineError::Step {
                source: PipelineStepError::Resolution(ResolutionError::Unreachable(_)),
                ..
            }
        ));
        assert_eq!(ops.grant_calls(), 0);
    }

    #[tokio::test]
    async fn unexpected_pending_grant_creates_no_artifacts() {
        let mut mock = MockOps::happy(&[ALICE, BOB]);
        mock.grant_fn = Box::new(|_, _| {
            Ok(pending_response(
                "https://auth.pay.example/continue/1",
                "cont-1",
                Some(5),
                Some("https://auth.pay.example/interact/1"),
            ))
        });
        let ops = Arc::new(mock);

        let err = pipeline(&ops)
            .execute_payment(&request(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.failed_step(), Some(PipelineStep::IncomingPayment));
        assert!(matches!(
            err,
            PipelineError::Step {
                source: PipelineStepError::Grant(GrantError::ProtocolViolation),
                ..
            }
        ));
        assert_eq!(ops.create_calls(), 0);
        assert_eq!(ops.continue_calls(), 0);
    }

    #[tokio::test]
    async fn quote_failure_leaves_the_incoming_payment_in_place() {
        let mut mock = MockOps::happy(&[ALICE, BOB]);
        mock.quote_fn = Box::new(|_| {
            Err(ApiError::Status {
                context: "POST quotes",
                status: 500,
                body: "quote engine down".to_owned(),
            })
        });
        let ops = Arc::new(mock);

        let err = pipeline(&ops)
            .execute_payment(&request(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.failed_step(), Some(PipelineStep::Quote));

        let calls = ops.calls();
        let incoming_creates = calls
            .iter()
            .filter(|c| matches!(c, Call::CreateIncoming { .. }))
            .count();
        assert_eq!(incoming_creates, 1);
        // No compensating delete exists and no outgoing payment is attempted.
        assert!(!calls.iter().any(|c| matches!(c, Call::CreateOutgoing { .. })));
        assert!(matches!(calls.last(), Some(Call::CreateQuote { .. })));
    }

    #[tokio::test]
    async fn outgoing_failure_reports_the_final_step() {
        let mut mock = MockOps::happy(&[ALICE, BOB]);
        mock.outgoing_fn = Box::new(|_| {
            Err(ApiError::Unauthorized {
                context: "POST outgoing-payments",
                status: 401,
                body: "token expired".to_owned(),
            })
        });
        let ops = Arc::new(mock);

        let err = pipeline(&ops)
            .execute_payment(&request(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.failed_step(), Some(PipelineStep::OutgoingPayment));
        // Both earlier artifacts were created and stay created.
        let calls = ops.calls();
        assert!(calls.iter().any(|c| matches!(c, Call::CreateIncoming { .. })));
        assert!(calls.iter().any(|c| matches!(c, Call::CreateQuote { .. })));
    }

    #[tokio::test]
    async fn duplicate_reference_is_rejected_after_completion() {
        let ops = Arc::new(MockOps::happy(&[ALICE, BOB]));
        let pipeline = pipeline(&ops);

        let mut first = request();
        first.reference = Some("session-1".to_owned());
        pipeline
            .execute_payment(&first, &CancellationToken::new())
            .await
            .unwrap();

        let err = pipeline
            .execute_payment(&first, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Duplicate { .. }));

        // The duplicate run never touched the network.
        assert_eq!(ops.grant_calls(), 2);
    }

    #[tokio::test]
    async fn failed_run_releases_its_reference() {
        let mut mock = MockOps::happy(&[ALICE, BOB]);
        mock.quote_fn = Box::new(|_| {
            Err(ApiError::Transport {
                context: "POST quotes",
                message: "connection reset".to_owned(),
            })
        });
        let ops = Arc::new(mock);
        let pipeline = pipeline(&ops);

        let mut req = request();
        req.reference = Some("session-2".to_owned());

        let err = pipeline
            .execute_payment(&req, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.failed_step(), Some(PipelineStep::Quote));

        // The retry is admitted (and fails the same way, not as a duplicate).
        let err = pipeline
            .execute_payment(&req, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.failed_step(), Some(PipelineStep::Quote));
    }

    #[tokio::test]
    async fn cancellation_stops_the_run_between_steps() {
        let ops = Arc::new(MockOps::happy(&[ALICE, BOB]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = pipeline(&ops)
            .execute_payment(&request(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Cancelled {
                step: PipelineStep::ResolveSender
            }
        ));
        assert!(ops.calls().is_empty());
    }
}
