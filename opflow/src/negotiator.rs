//! The grant negotiation state machine.
//!
//! A negotiation starts with a request and ends finalized, rejected, or
//! expired. Pending grants are driven forward by polling the continuation
//! endpoint, sleeping at least the server-advertised wait between calls and
//! bounded by a [`PollPolicy`]. Non-interactive requests must finalize on the
//! first response; a pending answer there is a protocol violation, not a
//! state to poll on.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::api::{ApiError, PaymentOps};
use crate::error::GrantError;
use crate::grant::{AccessScope, FinalizedGrant, Grant, GrantRequest, PendingGrant};

/// Bounds on the grant continuation poll.
///
/// The server's advertised wait is always respected; `min_interval` only
/// raises it. `max_attempts` and `overall_deadline` both terminate the poll
/// with [`GrantError::Expired`], whichever trips first.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    /// Floor on the wait between continuation calls.
    pub min_interval: Duration,
    /// Maximum number of continuation calls.
    pub max_attempts: u32,
    /// Maximum wall-clock time for the whole poll.
    pub overall_deadline: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(5),
            max_attempts: 12,
            overall_deadline: Duration::from_secs(600),
        }
    }
}

/// Whether a grant request asks for human interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interaction {
    /// No interaction; the grant must finalize on the first response.
    NonInteractive,
    /// Redirect-based interaction; the grant may come back pending.
    Redirect,
}

/// Negotiates scoped grants against authorization servers.
#[derive(Clone)]
pub struct GrantNegotiator {
    ops: Arc<dyn PaymentOps>,
    policy: PollPolicy,
}

impl std::fmt::Debug for GrantNegotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrantNegotiator")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl GrantNegotiator {
    /// Creates a negotiator with the default [`PollPolicy`].
    #[must_use]
    pub fn new(ops: Arc<dyn PaymentOps>) -> Self {
        Self {
            ops,
            policy: PollPolicy::default(),
        }
    }

    /// Replaces the poll policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Requests a grant for one scope.
    ///
    /// # Errors
    ///
    /// Returns [`GrantError::Rejected`] when the server denies the request,
    /// [`GrantError::Malformed`] when the response matches neither grant
    /// shape, or [`GrantError::Api`] on transport failure.
    pub async fn request_grant(
        &self,
        auth_server: &Url,
        scope: AccessScope,
        interaction: Interaction,
    ) -> Result<Grant, GrantError> {
        let request = match interaction {
            Interaction::NonInteractive => GrantRequest::non_interactive(scope),
            Interaction::Redirect => GrantRequest::interactive(scope),
        };

        let response = self
            .ops
            .request_grant(auth_server, &request)
            .await
            .map_err(into_grant_error)?;

        Grant::from_response(response)
    }

    /// Requests a non-interactive grant and insists on a finalized answer.
    ///
    /// # Errors
    ///
    /// Returns [`GrantError::ProtocolViolation`] when the server answers
    /// pending (the poll loop is never entered), plus everything
    /// [`Self::request_grant`] returns.
    pub async fn request_finalized(
        &self,
        auth_server: &Url,
        scope: AccessScope,
    ) -> Result<FinalizedGrant, GrantError> {
        match self
            .request_grant(auth_server, scope, Interaction::NonInteractive)
            .await?
        {
            Grant::Finalized(grant) => Ok(grant),
            Grant::Pending(_) => Err(GrantError::ProtocolViolation),
        }
    }

    /// Polls a pending grant to completion.
    ///
    /// Sleeps at least the pending grant's advertised wait (raised to the
    /// policy's `min_interval`) before every continuation call, and replaces
    /// the continuation coordinates with each still-pending answer. The poll
    /// can be cancelled between iterations via `cancel`.
    ///
    /// # Errors
    ///
    /// Returns [`GrantError::Expired`] when the policy bounds are exhausted,
    /// [`GrantError::Cancelled`] on cancellation, [`GrantError::Rejected`]
    /// when the server denies the continuation, and [`GrantError::Malformed`]
    /// or [`GrantError::Api`] as in [`Self::request_grant`].
    pub async fn continue_to_finalized(
        &self,
        pending: PendingGrant,
        cancel: &CancellationToken,
    ) -> Result<FinalizedGrant, GrantError> {
        let started = tokio::time::Instant::now();
        let mut pending = pending;

        for attempt in 1..=self.policy.max_attempts {
            let wait = pending.wait.max(self.policy.min_interval);
            if started.elapsed() + wait > self.policy.overall_deadline {
                return Err(GrantError::Expired {
                    attempts: attempt - 1,
                    elapsed: started.elapsed(),
                });
            }

            tokio::select! {
                () = cancel.cancelled() => return Err(GrantError::Cancelled),
                () = tokio::time::sleep(wait) => {}
            }

            let response = self
                .ops
                .continue_grant(&pending.continue_uri, &pending.continue_access_token)
                .await
                .map_err(into_grant_error)?;

            match Grant::from_response(response)? {
                Grant::Finalized(grant) => {
                    tracing::debug!(attempt, "grant finalized");
                    return Ok(grant);
                }
                Grant::Pending(mut next) => {
                    tracing::debug!(attempt, wait = ?next.wait, "grant still pending");
                    // Later poll answers may omit the interact section.
                    if next.interact.is_none() {
                        next.interact = pending.interact.take();
                    }
                    pending = next;
                }
            }
        }

        Err(GrantError::Expired {
            attempts: self.policy.max_attempts,
            elapsed: started.elapsed(),
        })
    }
}

/// Maps authorization-server denials to the terminal rejected state.
fn into_grant_error(err: ApiError) -> GrantError {
    match err {
        ApiError::Unauthorized { status, body, .. } => GrantError::Rejected {
            status,
            detail: body,
        },
        ApiError::Status { status, body, .. } if (400..500).contains(&status) => {
            GrantError::Rejected {
                status,
                detail: body,
            }
        }
        other => GrantError::Api(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grant::{AccessAction, AccessType};
    use crate::testing::{MockOps, finalized_response, pending_response};

    fn scope() -> AccessScope {
        AccessScope::new(
            AccessType::IncomingPayment,
            vec![AccessAction::Create, AccessAction::Read],
        )
    }

    fn auth_server() -> Url {
        Url::parse("https://auth.pay.example/").unwrap()
    }

    #[tokio::test]
    async fn finalized_on_first_response_never_polls() {
        let ops = Arc::new(MockOps::happy(&[]));
        let negotiator = GrantNegotiator::new(Arc::clone(&ops) as Arc<dyn PaymentOps>);

        let grant = negotiator
            .request_finalized(&auth_server(), scope())
            .await
            .unwrap();

        assert_eq!(grant.access_token, "incoming-payment-token");
        assert_eq!(ops.continue_calls(), 0);
    }

    #[tokio::test]
    async fn pending_on_non_interactive_is_a_protocol_violation() {
        let mut mock = MockOps::happy(&[]);
        mock.grant_fn = Box::new(|_, _| {
            Ok(pending_response(
                "https://auth.pay.example/continue/1",
                "cont-1",
                Some(10),
                Some("https://auth.pay.example/interact/1"),
            ))
        });
        let ops = Arc::new(mock);
        let negotiator = GrantNegotiator::new(Arc::clone(&ops) as Arc<dyn PaymentOps>);

        let err = negotiator
            .request_finalized(&auth_server(), scope())
            .await
            .unwrap_err();

        assert!(matches!(err, GrantError::ProtocolViolation));
        assert_eq!(ops.continue_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn continuation_respects_wait_and_uses_the_continuation_token() {
        let mut mock = MockOps::happy(&[]);
        mock.continue_fn = Box::new(|attempt| {
            if attempt == 0 {
                Ok(pending_response(
                    "https://auth.pay.example/continue/2",
                    "cont-2",
                    Some(7),
                    None,
                ))
            } else {
                Ok(finalized_response("final-token"))
            }
        });
        let ops = Arc::new(mock);
        let negotiator = GrantNegotiator::new(Arc::clone(&ops) as Arc<dyn PaymentOps>);

        let pending = PendingGrant {
            continue_uri: Url::parse("https://auth.pay.example/continue/1").unwrap(),
            continue_access_token: "cont-1".to_owned(),
            wait: Duration::from_secs(20),
            interact: None,
        };

        let started = tokio::time::Instant::now();
        let grant = negotiator
            .continue_to_finalized(pending, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(grant.access_token, "final-token");
        assert_eq!(ops.continue_calls(), 2);

        let continuations = ops.continuations();
        // First call after the initial 20s wait, with the initial coordinates.
        assert!(continuations[0].at >= started + Duration::from_secs(20));
        assert_eq!(continuations[0].uri, "https://auth.pay.example/continue/1");
        assert_eq!(continuations[0].token, "cont-1");
        // Second call uses the rotated coordinates and the new 7s wait.
        assert!(continuations[1].at >= continuations[0].at + Duration::from_secs(7));
        assert_eq!(continuations[1].uri, "https://auth.pay.example/continue/2");
        assert_eq!(continuations[1].token, "cont-2");
    }

    #[tokio::test(start_paused = true)]
    async fn poll_is_bounded_by_max_attempts() {
        let mut mock = MockOps::happy(&[]);
        mock.continue_fn = Box::new(|_| {
            Ok(pending_response(
                "https://auth.pay.example/continue/1",
                "cont-1",
                Some(1),
                None,
            ))
        });
        let ops = Arc::new(mock);
        let negotiator = GrantNegotiator::new(Arc::clone(&ops) as Arc<dyn PaymentOps>)
            .with_policy(PollPolicy {
                min_interval: Duration::from_secs(1),
                max_attempts: 3,
                overall_deadline: Duration::from_secs(600),
            });

        let pending = PendingGrant {
            continue_uri: Url::parse("https://auth.pay.example/continue/1").unwrap(),
            continue_access_token: "cont-1".to_owned(),
            wait: Duration::from_secs(1),
            interact: None,
        };

        let err = negotiator
            .continue_to_finalized(pending, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, GrantError::Expired { attempts: 3, .. }));
        assert_eq!(ops.continue_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_is_bounded_by_the_overall_deadline() {
        let mut mock = MockOps::happy(&[]);
        mock.continue_fn = Box::new(|_| {
            Ok(pending_response(
                "https://auth.pay.example/continue/1",
                "cont-1",
                Some(60),
                None,
            ))
        });
        let ops = Arc::new(mock);
        let negotiator = GrantNegotiator::new(Arc::clone(&ops) as Arc<dyn PaymentOps>)
            .with_policy(PollPolicy {
                min_interval: Duration::from_secs(5),
                max_attempts: 100,
                overall_deadline: Duration::from_secs(90),
            });

        let pending = PendingGrant {
            continue_uri: Url::parse("https://auth.pay.example/continue/1").unwrap(),
            continue_access_token: "cont-1".to_owned(),
            wait: Duration::from_secs(60),
            interact: None,
        };

        let err = negotiator
            .continue_to_finalized(pending, &CancellationToken::new())
            .await
            .unwrap_err();

        // One 60s poll fits the 90s deadline; a second would overrun it.
        assert!(matches!(err, GrantError::Expired { attempts: 1, .. }));
        assert_eq!(ops.continue_calls(), 1);
    }

    #[tokio::test]
    async fn cancellation_short_circuits_between_polls() {
        let ops = Arc::new(MockOps::happy(&[]));
        let negotiator = GrantNegotiator::new(Arc::clone(&ops) as Arc<dyn PaymentOps>);

        let pending = PendingGrant {
            continue_uri: Url::parse("https://auth.pay.example/continue/1").unwrap(),
            continue_access_token: "cont-1".to_owned(),
            wait: Duration::from_secs(20),
            interact: None,
        };

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = negotiator
            .continue_to_finalized(pending, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, GrantError::Cancelled));
        assert_eq!(ops.continue_calls(), 0);
    }

    #[tokio::test]
    async fn denial_maps_to_rejected() {
        let mut mock = MockOps::happy(&[]);
        mock.grant_fn = Box::new(|_, _| {
            Err(ApiError::Unauthorized {
                context: "POST grant",
                status: 403,
                body: "denied".to_owned(),
            })
        });
        let negotiator = GrantNegotiator::new(Arc::new(mock));

        let err = negotiator
            .request_finalized(&auth_server(), scope())
            .await
            .unwrap_err();

        assert!(matches!(err, GrantError::Rejected { status: 403, .. }));
    }
}
