//! Axum route handlers for the USSD gateway.
//!
//! The USSD endpoint is synchronous from the aggregator's point of view: the
//! whole pipeline run happens within the request, and the reply is a plain
//! text `CON`/`END` body. Each request runs on its own task, so one
//! subscriber's grant poll never blocks another's exchange.

use std::sync::Arc;

use axum::extract::{Form, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;

use opflow::error::{PipelineError, PipelineStep, PipelineStepError};
use opflow::pipeline::{PaymentPipeline, PaymentRequest};

use crate::menu::{self, MenuAction, UssdReply, UssdRequest};
use crate::notify::NotificationSink;

/// Shared gateway state.
pub struct Gateway {
    /// The payment pipeline, bound to the gateway's wallet identity.
    pub pipeline: PaymentPipeline,
    /// Outbound notification sink.
    pub notifier: Arc<dyn NotificationSink>,
    /// The paying wallet identifier, as configured.
    pub sender_wallet: String,
    /// Cancelled on shutdown; propagated into every run.
    pub shutdown: CancellationToken,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("sender_wallet", &self.sender_wallet)
            .finish_non_exhaustive()
    }
}

/// Shared application state for the gateway service.
pub type GatewayState = Arc<Gateway>;

/// Creates an Axum [`Router`] with all gateway endpoints.
///
/// Endpoints:
/// - `POST /ussd` — one turn of the USSD session
/// - `GET /health` — liveness probe
pub fn gateway_router(state: GatewayState) -> Router {
    Router::new()
        .route("/ussd", post(post_ussd))
        .route("/health", get(health))
        .with_state(state)
}

/// `POST /ussd` — handles one turn of a USSD session.
pub async fn post_ussd(
    State(gateway): State<GatewayState>,
    Form(request): Form<UssdRequest>,
) -> impl IntoResponse {
    let reply = match menu::parse_navigation(&request.text) {
        MenuAction::SendPayment { recipient, amount } => {
            execute_send(&gateway, &request, recipient, amount).await
        }
        action => action
            .static_reply()
            .unwrap_or_else(|| UssdReply::End("Invalid input. Please try again.".to_owned())),
    };

    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        reply.to_string(),
    )
}

/// Runs the payment pipeline for a confirm leaf and renders the outcome.
///
/// The session id doubles as the idempotency reference: an aggregator retry
/// of the same session cannot duplicate the payment.
async fn execute_send(
    gateway: &Gateway,
    request: &UssdRequest,
    recipient: String,
    amount: u128,
) -> UssdReply {
    let payment = PaymentRequest {
        sender: gateway.sender_wallet.clone(),
        recipient: recipient.clone(),
        amount,
        reference: Some(request.session_id.clone()),
    };

    match gateway
        .pipeline
        .execute_payment(&payment, &gateway.shutdown)
        .await
    {
        Ok(outgoing) => {
            tracing::info!(
                outgoing_payment = %outgoing.id,
                session = %request.session_id,
                "ussd payment completed"
            );

            let notifier = Arc::clone(&gateway.notifier);
            let to = request.phone_number.clone();
            let message = format!("You sent {amount} (base units) to {recipient}");
            tokio::spawn(async move {
                notifier.notify(&to, &message).await;
            });

            UssdReply::End(format!("Payment of {amount} sent to {recipient}"))
        }
        Err(err) => {
            tracing::error!(
                error = %err,
                session = %request.session_id,
                "ussd payment failed"
            );

            // A rejected outgoing-payment call means the provisioned token
            // is stale; flag it for the operator.
            if let PipelineError::Step {
                step: PipelineStep::OutgoingPayment,
                source: PipelineStepError::Api(api),
            } = &err
            {
                if let Some(rejection) = api.auth_rejection() {
                    tracing::error!(
                        error = %rejection,
                        "outgoing-payment token rejected; re-run opflow-provision"
                    );
                }
            }

            // Partial success is never reported; the subscriber sees the
            // failing step and its cause.
            UssdReply::End(format!("Payment failed: {err}"))
        }
    }
}

/// Health check endpoint.
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
