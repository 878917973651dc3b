//! The authenticated protocol client.
//!
//! [`AuthenticatedClient`] binds one wallet identity to its signing key and
//! implements [`PaymentOps`] over `reqwest`. It is stateless beyond the
//! bound identity and safe to share across concurrent calls, but each
//! pipeline run is expected to bind its own instance to avoid hidden
//! cross-run coupling.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use opflow::api::{ApiError, BoxFuture, PaymentOps};
use opflow::error::AuthError;
use opflow::grant::{GrantRequest, GrantResponse};
use opflow::payment::{
    IncomingPayment, IncomingPaymentRequest, OutgoingPayment, OutgoingPaymentRequest, Quote,
    QuoteRequest,
};
use opflow::wallet::WalletMetadata;

use crate::signature::{Ed25519Signer, RequestSigner, signature_headers};

/// Default HTTP request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for binding an [`AuthenticatedClient`].
pub struct ClientConfig {
    /// The wallet address URL of the identity issuing requests.
    pub wallet_address_url: Url,
    /// The key identifier registered with that wallet.
    pub key_id: String,
    /// PKCS#8 PEM-encoded Ed25519 private key.
    pub private_key_pem: String,
    /// HTTP request timeout.
    pub timeout: Duration,
}

impl ClientConfig {
    /// Creates a config with the default timeout.
    #[must_use]
    pub fn new(
        wallet_address_url: Url,
        key_id: impl Into<String>,
        private_key_pem: impl Into<String>,
    ) -> Self {
        Self {
            wallet_address_url,
            key_id: key_id.into(),
            private_key_pem: private_key_pem.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Sets the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("wallet_address_url", &self.wallet_address_url)
            .field("key_id", &self.key_id)
            .field("private_key_pem", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// A signing HTTP client bound to one wallet identity.
#[derive(Clone)]
pub struct AuthenticatedClient {
    identity: Url,
    signer: Arc<dyn RequestSigner>,
    client: reqwest::Client,
}

impl std::fmt::Debug for AuthenticatedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticatedClient")
            .field("identity", &self.identity)
            .field("key_id", &self.signer.key_id())
            .finish_non_exhaustive()
    }
}

impl AuthenticatedClient {
    /// Binds a client to a wallet identity and its private key.
    ///
    /// Key material is validated here; a client that binds successfully can
    /// sign every request it issues.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidKey`] when the key material is unusable.
    pub fn bind(config: ClientConfig) -> Result<Self, AuthError> {
        let signer = Ed25519Signer::from_pkcs8_pem(&config.private_key_pem, config.key_id)?;
        Ok(Self::with_signer(
            config.wallet_address_url,
            Arc::new(signer),
            config.timeout,
        ))
    }

    /// Binds a client to a wallet identity with a custom signing capability.
    #[must_use]
    pub fn with_signer(
        identity: Url,
        signer: Arc<dyn RequestSigner>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .expect("failed to build reqwest::Client");

        Self {
            identity,
            signer,
            client,
        }
    }

    /// Returns the wallet identity this client signs as.
    #[must_use]
    pub const fn identity(&self) -> &Url {
        &self.identity
    }

    /// Signed GET returning a JSON body.
    async fn get_json<R>(&self, url: &Url, context: &'static str) -> Result<R, ApiError>
    where
        R: DeserializeOwned,
    {
        let signed = signature_headers(
            self.signer.as_ref(),
            "GET",
            url,
            None,
            None,
            chrono::Utc::now().timestamp(),
        )
        .map_err(|e| ApiError::Transport {
            context,
            message: format!("request signing failed: {e}"),
        })?;

        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT, "application/json")
            .header("Signature-Input", signed.signature_input)
            .header("Signature", signed.signature)
            .send()
            .await
            .map_err(|e| ApiError::Transport {
                context,
                message: e.to_string(),
            })?;

        decode(response, context).await
    }

    /// Signed POST of a JSON body returning a JSON body.
    async fn post_json<T, R>(
        &self,
        url: &Url,
        context: &'static str,
        authorization: Option<String>,
        body: &T,
    ) -> Result<R, ApiError>
    where
        T: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        let body_bytes = serde_json::to_vec(body).map_err(|e| ApiError::Codec {
            context,
            message: e.to_string(),
        })?;

        let signed = signature_headers(
            self.signer.as_ref(),
            "POST",
            url,
            authorization.as_deref(),
            Some(&body_bytes),
            chrono::Utc::now().timestamp(),
        )
        .map_err(|e| ApiError::Transport {
            context,
            message: format!("request signing failed: {e}"),
        })?;

        let mut request = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .header("Signature-Input", signed.signature_input)
            .header("Signature", signed.signature);
        if let Some(digest) = signed.content_digest {
            request = request.header("Content-Digest", digest);
        }
        if let Some(authorization) = authorization {
            request = request.header(AUTHORIZATION, authorization);
        }

        let response = request
            .body(body_bytes)
            .send()
            .await
            .map_err(|e| ApiError::Transport {
                context,
                message: e.to_string(),
            })?;

        decode(response, context).await
    }

    /// Joins a resource path onto a resource server base.
    fn endpoint(base: &Url, path: &str, context: &'static str) -> Result<Url, ApiError> {
        base.join(path).map_err(|e| ApiError::Url {
            context,
            message: e.to_string(),
        })
    }
}

/// Formats a GNAP authorization header value.
fn gnap(token: &str) -> String {
    format!("GNAP {token}")
}

/// Maps a response to a decoded body or the error taxonomy.
async fn decode<R>(response: reqwest::Response, context: &'static str) -> Result<R, ApiError>
where
    R: DeserializeOwned,
{
    let status = response.status();

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(%status, context, "request authorization rejected");
        return Err(ApiError::Unauthorized {
            context,
            status: status.as_u16(),
            body,
        });
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::Status {
            context,
            status: status.as_u16(),
            body,
        });
    }

    response.json::<R>().await.map_err(|e| ApiError::Codec {
        context,
        message: e.to_string(),
    })
}

impl PaymentOps for AuthenticatedClient {
    fn fetch_wallet_metadata<'a>(
        &'a self,
        wallet_url: &'a Url,
    ) -> BoxFuture<'a, Result<WalletMetadata, ApiError>> {
        Box::pin(async move {
            tracing::debug!(wallet = %wallet_url, "fetching wallet metadata");
            self.get_json(wallet_url, "GET wallet-address").await
        })
    }

    fn request_grant<'a>(
        &'a self,
        auth_server: &'a Url,
        request: &'a GrantRequest,
    ) -> BoxFuture<'a, Result<GrantResponse, ApiError>> {
        Box::pin(async move {
            tracing::debug!(auth_server = %auth_server, interactive = request.is_interactive(), "requesting grant");
            self.post_json(auth_server, "POST grant-request", None, request)
                .await
        })
    }

    fn continue_grant<'a>(
        &'a self,
        continue_uri: &'a Url,
        continue_access_token: &'a str,
    ) -> BoxFuture<'a, Result<GrantResponse, ApiError>> {
        Box::pin(async move {
            tracing::debug!(continue_uri = %continue_uri, "continuing grant");
            self.post_json(
                continue_uri,
                "POST grant-continue",
                Some(gnap(continue_access_token)),
                &serde_json::json!({}),
            )
            .await
        })
    }

    fn create_incoming_payment<'a>(
        &'a self,
        resource_base: &'a Url,
        access_token: &'a str,
        request: &'a IncomingPaymentRequest,
    ) -> BoxFuture<'a, Result<IncomingPayment, ApiError>> {
        Box::pin(async move {
            let context = "POST incoming-payments";
            let url = Self::endpoint(resource_base, "incoming-payments", context)?;
            self.post_json(&url, context, Some(gnap(access_token)), request)
                .await
        })
    }

    fn create_quote<'a>(
        &'a self,
        resource_base: &'a Url,
        access_token: &'a str,
        request: &'a QuoteRequest,
    ) -> BoxFuture<'a, Result<Quote, ApiError>> {
        Box::pin(async move {
            let context = "POST quotes";
            let url = Self::endpoint(resource_base, "quotes", context)?;
            self.post_json(&url, context, Some(gnap(access_token)), request)
                .await
        })
    }

    fn create_outgoing_payment<'a>(
        &'a self,
        resource_base: &'a Url,
        access_token: &'a str,
        request: &'a OutgoingPaymentRequest,
    ) -> BoxFuture<'a, Result<OutgoingPayment, ApiError>> {
        Box::pin(async move {
            let context = "POST outgoing-payments";
            let url = Self::endpoint(resource_base, "outgoing-payments", context)?;
            self.post_json(&url, context, Some(gnap(access_token)), request)
                .await
        })
    }
}
