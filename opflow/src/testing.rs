//! Call-recording [`PaymentOps`] mock shared by the crate's tests.

use std::collections::HashMap;
use std::sync::Mutex;

use url::Url;

use crate::api::{ApiError, BoxFuture, PaymentOps};
use crate::grant::{
    AccessTokenResponse, AccessType, ContinueResponse, ContinueToken, GrantRequest, GrantResponse,
    InteractResponse,
};
use crate::payment::{
    IncomingPayment, IncomingPaymentRequest, OutgoingPayment, OutgoingPaymentRequest, Quote,
    QuoteRequest,
};
use crate::wallet::WalletMetadata;

/// One recorded operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    FetchWallet {
        url: String,
    },
    RequestGrant {
        auth_server: String,
        resource_type: AccessType,
        interactive: bool,
    },
    ContinueGrant,
    CreateIncoming {
        id: String,
        token: String,
    },
    CreateQuote {
        id: String,
        receiver: String,
        token: String,
    },
    CreateOutgoing {
        quote_id: String,
        token: String,
    },
}

/// A continuation call with its (tokio) timestamp, for wait assertions.
#[derive(Debug, Clone)]
pub(crate) struct ContinuationCall {
    pub at: tokio::time::Instant,
    pub uri: String,
    pub token: String,
}

type GrantFn = Box<dyn Fn(&Url, &GrantRequest) -> Result<GrantResponse, ApiError> + Send + Sync>;
type ContinueFn = Box<dyn Fn(usize) -> Result<GrantResponse, ApiError> + Send + Sync>;
type IncomingFn =
    Box<dyn Fn(&IncomingPaymentRequest) -> Result<IncomingPayment, ApiError> + Send + Sync>;
type QuoteFn = Box<dyn Fn(&QuoteRequest) -> Result<Quote, ApiError> + Send + Sync>;
type OutgoingFn =
    Box<dyn Fn(&OutgoingPaymentRequest) -> Result<OutgoingPayment, ApiError> + Send + Sync>;

/// A recording mock with per-operation behavior overrides.
pub(crate) struct MockOps {
    pub calls: Mutex<Vec<Call>>,
    pub continuations: Mutex<Vec<ContinuationCall>>,
    pub wallets: HashMap<String, WalletMetadata>,
    pub wallet_error: Option<ApiError>,
    pub grant_fn: GrantFn,
    pub continue_fn: ContinueFn,
    pub incoming_fn: IncomingFn,
    pub quote_fn: QuoteFn,
    pub outgoing_fn: OutgoingFn,
}

/// Builds wallet metadata for a base URL, with a distinct auth server.
pub(crate) fn wallet_meta(base: &str) -> WalletMetadata {
    WalletMetadata {
        id: Url::parse(base).unwrap(),
        auth_server: Url::parse(&format!("{base}-auth")).unwrap(),
        resource_server: None,
        asset_code: "ZAR".to_owned(),
        asset_scale: 2,
        public_name: None,
    }
}

/// A finalized grant response carrying the given token.
pub(crate) fn finalized_response(token: &str) -> GrantResponse {
    GrantResponse {
        access_token: Some(AccessTokenResponse {
            value: token.to_owned(),
            manage: None,
            expires_in: Some(600),
        }),
        continuation: None,
        interact: None,
    }
}

/// A pending grant response with the given continuation coordinates.
pub(crate) fn pending_response(
    uri: &str,
    token: &str,
    wait: Option<u64>,
    redirect: Option<&str>,
) -> GrantResponse {
    GrantResponse {
        access_token: None,
        continuation: Some(ContinueResponse {
            uri: Url::parse(uri).unwrap(),
            access_token: ContinueToken {
                value: token.to_owned(),
            },
            wait,
        }),
        interact: redirect.map(|r| InteractResponse {
            redirect: Url::parse(r).unwrap(),
            interact_ref: None,
        }),
    }
}

impl MockOps {
    /// A happy-path mock serving the given wallet base URLs.
    ///
    /// Grants finalize immediately with a token named after the requested
    /// resource type, and resource creations echo their requests back.
    pub(crate) fn happy(wallet_bases: &[&str]) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            continuations: Mutex::new(Vec::new()),
            wallets: wallet_bases
                .iter()
                .map(|base| ((*base).to_owned(), wallet_meta(base)))
                .collect(),
            wallet_error: None,
            grant_fn: Box::new(|_, request| {
                let resource_type = request.access_token.access[0].resource_type;
                Ok(finalized_response(&format!(
                    "{}-token",
                    resource_type.as_str()
                )))
            }),
            continue_fn: Box::new(|_| Ok(finalized_response("final-token"))),
            incoming_fn: Box::new(|request| {
                Ok(IncomingPayment {
                    id: Url::parse(&format!("{}/incoming-payments/ip-1", request.wallet_address))
                        .unwrap(),
                    wallet_address: request.wallet_address.clone(),
                    incoming_amount: request.incoming_amount.clone(),
                    expires_at: request.expires_at,
                })
            }),
            quote_fn: Box::new(|request| {
                Ok(Quote {
                    id: Url::parse(&format!("{}/quotes/q-1", request.wallet_address)).unwrap(),
                    wallet_address: request.wallet_address.clone(),
                    receiver: request.receiver.clone(),
                    debit_amount: None,
                    receive_amount: None,
                })
            }),
            outgoing_fn: Box::new(|request| {
                Ok(OutgoingPayment {
                    id: Url::parse(&format!(
                        "{}/outgoing-payments/op-1",
                        request.wallet_address
                    ))
                    .unwrap(),
                    wallet_address: request.wallet_address.clone(),
                    quote_id: request.quote_id.clone(),
                })
            }),
        }
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn continuations(&self) -> Vec<ContinuationCall> {
        self.continuations.lock().unwrap().clone()
    }

    pub(crate) fn continue_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::ContinueGrant))
    }

    pub(crate) fn grant_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::RequestGrant { .. }))
    }

    pub(crate) fn create_calls(&self) -> usize {
        self.count(|c| {
            matches!(
                c,
                Call::CreateIncoming { .. } | Call::CreateQuote { .. } | Call::CreateOutgoing { .. }
            )
        })
    }

    fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| predicate(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl PaymentOps for MockOps {
    fn fetch_wallet_metadata<'a>(
        &'a self,
        wallet_url: &'a Url,
    ) -> BoxFuture<'a, Result<WalletMetadata, ApiError>> {
        Box::pin(async move {
            self.record(Call::FetchWallet {
                url: wallet_url.to_string(),
            });
            if let Some(err) = &self.wallet_error {
                return Err(err.clone());
            }
            self.wallets
                .get(wallet_url.as_str())
                .cloned()
                .ok_or_else(|| ApiError::Transport {
                    context: "GET wallet-address",
                    message: format!("no route to {wallet_url}"),
                })
        })
    }

    fn request_grant<'a>(
        &'a self,
        auth_server: &'a Url,
        request: &'a GrantRequest,
    ) -> BoxFuture<'a, Result<GrantResponse, ApiError>> {
        Box::pin(async move {
            self.record(Call::RequestGrant {
                auth_server: auth_server.to_string(),
                resource_type: request.access_token.access[0].resource_type,
                interactive: request.is_interactive(),
            });
            (self.grant_fn)(auth_server, request)
        })
    }

    fn continue_grant<'a>(
        &'a self,
        continue_uri: &'a Url,
        continue_access_token: &'a str,
    ) -> BoxFuture<'a, Result<GrantResponse, ApiError>> {
        Box::pin(async move {
            let attempt = self.continue_calls();
            self.record(Call::ContinueGrant);
            self.continuations.lock().unwrap().push(ContinuationCall {
                at: tokio::time::Instant::now(),
                uri: continue_uri.to_string(),
                token: continue_access_token.to_owned(),
            });
            (self.continue_fn)(attempt)
        })
    }

    fn create_incoming_payment<'a>(
        &'a self,
        _resource_base: &'a Url,
        access_token: &'a str,
        request: &'a IncomingPaymentRequest,
    ) -> BoxFuture<'a, Result<IncomingPayment, ApiError>> {
        Box::pin(async move {
            let result = (self.incoming_fn)(request);
            self.record(Call::CreateIncoming {
                id: result
                    .as_ref()
                    .map(|p| p.id.to_string())
                    .unwrap_or_default(),
                token: access_token.to_owned(),
            });
            result
        })
    }

    fn create_quote<'a>(
        &'a self,
        _resource_base: &'a Url,
        access_token: &'a str,
        request: &'a QuoteRequest,
    ) -> BoxFuture<'a, Result<Quote, ApiError>> {
        Box::pin(async move {
            let result = (self.quote_fn)(request);
            self.record(Call::CreateQuote {
                id: result
                    .as_ref()
                    .map(|q| q.id.to_string())
                    .unwrap_or_default(),
                receiver: request.receiver.to_string(),
                token: access_token.to_owned(),
            });
            result
        })
    }

    fn create_outgoing_payment<'a>(
        &'a self,
        _resource_base: &'a Url,
        access_token: &'a str,
        request: &'a OutgoingPaymentRequest,
    ) -> BoxFuture<'a, Result<OutgoingPayment, ApiError>> {
        Box::pin(async move {
            let result = (self.outgoing_fn)(request);
            self.record(Call::CreateOutgoing {
                quote_id: request.quote_id.to_string(),
                token: access_token.to_owned(),
            });
            result
        })
    }
}
