//! Access scopes and the grant negotiation wire shapes.
//!
//! An authorization server answers a grant request with one of two shapes,
//! distinguished only by field presence: a finalized grant carrying a usable
//! access token, or a pending grant carrying continuation coordinates and an
//! interaction redirect. [`Grant::from_response`] makes that split explicit,
//! with a third malformed outcome for responses matching neither.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::amount::Amount;
use crate::error::GrantError;

/// Default continuation wait when the server does not advertise one.
pub const DEFAULT_CONTINUE_WAIT: Duration = Duration::from_secs(5);

/// The resource type a grant authorizes access to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessType {
    /// Incoming payments on the receiving account.
    IncomingPayment,
    /// Quotes on the sending account.
    Quote,
    /// Outgoing payments on the sending account.
    OutgoingPayment,
}

impl AccessType {
    /// Returns the wire name of this resource type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::IncomingPayment => "incoming-payment",
            Self::Quote => "quote",
            Self::OutgoingPayment => "outgoing-payment",
        }
    }
}

/// An action a grant authorizes on its resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessAction {
    /// Create a resource.
    Create,
    /// Read a resource created under this grant.
    Read,
    /// Read any resource of this type on the account.
    ReadAll,
    /// List resources.
    List,
    /// Complete an incoming payment.
    Complete,
}

/// Spending limits attached to an access scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessLimits {
    /// Maximum total amount the grant may debit.
    pub debit_amount: Amount,
}

/// One scoped access request: resource type, actions, and optional limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessScope {
    /// The resource type this scope covers.
    #[serde(rename = "type")]
    pub resource_type: AccessType,
    /// The actions requested on that type.
    pub actions: Vec<AccessAction>,
    /// The account the scope is bound to, when the server requires one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<Url>,
    /// Optional spending limits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limits: Option<AccessLimits>,
}

impl AccessScope {
    /// Creates a scope for the given resource type and actions.
    #[must_use]
    pub const fn new(resource_type: AccessType, actions: Vec<AccessAction>) -> Self {
        Self {
            resource_type,
            actions,
            identifier: None,
            limits: None,
        }
    }

    /// Binds the scope to a specific account identifier.
    #[must_use]
    pub fn for_account(mut self, identifier: Url) -> Self {
        self.identifier = Some(identifier);
        self
    }

    /// Attaches a debit limit to the scope.
    #[must_use]
    pub fn with_debit_limit(mut self, debit_amount: Amount) -> Self {
        self.limits = Some(AccessLimits { debit_amount });
        self
    }
}

/// The `access_token` section of a grant request.
#[derive(Debug, Clone, Serialize)]
pub struct AccessTokenRequest {
    /// The scopes being requested.
    pub access: Vec<AccessScope>,
}

/// The `interact` section of a grant request.
#[derive(Debug, Clone, Serialize)]
pub struct InteractRequest {
    /// Interaction start modes; `["redirect"]` for browser-based consent.
    pub start: Vec<String>,
}

/// A grant request body as posted to an authorization server.
#[derive(Debug, Clone, Serialize)]
pub struct GrantRequest {
    /// The requested access.
    pub access_token: AccessTokenRequest,
    /// Interaction parameters; absent for non-interactive requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interact: Option<InteractRequest>,
}

impl GrantRequest {
    /// Builds a non-interactive grant request for one scope.
    #[must_use]
    pub fn non_interactive(scope: AccessScope) -> Self {
        Self {
            access_token: AccessTokenRequest {
                access: vec![scope],
            },
            interact: None,
        }
    }

    /// Builds an interactive grant request with a redirect start marker.
    #[must_use]
    pub fn interactive(scope: AccessScope) -> Self {
        Self {
            access_token: AccessTokenRequest {
                access: vec![scope],
            },
            interact: Some(InteractRequest {
                start: vec!["redirect".to_owned()],
            }),
        }
    }

    /// Returns whether this request asked for interaction.
    #[must_use]
    pub const fn is_interactive(&self) -> bool {
        self.interact.is_some()
    }
}

/// The `access_token` section of a finalized grant response.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessTokenResponse {
    /// The bearer token value.
    pub value: String,
    /// Token management URI, if the server exposes one.
    #[serde(default)]
    pub manage: Option<Url>,
    /// Token lifetime in seconds, if advertised.
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// The continuation token inside a `continue` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ContinueToken {
    /// The continuation access token value.
    pub value: String,
}

/// The `continue` section of a pending grant response.
#[derive(Debug, Clone, Deserialize)]
pub struct ContinueResponse {
    /// The continuation endpoint.
    pub uri: Url,
    /// The token authorizing continuation calls; never a bearer token.
    pub access_token: ContinueToken,
    /// Seconds the client must wait before the next continuation call.
    #[serde(default)]
    pub wait: Option<u64>,
}

/// The `interact` section of a pending grant response.
#[derive(Debug, Clone, Deserialize)]
pub struct InteractResponse {
    /// Where a human must be sent to authorize the grant.
    pub redirect: Url,
    /// Interaction reference, when the server issues one.
    #[serde(default)]
    pub interact_ref: Option<String>,
}

/// A raw grant response as returned by request or continuation calls.
///
/// Which of the optional sections are present determines whether the grant
/// is pending or finalized; use [`Grant::from_response`] to classify.
#[derive(Debug, Clone, Deserialize)]
pub struct GrantResponse {
    /// Present on finalized grants.
    #[serde(default)]
    pub access_token: Option<AccessTokenResponse>,
    /// Present while the negotiation can be continued.
    #[serde(default, rename = "continue")]
    pub continuation: Option<ContinueResponse>,
    /// Present when the grant needs human interaction.
    #[serde(default)]
    pub interact: Option<InteractResponse>,
}

/// The interaction coordinates of a pending grant.
#[derive(Debug, Clone)]
pub struct PendingInteraction {
    /// Redirect URL to surface out-of-band for human authorization.
    pub redirect: Url,
    /// Interaction reference, when issued.
    pub interact_ref: Option<String>,
}

/// A grant awaiting authorization.
///
/// Its fields are used only to continue the negotiation; in particular
/// `continue_access_token` must never be presented as a bearer token.
#[derive(Debug, Clone)]
pub struct PendingGrant {
    /// The continuation endpoint.
    pub continue_uri: Url,
    /// The continuation access token.
    pub continue_access_token: String,
    /// Minimum wait before the next continuation call.
    pub wait: Duration,
    /// Interaction coordinates; present on the initial pending response,
    /// possibly absent on later poll iterations.
    pub interact: Option<PendingInteraction>,
}

/// A finalized grant whose token is scoped exactly to the requested access.
#[derive(Debug, Clone)]
pub struct FinalizedGrant {
    /// The bearer token for resource access.
    pub access_token: String,
    /// Token lifetime, if advertised.
    pub expires_in: Option<Duration>,
    /// Token management URI, if exposed.
    pub manage: Option<Url>,
}

/// A classified grant: pending or finalized.
#[derive(Debug, Clone)]
pub enum Grant {
    /// Awaiting authorization; continue via the negotiator.
    Pending(PendingGrant),
    /// Usable; carries the scoped access token.
    Finalized(FinalizedGrant),
}

impl Grant {
    /// Classifies a raw response by field presence.
    ///
    /// A response carrying an access token is finalized even when it also
    /// carries a continuation section (servers include one for token
    /// management). A response with only a continuation section is pending.
    ///
    /// # Errors
    ///
    /// Returns [`GrantError::Malformed`] when the response matches neither
    /// shape.
    pub fn from_response(response: GrantResponse) -> Result<Self, GrantError> {
        if let Some(token) = response.access_token {
            return Ok(Self::Finalized(FinalizedGrant {
                access_token: token.value,
                expires_in: token.expires_in.map(Duration::from_secs),
                manage: token.manage,
            }));
        }

        if let Some(continuation) = response.continuation {
            return Ok(Self::Pending(PendingGrant {
                continue_uri: continuation.uri,
                continue_access_token: continuation.access_token.value,
                wait: continuation
                    .wait
                    .map_or(DEFAULT_CONTINUE_WAIT, Duration::from_secs),
                interact: response.interact.map(|i| PendingInteraction {
                    redirect: i.redirect,
                    interact_ref: i.interact_ref,
                }),
            }));
        }

        Err(GrantError::Malformed {
            reason: "neither access_token nor continue present".to_owned(),
        })
    }
}
