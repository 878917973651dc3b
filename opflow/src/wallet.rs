//! Wallet address resolution.
//!
//! Wallet identifiers arrive either as full http(s) URLs or as payment
//! pointers, the `$`-prefixed shorthand for a secure-scheme wallet URL.
//! Resolution normalizes the identifier, fetches the public metadata
//! document, and snapshots it as a [`WalletAddress`]. Snapshots are taken
//! fresh per pipeline run and never cached.

use std::sync::Arc;

use serde::Deserialize;
use url::Url;

use crate::api::{ApiError, PaymentOps};
use crate::error::ResolutionError;

/// The payment-pointer shorthand prefix.
pub const PAYMENT_POINTER_SIGIL: char = '$';

/// The public metadata document served at a wallet address URL.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletMetadata {
    /// The wallet's canonical resource identifier.
    pub id: Url,
    /// The authorization server governing this wallet.
    pub auth_server: Url,
    /// The resource server hosting this wallet's payment resources.
    #[serde(default)]
    pub resource_server: Option<Url>,
    /// Asset code of the wallet's account.
    pub asset_code: String,
    /// Asset scale of the wallet's account.
    pub asset_scale: u8,
    /// Human-readable account name, when published.
    #[serde(default)]
    pub public_name: Option<String>,
}

/// An immutable snapshot of a resolved wallet address.
#[derive(Debug, Clone)]
pub struct WalletAddress {
    /// The normalized wallet address URL the snapshot was fetched from.
    pub url: Url,
    /// The authorization server to negotiate grants against.
    pub auth_server: Url,
    /// The wallet's canonical resource identifier.
    pub resource_id: Url,
    /// Asset code of the wallet's account.
    pub asset_code: String,
    /// Asset scale of the wallet's account.
    pub asset_scale: u8,
}

impl WalletAddress {
    /// Returns the base URL payment resources are created under: the origin
    /// of the wallet's resource identifier.
    #[must_use]
    pub fn resource_base(&self) -> Url {
        let mut base = self.resource_id.clone();
        base.set_path("");
        base.set_query(None);
        base.set_fragment(None);
        base
    }
}

/// Normalizes a wallet identifier into a wallet address URL.
///
/// A leading payment-pointer sigil is substituted with the secure-scheme
/// prefix exactly once; identifiers that are already URLs pass through
/// unchanged, so repeated normalization never double-prefixes.
///
/// # Errors
///
/// Returns [`ResolutionError::InvalidIdentifier`] for empty input, unparsable
/// URLs, or non-http(s) schemes.
pub fn normalize_identifier(identifier: &str) -> Result<Url, ResolutionError> {
    let trimmed = identifier.trim();
    if trimmed.is_empty() {
        return Err(ResolutionError::InvalidIdentifier {
            identifier: identifier.to_owned(),
            reason: "empty identifier".to_owned(),
        });
    }

    let candidate = match trimmed.strip_prefix(PAYMENT_POINTER_SIGIL) {
        Some(rest) => format!("https://{rest}"),
        None => trimmed.to_owned(),
    };

    let url = Url::parse(&candidate).map_err(|e| ResolutionError::InvalidIdentifier {
        identifier: identifier.to_owned(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ResolutionError::InvalidIdentifier {
            identifier: identifier.to_owned(),
            reason: format!("unsupported scheme `{other}`"),
        }),
    }
}

/// Resolves wallet identifiers into [`WalletAddress`] snapshots.
#[derive(Clone)]
pub struct WalletAddressResolver {
    ops: Arc<dyn PaymentOps>,
}

impl std::fmt::Debug for WalletAddressResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletAddressResolver").finish_non_exhaustive()
    }
}

impl WalletAddressResolver {
    /// Creates a resolver over the given operations.
    #[must_use]
    pub fn new(ops: Arc<dyn PaymentOps>) -> Self {
        Self { ops }
    }

    /// Resolves an identifier into a fresh wallet address snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::InvalidIdentifier`] for malformed input,
    /// [`ResolutionError::Unreachable`] when the metadata endpoint cannot be
    /// reached, and [`ResolutionError::UnrecognizedShape`] when it answers
    /// with a document this resolver does not understand.
    pub async fn resolve(&self, identifier: &str) -> Result<WalletAddress, ResolutionError> {
        let url = normalize_identifier(identifier)?;

        let metadata = self
            .ops
            .fetch_wallet_metadata(&url)
            .await
            .map_err(|e| match e {
                ApiError::Codec { .. } => ResolutionError::UnrecognizedShape(e),
                _ => ResolutionError::Unreachable(e),
            })?;

        tracing::debug!(wallet = %metadata.id, asset = %metadata.asset_code, "resolved wallet address");

        Ok(WalletAddress {
            url,
            auth_server: metadata.auth_server,
            resource_id: metadata.id,
            asset_code: metadata.asset_code,
            asset_scale: metadata.asset_scale,
        })
    }
}
