//! HTTP message signature construction.
//!
//! Requests are signed over a canonical base of covered components
//! (`@method`, `@target-uri`, and, when present, `authorization` and
//! `content-digest`) and carry the result in `Signature-Input` and
//! `Signature` headers. The signing cryptography itself is delegated to a
//! [`RequestSigner`] capability; [`Ed25519Signer`] is the stock
//! implementation.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::pkcs8::DecodePrivateKey as _;
use ed25519_dalek::{Signer as _, SigningKey};
use sha2::{Digest as _, Sha512};
use url::Url;

use opflow::error::AuthError;

/// Signs canonical signature bases on behalf of one key identity.
pub trait RequestSigner: Send + Sync {
    /// The key identifier advertised in signature parameters.
    fn key_id(&self) -> &str;

    /// The signature algorithm name advertised in signature parameters.
    fn algorithm(&self) -> &'static str {
        "ed25519"
    }

    /// Signs the canonical signature base.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] when the underlying capability cannot sign.
    fn sign(&self, base: &[u8]) -> Result<Vec<u8>, AuthError>;
}

/// [`RequestSigner`] backed by an Ed25519 private key.
pub struct Ed25519Signer {
    key: SigningKey,
    key_id: String,
}

impl std::fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl Ed25519Signer {
    /// Parses a PKCS#8 PEM private key.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidKey`] when the PEM does not contain a
    /// valid Ed25519 private key.
    pub fn from_pkcs8_pem(pem: &str, key_id: impl Into<String>) -> Result<Self, AuthError> {
        let key = SigningKey::from_pkcs8_pem(pem).map_err(|e| AuthError::InvalidKey {
            reason: e.to_string(),
        })?;
        Ok(Self {
            key,
            key_id: key_id.into(),
        })
    }

    /// Builds a signer from a base64-encoded 32-byte seed.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidKey`] on bad base64 or a wrong-length seed.
    pub fn from_seed_base64(seed: &str, key_id: impl Into<String>) -> Result<Self, AuthError> {
        let bytes = BASE64.decode(seed.trim()).map_err(|e| AuthError::InvalidKey {
            reason: format!("seed is not valid base64: {e}"),
        })?;
        let seed: [u8; 32] = bytes.try_into().map_err(|_| AuthError::InvalidKey {
            reason: "seed must be exactly 32 bytes".to_owned(),
        })?;
        Ok(Self {
            key: SigningKey::from_bytes(&seed),
            key_id: key_id.into(),
        })
    }

    /// Returns the public verifying key for this signer.
    #[must_use]
    pub fn verifying_key(&self) -> ed25519_dalek::VerifyingKey {
        self.key.verifying_key()
    }
}

impl RequestSigner for Ed25519Signer {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    fn sign(&self, base: &[u8]) -> Result<Vec<u8>, AuthError> {
        Ok(self.key.sign(base).to_bytes().to_vec())
    }
}

/// The signature headers to attach to one request.
#[derive(Debug, Clone)]
pub(crate) struct SignedHeaders {
    pub signature_input: String,
    pub signature: String,
    /// Present when the request carries a body.
    pub content_digest: Option<String>,
}

/// Builds the signature headers for one request.
///
/// The covered components are, in order: `@method`, `@target-uri`, then
/// `authorization` and `content-digest` when present.
pub(crate) fn signature_headers(
    signer: &dyn RequestSigner,
    method: &str,
    target_uri: &Url,
    authorization: Option<&str>,
    body: Option<&[u8]>,
    created: i64,
) -> Result<SignedHeaders, AuthError> {
    let content_digest = body.map(|b| format!("sha-512=:{}:", BASE64.encode(Sha512::digest(b))));

    let mut components: Vec<(&str, String)> = vec![
        ("@method", method.to_owned()),
        ("@target-uri", target_uri.to_string()),
    ];
    if let Some(authorization) = authorization {
        components.push(("authorization", authorization.to_owned()));
    }
    if let Some(digest) = &content_digest {
        components.push(("content-digest", digest.clone()));
    }

    let covered = components
        .iter()
        .map(|(name, _)| format!("\"{name}\""))
        .collect::<Vec<_>>()
        .join(" ");
    let params = format!(
        "({covered});created={created};keyid=\"{}\";alg=\"{}\"",
        signer.key_id(),
        signer.algorithm()
    );

    let mut base = String::new();
    for (name, value) in &components {
        base.push_str(&format!("\"{name}\": {value}\n"));
    }
    base.push_str(&format!("\"@signature-params\": {params}"));

    let signature = signer.sign(base.as_bytes())?;

    Ok(SignedHeaders {
        signature_input: format!("sig1={params}"),
        signature: format!("sig1=:{}:", BASE64.encode(signature)),
        content_digest,
    })
}
