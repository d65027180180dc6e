//! Identity-token verification
//!
//! Tokens are compact JWS strings signed with RS256 by the identity-aware
//! proxy. Checks run in a fixed order so that cheap claim checks reject a
//! token before any key lookup:
//!
//! 1. expiry
//! 2. issued-at (not yet valid)
//! 3. issuer
//! 4. audience, when one is configured
//! 5. signature, using the key named by the header `kid`

use crate::config::production_latched;
use crate::jwk_cache::{JwkCache, JwkError};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use jsonwebtoken::Algorithm;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Issuer of identity-aware proxy assertions
pub const IAP_ISSUER: &str = "https://cloud.google.com/iap";

/// Issuers whose tokens are accepted
pub const TRUSTED_ISSUERS: &[&str] = &[IAP_ISSUER];

/// JWT verification errors
#[derive(Debug, Error)]
pub enum JwtError {
    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Token has no key id")]
    MissingKeyId,

    #[error("Token expired")]
    Expired,

    #[error("Token not yet valid")]
    NotYetValid,

    #[error("Untrusted issuer: {0}")]
    UntrustedIssuer(String),

    #[error("Audience mismatch")]
    AudienceMismatch,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Signing key error: {0}")]
    Key(#[from] JwkError),
}

impl JwtError {
    /// Whether the failure came from key retrieval rather than the token
    pub fn is_key_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Key(
                JwkError::Fetch(_)
                    | JwkError::Unavailable
                    | JwkError::NoUsableKeys
                    | JwkError::Ssrf(_)
            )
        )
    }
}

/// Claims carried by an identity-aware proxy assertion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IapClaims {
    /// Authenticated e-mail
    pub email: String,
    /// Issuer
    pub iss: String,
    /// Audience
    pub aud: String,
    /// Subject
    pub sub: String,
    /// Issued at, seconds since the epoch
    pub iat: i64,
    /// Expiry, seconds since the epoch
    pub exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenHeader {
    alg: String,
    #[serde(default)]
    kid: Option<String>,
}

/// RS256 verifier backed by a shared key cache
#[derive(Debug, Clone)]
pub struct JwtVerifier {
    keys: Arc<JwkCache>,
    audience: Option<String>,
    allow_unverified: bool,
}

impl JwtVerifier {
    /// Create a verifier that accepts any audience
    pub fn new(keys: Arc<JwkCache>) -> Self {
        Self {
            keys,
            audience: None,
            allow_unverified: false,
        }
    }

    /// Require `aud` to equal `audience`
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Accept claims without a signature check when signing keys cannot be
    /// fetched. Has no effect unless the crate is built with the
    /// `insecure-dev-override` feature and no production configuration has
    /// been validated in this process.
    pub fn with_unverified_fallback(mut self, enabled: bool) -> Self {
        self.allow_unverified = enabled;
        self
    }

    /// Configured audience
    pub fn audience(&self) -> Option<&str> {
        self.audience.as_deref()
    }

    /// Verify a token against the current time
    pub async fn verify(&self, token: &str) -> Result<IapClaims, JwtError> {
        self.verify_at(token, Utc::now().timestamp()).await
    }

    /// Verify a token as of `now` (seconds since the epoch)
    pub async fn verify_at(&self, token: &str, now: i64) -> Result<IapClaims, JwtError> {
        let segments: Vec<&str> = token.split('.').collect();
        let [header_b64, payload_b64, signature_b64] = segments.as_slice() else {
            return Err(JwtError::Malformed(format!(
                "expected 3 segments, found {}",
                segments.len()
            )));
        };
        if header_b64.is_empty() || payload_b64.is_empty() || signature_b64.is_empty() {
            return Err(JwtError::Malformed("empty segment".to_string()));
        }

        let header: TokenHeader = decode_segment(header_b64, "header")?;
        if header.alg != "RS256" {
            return Err(JwtError::UnsupportedAlgorithm(header.alg));
        }
        let claims: IapClaims = decode_segment(payload_b64, "payload")?;

        if now > claims.exp {
            return Err(JwtError::Expired);
        }
        if now < claims.iat {
            return Err(JwtError::NotYetValid);
        }
        if !TRUSTED_ISSUERS.contains(&claims.iss.as_str()) {
            return Err(JwtError::UntrustedIssuer(claims.iss));
        }
        if let Some(expected) = &self.audience
            && &claims.aud != expected
        {
            return Err(JwtError::AudienceMismatch);
        }

        let kid = header.kid.filter(|k| !k.is_empty()).ok_or(JwtError::MissingKeyId)?;
        let key = match self.keys.get_key(&kid).await {
            Ok(key) => key,
            Err(e) => {
                let err = JwtError::from(e);
                if err.is_key_unavailable() && self.unverified_fallback_active() {
                    warn!(
                        sub = %claims.sub,
                        "Signing keys unavailable; accepting unverified claims (development override)"
                    );
                    return Ok(claims);
                }
                return Err(err);
            }
        };

        let message = format!("{header_b64}.{payload_b64}");
        let valid = jsonwebtoken::crypto::verify(
            signature_b64,
            message.as_bytes(),
            key.decoding_key(),
            Algorithm::RS256,
        )
        .map_err(|e| {
            debug!(error = %e, "Signature verification error");
            JwtError::InvalidSignature
        })?;

        if !valid {
            return Err(JwtError::InvalidSignature);
        }

        debug!(sub = %claims.sub, kid = %kid, "Token verified");
        Ok(claims)
    }

    fn unverified_fallback_active(&self) -> bool {
        cfg!(feature = "insecure-dev-override") && self.allow_unverified && !production_latched()
    }
}

fn decode_segment<T: DeserializeOwned>(segment: &str, what: &str) -> Result<T, JwtError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| JwtError::Malformed(format!("{what} is not base64url")))?;
    serde_json::from_slice(&bytes).map_err(|e| JwtError::Malformed(format!("{what}: {e}")))
}

#[cfg(test)]
#[path = "jwt_tests.rs"]
mod jwt_tests;
