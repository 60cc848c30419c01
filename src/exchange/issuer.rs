//! Token issuer for the internally trusted token.

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::Value;
use tracing::debug;

use crate::verifier::Claims;

/// Algorithm of every internal token.
pub const INTERNAL_ALGORITHM: Algorithm = Algorithm::HS256;

/// The internal token could not be produced.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("internal signing secret is empty")]
    EmptySecret,
    #[error("failed to sign internal token: {0}")]
    Encode(#[from] jsonwebtoken::errors::Error),
}

/// Signs mapped claims with the shared internal secret.
pub struct InternalTokenIssuer {
    /// Signing key.
    encoding_key: EncodingKey,
    /// Audience added when the mapped claims carry none.
    audience: Option<String>,
}

impl InternalTokenIssuer {
    /// The secret is used as raw bytes.
    pub fn new(secret: &[u8]) -> Result<Self, SigningError> {
        if secret.is_empty() {
            return Err(SigningError::EmptySecret);
        }
        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            audience: None,
        })
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    pub fn audience(&self) -> Option<&str> {
        self.audience.as_deref()
    }

    /// Produce a compact signed token from the claims.
    pub fn issue(&self, mut claims: Claims) -> Result<String, SigningError> {
        if let Some(ref aud) = self.audience {
            claims
                .entry("aud")
                .or_insert_with(|| Value::String(aud.clone()));
        }

        let token = encode(&Header::new(INTERNAL_ALGORITHM), &claims, &self.encoding_key)?;

        debug!(
            sub = ?claims.get("sub"),
            claim_count = claims.len(),
            "Issued internal token"
        );

        Ok(token)
    }
}
