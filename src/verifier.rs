//! Verification of externally issued tokens.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::exchange::mapper::MappingError;
use crate::jwks::JwksCache;

/// Claim set carried in a token payload.
pub type Claims = Map<String, Value>;

/// Claims of a token whose signature and validity window checked out.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedClaims(Claims);

impl VerifiedClaims {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn subject(&self) -> Option<&str> {
        self.0.get("sub").and_then(Value::as_str)
    }

    pub fn as_map(&self) -> &Claims {
        &self.0
    }

    pub fn into_inner(self) -> Claims {
        self.0
    }
}

impl From<Claims> for VerifiedClaims {
    fn from(claims: Claims) -> Self {
        Self(claims)
    }
}

/// Why a token was not accepted.
///
/// Every variant is a client authentication failure.
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("malformed token: {0}")]
    MalformedToken(String),
    #[error("unable to find key {0:?}")]
    UnknownKey(String),
    #[error("token signature is invalid")]
    InvalidSignature,
    #[error("token is expired")]
    Expired,
    #[error("token is not valid yet")]
    NotYetValid,
    #[error("algorithm {0:?} is not allowed for this key")]
    AlgorithmMismatch(Algorithm),
    #[error("claims rejected: {0}")]
    ClaimsRejected(String),
}

impl VerificationError {
    /// Short label for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedToken(_) => "malformed_token",
            Self::UnknownKey(_) => "unknown_key",
            Self::InvalidSignature => "invalid_signature",
            Self::Expired => "expired",
            Self::NotYetValid => "not_yet_valid",
            Self::AlgorithmMismatch(_) => "algorithm_mismatch",
            Self::ClaimsRejected(_) => "claims_rejected",
        }
    }

    fn from_decode(err: jsonwebtoken::errors::Error, alg: Algorithm) -> Self {
        match err.kind() {
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::ImmatureSignature => Self::NotYetValid,
            ErrorKind::InvalidAlgorithm => Self::AlgorithmMismatch(alg),
            _ => Self::MalformedToken(err.to_string()),
        }
    }
}

impl From<MappingError> for VerificationError {
    fn from(err: MappingError) -> Self {
        Self::ClaimsRejected(err.to_string())
    }
}

/// Checks tokens against the keys of a [`JwksCache`].
///
/// Only structure, signature and time window are checked; which claims a
/// token must carry is left to the claims mapper.
#[derive(Clone)]
pub struct TokenVerifier {
    cache: Arc<JwksCache>,
    leeway_secs: u64,
}

impl TokenVerifier {
    pub fn new(cache: Arc<JwksCache>) -> Self {
        Self {
            cache,
            leeway_secs: 0,
        }
    }

    /// Clock skew tolerated on `exp` and `nbf`.
    pub fn with_leeway(mut self, leeway_secs: u64) -> Self {
        self.leeway_secs = leeway_secs;
        self
    }

    /// Verify a compact JWS and return its claims.
    ///
    /// Kicks off a background key refresh when the cache is stale; the
    /// lookup itself always uses the snapshot in force right now.
    pub fn verify(&self, token: &str) -> Result<VerifiedClaims, VerificationError> {
        self.cache.refresh_if_stale(Instant::now());

        let header =
            decode_header(token).map_err(|e| VerificationError::MalformedToken(e.to_string()))?;
        let kid = header.kid.ok_or_else(|| {
            VerificationError::MalformedToken("expecting JWT header to have string kid".to_string())
        })?;

        let key = self
            .cache
            .get_key(&kid)
            .ok_or_else(|| VerificationError::UnknownKey(kid.clone()))?;

        if let Some(expected) = key.algorithm() {
            if expected != header.alg {
                return Err(VerificationError::AlgorithmMismatch(header.alg));
            }
        }

        let mut validation = Validation::new(header.alg);
        validation.leeway = self.leeway_secs;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = decode::<Claims>(token, key.decoding_key(), &validation)
            .map_err(|e| VerificationError::from_decode(e, header.alg))?;

        debug!(kid = %kid, alg = ?header.alg, "Token verified");

        Ok(VerifiedClaims(data.claims))
    }
}
