//! JWK to verification key conversion.

use jsonwebtoken::jwk::Jwk;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// JWKS document as served by the identity provider.
///
/// Entries stay untyped so that one key we cannot use does not reject the
/// whole set.
#[derive(Debug, Deserialize)]
pub struct JwksDocument {
    pub keys: Vec<Value>,
}

/// Public key material used to check token signatures.
#[derive(Clone)]
pub struct VerificationKey {
    key: DecodingKey,
    algorithm: Option<Algorithm>,
}

impl VerificationKey {
    pub fn new(key: DecodingKey, algorithm: Option<Algorithm>) -> Self {
        Self { key, algorithm }
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }

    /// Algorithm the key is published for, if the JWK names one.
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Reasons a JWKS entry is left out of the key set.
#[derive(Debug, thiserror::Error)]
pub enum JwkError {
    #[error("key has no string kid")]
    MissingKid,
    #[error("key is marked for encryption")]
    EncryptionKey,
    #[error("symmetric keys are not accepted from a key set")]
    SymmetricKey,
    #[error("unsupported key: {0}")]
    Unsupported(String),
}

/// Convert one JWKS entry into its key id and verification key.
pub fn parse_jwk(raw: &Value) -> Result<(String, VerificationKey), JwkError> {
    if raw.get("use").and_then(Value::as_str) == Some("enc") {
        return Err(JwkError::EncryptionKey);
    }
    if raw.get("kty").and_then(Value::as_str) == Some("oct") {
        return Err(JwkError::SymmetricKey);
    }

    let kid = raw
        .get("kid")
        .and_then(Value::as_str)
        .ok_or(JwkError::MissingKid)?
        .to_string();

    // An `alg` we do not know is ignored rather than fatal: the header
    // algorithm still has to match the key family on decode.
    let algorithm = raw
        .get("alg")
        .and_then(Value::as_str)
        .and_then(|alg| Algorithm::from_str(alg).ok());

    let jwk: Jwk =
        serde_json::from_value(raw.clone()).map_err(|e| JwkError::Unsupported(e.to_string()))?;
    let key = DecodingKey::from_jwk(&jwk).map_err(|e| JwkError::Unsupported(e.to_string()))?;

    Ok((kid, VerificationKey::new(key, algorithm)))
}
