//! Claim transformation between the external and the internal token.

use serde_json::Value;
use std::collections::BTreeSet;

use crate::verifier::{Claims, VerifiedClaims};

/// A mapper could not produce a claim set worth signing.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct MappingError(String);

impl MappingError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Turns verified external claims into the claims of the internal token.
///
/// Implementations must be pure: no I/O, same input gives the same output.
pub trait ClaimsMapper: Send + Sync {
    fn map(&self, claims: VerifiedClaims) -> Result<Claims, MappingError>;
}

impl<F> ClaimsMapper for F
where
    F: Fn(VerifiedClaims) -> Result<Claims, MappingError> + Send + Sync,
{
    fn map(&self, claims: VerifiedClaims) -> Result<Claims, MappingError> {
        self(claims)
    }
}

/// Passes every claim through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityMapper;

impl ClaimsMapper for IdentityMapper {
    fn map(&self, claims: VerifiedClaims) -> Result<Claims, MappingError> {
        Ok(claims.into_inner())
    }
}

/// Keeps only the listed claims.
#[derive(Debug, Clone)]
pub struct AllowListMapper {
    allowed: BTreeSet<String>,
}

impl AllowListMapper {
    pub fn new<I, S>(claims: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: claims.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a comma-separated claim list, ignoring blanks.
    pub fn from_csv(list: &str) -> Self {
        Self::new(
            list.split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty()),
        )
    }

    pub fn allowed(&self) -> impl Iterator<Item = &str> {
        self.allowed.iter().map(String::as_str)
    }
}

impl ClaimsMapper for AllowListMapper {
    fn map(&self, claims: VerifiedClaims) -> Result<Claims, MappingError> {
        let kept: Claims = claims
            .into_inner()
            .into_iter()
            .filter(|(name, _)| self.allowed.contains(name))
            .collect();

        if kept.is_empty() {
            return Err(MappingError::new("token carries none of the forwarded claims"));
        }
        Ok(kept)
    }
}

/// Reads a string claim, failing when it is absent or not a string.
pub fn required_str<'a>(claims: &'a VerifiedClaims, name: &str) -> Result<&'a str, MappingError> {
    claims
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| MappingError::new(format!("missing string claim {name:?}")))
}
