//! Reading and writing tokens in request headers.

use axum::http::header::{HeaderName, HeaderValue, InvalidHeaderName, InvalidHeaderValue};
use axum::http::{header, HeaderMap};

/// Scheme marker in front of bearer credentials.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Where a token lives in a request and whether it carries the bearer prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHeaderField {
    name: HeaderName,
    bearer: bool,
}

impl TokenHeaderField {
    pub fn new(name: &str, bearer: bool) -> Result<Self, InvalidHeaderName> {
        Ok(Self {
            name: HeaderName::from_bytes(name.as_bytes())?,
            bearer,
        })
    }

    /// `<name>: Bearer <token>`
    pub fn bearer(name: &str) -> Result<Self, InvalidHeaderName> {
        Self::new(name, true)
    }

    /// `<name>: <token>`
    pub fn plain(name: &str) -> Result<Self, InvalidHeaderName> {
        Self::new(name, false)
    }

    pub fn name(&self) -> &HeaderName {
        &self.name
    }

    pub fn uses_bearer_scheme(&self) -> bool {
        self.bearer
    }

    /// Token value as found in the headers, without removing it.
    ///
    /// A missing or non-text header reads as an empty token.
    pub fn peek(&self, headers: &HeaderMap) -> String {
        let value = headers
            .get(&self.name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        if self.bearer {
            value.strip_prefix(BEARER_PREFIX).unwrap_or(value).to_string()
        } else {
            value.to_string()
        }
    }

    /// Take the token out of the headers. The header is removed so the
    /// inbound credential is never forwarded.
    pub fn extract(&self, headers: &mut HeaderMap) -> String {
        let token = self.peek(headers);
        headers.remove(&self.name);
        token
    }

    /// Write a token, replacing any existing value of the header.
    pub fn inject(&self, headers: &mut HeaderMap, token: &str) -> Result<(), InvalidHeaderValue> {
        let mut value = if self.bearer {
            HeaderValue::from_str(&format!("{BEARER_PREFIX}{token}"))?
        } else {
            HeaderValue::from_str(token)?
        };
        value.set_sensitive(true);
        headers.insert(self.name.clone(), value);
        Ok(())
    }
}

impl Default for TokenHeaderField {
    fn default() -> Self {
        Self {
            name: header::AUTHORIZATION,
            bearer: true,
        }
    }
}
