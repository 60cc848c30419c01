//! JWT exchange proxy.
//!
//! Authenticates inbound requests against a rotating JWKS, re-signs the
//! verified claims with an internal secret and forwards the request to a
//! single upstream with the new token in place of the old one.

pub mod config;
pub mod exchange;
pub mod jwks;
pub mod proxy;
pub mod transport;
pub mod verifier;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::Args;
pub use exchange::{router, ServiceConfig};
pub use verifier::{Claims, TokenVerifier, VerificationError, VerifiedClaims};
