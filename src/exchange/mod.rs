//! Token exchange.
//!
//! Verified external claims are mapped, re-signed with the internal secret
//! and forwarded upstream in place of the original credential.

pub mod gate;
pub mod handler;
pub mod issuer;
pub mod mapper;
pub mod service;

pub use gate::{require_token, Gatekeeper};
pub use handler::{exchange_and_forward, exchange_token, router, ExchangeError};
pub use issuer::{InternalTokenIssuer, SigningError, INTERNAL_ALGORITHM};
pub use mapper::{AllowListMapper, ClaimsMapper, IdentityMapper, MappingError};
pub use service::ServiceConfig;
