//! Verification keys fetched from a remote JSON Web Key Set.
//!
//! The cache keeps an immutable snapshot of the provider's keys and replaces
//! it wholesale from a background task once the refresh interval elapses.

pub mod cache;
pub mod keys;

pub use cache::{fetch_key_set, JwksCache, JwksFetchError, KeySet};
pub use keys::{parse_jwk, JwkError, VerificationKey};
