//! Runtime configuration shared by every request.

use std::sync::Arc;

use super::issuer::InternalTokenIssuer;
use super::mapper::{ClaimsMapper, IdentityMapper};
use crate::proxy::ForwardingProxy;
use crate::transport::TokenHeaderField;
use crate::verifier::TokenVerifier;

/// Everything the exchange handler needs, built once at startup.
pub struct ServiceConfig {
    /// Checks inbound tokens against the key set cache.
    pub verifier: TokenVerifier,
    /// External to internal claim transformation.
    pub mapper: Arc<dyn ClaimsMapper>,
    /// Signs the internal token.
    pub issuer: InternalTokenIssuer,
    /// Where the external token is read from.
    pub incoming: TokenHeaderField,
    /// Where the internal token is written to.
    pub outgoing: TokenHeaderField,
    /// Upstream relay.
    pub proxy: ForwardingProxy,
}

impl ServiceConfig {
    /// Identity mapping and `Authorization: Bearer` in both directions.
    pub fn new(
        verifier: TokenVerifier,
        issuer: InternalTokenIssuer,
        proxy: ForwardingProxy,
    ) -> Self {
        Self {
            verifier,
            mapper: Arc::new(IdentityMapper),
            issuer,
            incoming: TokenHeaderField::default(),
            outgoing: TokenHeaderField::default(),
            proxy,
        }
    }

    pub fn with_mapper(mut self, mapper: impl ClaimsMapper + 'static) -> Self {
        self.mapper = Arc::new(mapper);
        self
    }

    pub fn with_incoming_header(mut self, field: TokenHeaderField) -> Self {
        self.incoming = field;
        self
    }

    pub fn with_outgoing_header(mut self, field: TokenHeaderField) -> Self {
        self.outgoing = field;
        self
    }
}
