//! Admission middleware for handlers served next to the proxy.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

use super::handler::ExchangeError;
use crate::transport::TokenHeaderField;
use crate::verifier::TokenVerifier;

/// Verifier and header location used by [`require_token`].
#[derive(Clone)]
pub struct Gatekeeper {
    verifier: TokenVerifier,
    field: TokenHeaderField,
}

impl Gatekeeper {
    pub fn new(verifier: TokenVerifier, field: TokenHeaderField) -> Self {
        Self { verifier, field }
    }
}

/// Admit a request only if it carries a valid token.
///
/// The verified claims are added to the request extensions; the credential
/// header itself is left in place.
///
/// ```ignore
/// let app = Router::new()
///     .route("/notifications", post(create_notification))
///     .layer(axum::middleware::from_fn_with_state(gate, require_token));
/// ```
pub async fn require_token(
    State(gate): State<Arc<Gatekeeper>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ExchangeError> {
    let token = gate.field.peek(request.headers());
    let claims = gate.verifier.verify(&token).inspect_err(|e| {
        warn!(kind = e.kind(), error = %e, path = %request.uri().path(), "Request rejected")
    })?;

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}
