//! Per-request token exchange and forwarding.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::InvalidHeaderValue;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tracing::{debug, warn};

use super::issuer::SigningError;
use super::service::ServiceConfig;
use crate::proxy::ProxyError;
use crate::verifier::VerificationError;

/// Why a request was not forwarded, or failed while being forwarded.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error(transparent)]
    Verification(#[from] VerificationError),
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error("internal token is not a valid header value: {0}")]
    Inject(#[from] InvalidHeaderValue),
    #[error(transparent)]
    Proxy(#[from] ProxyError),
}

impl IntoResponse for ExchangeError {
    fn into_response(self) -> Response {
        match self {
            // Verification detail goes back to the caller; issuance faults stay internal.
            Self::Verification(e) => (StatusCode::UNAUTHORIZED, e.to_string()).into_response(),
            Self::Signing(_) | Self::Inject(_) => StatusCode::UNAUTHORIZED.into_response(),
            Self::Proxy(e) => e.into_response(),
        }
    }
}

/// Router that exchanges the token of every request and forwards it.
pub fn router(config: Arc<ServiceConfig>) -> Router {
    Router::new()
        .fallback(exchange_and_forward)
        .with_state(config)
}

/// Replace the external token in `headers` with a freshly issued internal one.
pub fn exchange_token(
    config: &ServiceConfig,
    headers: &mut HeaderMap,
) -> Result<(), ExchangeError> {
    let token = config.incoming.extract(headers);

    let claims = config
        .verifier
        .verify(&token)
        .inspect_err(|e| warn!(kind = e.kind(), error = %e, "Authentication failed"))?;

    let mapped = config
        .mapper
        .map(claims)
        .map_err(VerificationError::from)
        .inspect_err(|e| warn!(kind = e.kind(), error = %e, "Authentication failed"))?;

    let internal = config
        .issuer
        .issue(mapped)
        .inspect_err(|e| warn!(error = %e, "Could not create the internal token"))?;

    config.outgoing.inject(headers, &internal)?;
    debug!(header = %config.outgoing.name(), "Internal token injected");
    Ok(())
}

/// Exchange the token, then hand the request to the forwarding proxy.
pub async fn exchange_and_forward(
    State(config): State<Arc<ServiceConfig>>,
    mut request: Request,
) -> Result<Response, ExchangeError> {
    exchange_token(&config, request.headers_mut())?;
    Ok(config.proxy.forward(request).await?)
}
