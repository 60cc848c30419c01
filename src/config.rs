//! Startup configuration.

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::exchange::{
    AllowListMapper, ClaimsMapper, IdentityMapper, InternalTokenIssuer, ServiceConfig,
};
use crate::jwks::JwksCache;
use crate::proxy::{ForwardingProxy, UpstreamDirector};
use crate::transport::TokenHeaderField;
use crate::verifier::TokenVerifier;

/// Command line arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "jwt-exchange-proxy")]
#[command(about = "Reverse proxy that swaps external JWTs for internally signed ones")]
pub struct Args {
    /// Upstream base URL; only scheme and host are used
    #[arg(long, env = "TARGET_URL")]
    pub target_url: String,

    /// Secret for signing internal tokens (HS256)
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: String,

    /// JWKS endpoint of the external token issuer
    #[arg(long, env = "JWKS_URL")]
    pub jwks_url: String,

    /// JWKS cache refresh interval in seconds
    #[arg(long, default_value_t = 86400, env = "JWKS_REFRESH_SECS")]
    pub jwks_refresh_secs: u64,

    /// Timeout for a single JWKS fetch in seconds
    #[arg(long, default_value_t = 10, env = "JWKS_FETCH_TIMEOUT_SECS")]
    pub jwks_fetch_timeout_secs: u64,

    /// Header carrying the external token
    #[arg(long, default_value = "Authorization", env = "TOKEN_HEADER_IN")]
    pub token_header_in: String,

    /// Whether the external token has a "Bearer " prefix
    #[arg(long, default_value_t = true, action = ArgAction::Set, env = "TOKEN_HEADER_IN_BEARER")]
    pub token_header_in_bearer: bool,

    /// Header receiving the internal token
    #[arg(long, default_value = "Authorization", env = "TOKEN_HEADER_OUT")]
    pub token_header_out: String,

    /// Whether the internal token gets a "Bearer " prefix
    #[arg(long, default_value_t = true, action = ArgAction::Set, env = "TOKEN_HEADER_OUT_BEARER")]
    pub token_header_out_bearer: bool,

    /// Audience added to internal tokens that carry none
    #[arg(long, env = "INTERNAL_TOKEN_AUDIENCE")]
    pub internal_token_audience: Option<String>,

    /// Claims copied into the internal token (comma-separated); all when unset
    #[arg(long, env = "FORWARD_CLAIMS")]
    pub forward_claims: Option<String>,

    /// Clock skew tolerance in seconds for exp/nbf validation
    #[arg(long, default_value_t = 0, env = "CLOCK_SKEW_SECS")]
    pub clock_skew_secs: u64,

    /// Upstream request timeout in seconds; unbounded when unset
    #[arg(long, env = "UPSTREAM_TIMEOUT_SECS")]
    pub upstream_timeout_secs: Option<u64>,

    /// Address to listen on
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED), env = "BIND_ADDRESS")]
    pub bind_address: IpAddr,

    /// Port to listen on
    #[arg(long, default_value_t = 3000, env = "PORT")]
    pub port: u16,

    /// Enable verbose logging
    #[arg(short, long, env = "VERBOSE")]
    pub verbose: bool,
}

impl Args {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        UpstreamDirector::new(&self.target_url).context("TARGET_URL is not a usable upstream")?;

        if !self.jwks_url.starts_with("https://") && !self.jwks_url.starts_with("http://") {
            bail!("JWKS_URL must be a valid HTTP(S) URL");
        }

        if self.jwt_secret.is_empty() {
            bail!("JWT_SECRET must not be empty");
        }

        self.incoming_header()?;
        self.outgoing_header()?;

        if let Some(ref list) = self.forward_claims {
            if AllowListMapper::from_csv(list).allowed().next().is_none() {
                bail!("FORWARD_CLAIMS names no claims");
            }
        }

        Ok(())
    }

    pub fn incoming_header(&self) -> Result<TokenHeaderField> {
        TokenHeaderField::new(&self.token_header_in, self.token_header_in_bearer)
            .with_context(|| format!("Invalid TOKEN_HEADER_IN: {:?}", self.token_header_in))
    }

    pub fn outgoing_header(&self) -> Result<TokenHeaderField> {
        TokenHeaderField::new(&self.token_header_out, self.token_header_out_bearer)
            .with_context(|| format!("Invalid TOKEN_HEADER_OUT: {:?}", self.token_header_out))
    }

    pub fn claims_mapper(&self) -> Arc<dyn ClaimsMapper> {
        match self.forward_claims {
            Some(ref list) => Arc::new(AllowListMapper::from_csv(list)),
            None => Arc::new(IdentityMapper),
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    /// Load the key set and assemble the service.
    ///
    /// Fails when the JWKS endpoint cannot deliver a first key set.
    pub async fn build_service(&self) -> Result<ServiceConfig> {
        let jwks_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.jwks_fetch_timeout_secs))
            .build()
            .context("Failed to build JWKS HTTP client")?;

        let cache = JwksCache::initialize(
            self.jwks_url.clone(),
            Duration::from_secs(self.jwks_refresh_secs),
            jwks_client,
        )
        .await
        .context("Could not load JWKS to start working")?;

        let verifier = TokenVerifier::new(Arc::new(cache)).with_leeway(self.clock_skew_secs);

        let mut issuer = InternalTokenIssuer::new(self.jwt_secret.as_bytes())?;
        if let Some(ref audience) = self.internal_token_audience {
            issuer = issuer.with_audience(audience.clone());
        }

        let proxy = ForwardingProxy::to_upstream(
            &self.target_url,
            self.upstream_timeout_secs.map(Duration::from_secs),
        )?;

        let mut service = ServiceConfig::new(verifier, issuer, proxy)
            .with_incoming_header(self.incoming_header()?)
            .with_outgoing_header(self.outgoing_header()?);
        service.mapper = self.claims_mapper();

        info!(
            target = %self.target_url,
            header_in = %self.token_header_in,
            header_out = %self.token_header_out,
            forward_claims = ?self.forward_claims,
            audience = ?self.internal_token_audience,
            "Service configured"
        );

        Ok(service)
    }
}
