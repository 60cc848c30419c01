//! JWKS (JSON Web Key Set) fetching and caching.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::keys::{parse_jwk, JwksDocument, VerificationKey};

/// Failure to obtain a key set from the JWKS endpoint.
#[derive(Debug, thiserror::Error)]
pub enum JwksFetchError {
    #[error("failed to fetch JWKS from {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("JWKS endpoint {url} returned status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("failed to parse JWKS from {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("no usable signing keys in JWKS from {url}")]
    NoKeys { url: String },
}

/// Immutable snapshot of verification keys, indexed by key id.
#[derive(Debug)]
pub struct KeySet {
    keys: HashMap<String, VerificationKey>,
    fetched_at: DateTime<Utc>,
}

impl KeySet {
    pub fn new(keys: HashMap<String, VerificationKey>) -> Self {
        Self {
            keys,
            fetched_at: Utc::now(),
        }
    }

    pub fn get(&self, kid: &str) -> Option<&VerificationKey> {
        self.keys.get(kid)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn kids(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }
}

struct RefreshState {
    last_refreshed: Instant,
    in_flight: bool,
}

/// Key set cache for one JWKS source.
///
/// Readers load the current snapshot without locking. The refresh state
/// mutex is held only for the stale check and for the snapshot swap, never
/// across the network fetch, and at most one refresh runs at a time.
pub struct JwksCache {
    source_url: String,
    refresh_interval: Duration,
    http_client: reqwest::Client,
    current: ArcSwap<KeySet>,
    refresh: Mutex<RefreshState>,
}

impl JwksCache {
    /// Fetch the initial key set. Fails if the source cannot provide one,
    /// since nothing can be verified without it.
    pub async fn initialize(
        source_url: impl Into<String>,
        refresh_interval: Duration,
        http_client: reqwest::Client,
    ) -> Result<Self, JwksFetchError> {
        let source_url = source_url.into();
        let key_set = fetch_key_set(&http_client, &source_url).await?;

        info!(
            url = %source_url,
            key_count = key_set.len(),
            refresh_secs = refresh_interval.as_secs(),
            "JWKS cache initialized"
        );

        Ok(Self {
            source_url,
            refresh_interval,
            http_client,
            current: ArcSwap::from_pointee(key_set),
            refresh: Mutex::new(RefreshState {
                last_refreshed: Instant::now(),
                in_flight: false,
            }),
        })
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// Look up a key in the current snapshot. Never fetches.
    pub fn get_key(&self, kid: &str) -> Option<VerificationKey> {
        self.current.load().get(kid).cloned()
    }

    /// The key set currently in force.
    pub fn snapshot(&self) -> Arc<KeySet> {
        self.current.load_full()
    }

    /// Start a background refresh if the interval has elapsed since the last
    /// successful one and no refresh is already running.
    ///
    /// Returns the handle of the spawned task; dropping it detaches the task.
    pub fn refresh_if_stale(self: &Arc<Self>, now: Instant) -> Option<JoinHandle<()>> {
        {
            let mut state = self.lock_state();
            if state.in_flight {
                debug!(url = %self.source_url, "JWKS refresh already in flight");
                return None;
            }
            if now.saturating_duration_since(state.last_refreshed) < self.refresh_interval {
                return None;
            }
            state.in_flight = true;
        }

        let cache = Arc::clone(self);
        Some(tokio::spawn(async move { cache.refresh().await }))
    }

    async fn refresh(&self) {
        debug!(url = %self.source_url, "Refreshing JWKS");
        let fetched = fetch_key_set(&self.http_client, &self.source_url).await;

        let mut state = self.lock_state();
        match fetched {
            Ok(key_set) => {
                let key_set = Arc::new(key_set);
                let kids: Vec<&str> = key_set.kids().collect();
                info!(url = %self.source_url, kids = ?kids, "JWKS cache refreshed");
                self.current.store(key_set.clone());
                state.last_refreshed = Instant::now();
            }
            Err(e) => {
                warn!(error = %e, "JWKS refresh failed, keeping previous key set");
            }
        }
        state.in_flight = false;
    }

    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        // The guarded data is a flag and a timestamp; both stay consistent
        // even if a holder panicked.
        self.refresh.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Download and parse a key set. Unusable entries are skipped.
pub async fn fetch_key_set(
    http_client: &reqwest::Client,
    url: &str,
) -> Result<KeySet, JwksFetchError> {
    let response = http_client
        .get(url)
        .send()
        .await
        .map_err(|source| JwksFetchError::Request {
            url: url.to_string(),
            source,
        })?;

    if !response.status().is_success() {
        return Err(JwksFetchError::Status {
            url: url.to_string(),
            status: response.status(),
        });
    }

    let document: JwksDocument = response.json().await.map_err(|source| JwksFetchError::Parse {
        url: url.to_string(),
        source,
    })?;

    let mut keys = HashMap::new();
    for raw in &document.keys {
        match parse_jwk(raw) {
            Ok((kid, key)) => {
                debug!(kid = %kid, alg = ?key.algorithm(), "Loaded JWK");
                keys.insert(kid, key);
            }
            Err(e) => {
                warn!(kid = ?raw.get("kid"), error = %e, "Skipping JWK");
            }
        }
    }

    if keys.is_empty() {
        return Err(JwksFetchError::NoKeys {
            url: url.to_string(),
        });
    }

    Ok(KeySet::new(keys))
}
