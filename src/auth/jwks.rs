//! JWKS (JSON Web Key Set) fetching and caching
//!
//! Fetches public keys from a JWKS endpoint and keeps them in a time-bounded
//! [`CacheStore`]. Concurrent misses for the same URL share one in-flight
//! fetch, and the fetch itself runs on a spawned task so it still populates
//! the cache if the request that started it goes away.
//!
//! # Example
//!
//! ```no_run
//! use torii::auth::jwks::{HttpFetcher, KeySetCache};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let fetcher = HttpFetcher::new(Duration::from_secs(5))?;
//! let cache = KeySetCache::new(Arc::new(fetcher)).with_ttl(Duration::from_secs(3600));
//!
//! let url = "https://auth.example.com/.well-known/jwks.json";
//! let keys = cache.get_key_set(url).await?;
//! println!("{} keys", keys.len());
//!
//! // Keep the set warm in the background
//! let _refresh = cache.spawn_refresh(url, Duration::from_secs(86400));
//! # Ok(())
//! # }
//! ```

use crate::cache::{CacheStore, Expiring, MemoryCache};
use crate::metrics;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use jsonwebtoken::DecodingKey;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default key set lifetime (1 week)
pub const DEFAULT_TTL: Duration = Duration::from_secs(604800);

/// Default timeout for the JWKS request
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Key set errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwksError {
    #[error("JWKS fetch failed: {0}")]
    FetchFailed(String),

    #[error("JWKS endpoint returned an empty response")]
    EmptyResponse,

    #[error("Malformed JWKS: {0}")]
    MalformedKeySet(String),
}

impl JwksError {
    /// Short label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            JwksError::FetchFailed(_) => "fetch_failed",
            JwksError::EmptyResponse => "empty_response",
            JwksError::MalformedKeySet(_) => "malformed_key_set",
        }
    }

    /// User-facing text for the diagnostic sink
    pub fn diagnostic(&self) -> &'static str {
        match self {
            JwksError::FetchFailed(_) => "error retrieving the JWKS URL.",
            JwksError::EmptyResponse => "could not retrieve the specified JWKS URL.",
            JwksError::MalformedKeySet(_) => {
                "cannot decode the key set retrieved from the JWKS URL."
            }
        }
    }
}

/// A single JSON Web Key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type (e.g., "RSA", "EC")
    pub kty: String,

    /// Key ID
    #[serde(default)]
    pub kid: Option<String>,

    /// Intended use ("sig" for signature)
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,

    /// Algorithm (e.g., "RS256")
    #[serde(default)]
    pub alg: Option<String>,

    // RSA parameters
    /// RSA modulus (base64url encoded)
    #[serde(default)]
    pub n: Option<String>,

    /// RSA exponent (base64url encoded)
    #[serde(default)]
    pub e: Option<String>,

    // EC parameters
    /// EC curve (e.g., "P-256")
    #[serde(default)]
    pub crv: Option<String>,

    /// EC x coordinate (base64url encoded)
    #[serde(default)]
    pub x: Option<String>,

    /// EC y coordinate (base64url encoded)
    #[serde(default)]
    pub y: Option<String>,
}

impl Jwk {
    /// Whether this key can verify RS256 signatures at all
    fn is_rsa_signing_key(&self) -> bool {
        self.kty == "RSA" && self.key_use.as_deref().map_or(true, |u| u == "sig")
    }

    /// Convert an RSA JWK to a DecodingKey
    fn to_rsa_decoding_key(&self) -> Result<DecodingKey, JwksError> {
        let n = self
            .n
            .as_ref()
            .ok_or_else(|| JwksError::MalformedKeySet("Missing RSA modulus (n)".into()))?;
        let e = self
            .e
            .as_ref()
            .ok_or_else(|| JwksError::MalformedKeySet("Missing RSA exponent (e)".into()))?;

        DecodingKey::from_rsa_components(n, e)
            .map_err(|e| JwksError::MalformedKeySet(format!("Invalid RSA key: {}", e)))
    }
}

/// JSON Web Key Set document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

/// One verification key from a key set
#[derive(Clone)]
pub struct VerificationKey {
    /// Algorithm the JWK declares, if any
    pub alg: Option<String>,
    pub key: DecodingKey,
}

/// Parsed key set, replaced whole on every refresh
pub struct KeySet {
    keys: HashMap<String, VerificationKey>,
    fetched_at: Instant,
    ttl: Duration,
}

impl KeySet {
    /// Parse a JWKS document into verification keys indexed by key id.
    ///
    /// Non-RSA and encryption keys are skipped. Keys without a `kid` are
    /// indexed by position (`#0`, `#1`, ...).
    pub fn from_jwks(jwks: &Jwks, ttl: Duration) -> Result<Self, JwksError> {
        Self::from_jwks_at(jwks, ttl, Instant::now())
    }

    pub(crate) fn from_jwks_at(
        jwks: &Jwks,
        ttl: Duration,
        fetched_at: Instant,
    ) -> Result<Self, JwksError> {
        let mut keys = HashMap::new();

        for (index, jwk) in jwks.keys.iter().enumerate() {
            if !jwk.is_rsa_signing_key() {
                debug!(kty = %jwk.kty, kid = ?jwk.kid, "Skipping non-RSA signing key");
                continue;
            }

            let key = jwk.to_rsa_decoding_key()?;
            let kid = jwk.kid.clone().unwrap_or_else(|| format!("#{}", index));
            keys.insert(
                kid,
                VerificationKey {
                    alg: jwk.alg.clone(),
                    key,
                },
            );
        }

        if keys.is_empty() {
            return Err(JwksError::MalformedKeySet(
                "key set contains no RSA signing keys".into(),
            ));
        }

        Ok(Self {
            keys,
            fetched_at,
            ttl,
        })
    }

    /// Parse a JWKS JSON body
    pub fn from_json(json: &str, ttl: Duration) -> Result<Self, JwksError> {
        if json.trim().is_empty() {
            return Err(JwksError::EmptyResponse);
        }
        let jwks: Jwks =
            serde_json::from_str(json).map_err(|e| JwksError::MalformedKeySet(e.to_string()))?;
        Self::from_jwks(&jwks, ttl)
    }

    /// Select the key for a token.
    ///
    /// Without a `kid` the set must hold exactly one key.
    pub fn find(&self, kid: Option<&str>) -> Option<&VerificationKey> {
        match kid {
            Some(kid) => self.keys.get(kid),
            None if self.keys.len() == 1 => self.keys.values().next(),
            None => None,
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Key ids in the set, sorted
    pub fn key_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.keys.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn fetched_at(&self) -> Instant {
        self.fetched_at
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }

    /// `now - fetched_at > ttl`
    pub fn is_stale(&self) -> bool {
        self.age() > self.ttl
    }
}

impl Expiring for KeySet {
    fn is_expired(&self) -> bool {
        self.is_stale()
    }
}

impl fmt::Debug for KeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySet")
            .field("key_ids", &self.key_ids())
            .field("age", &self.age())
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// Transport used to download a key set
#[async_trait]
pub trait KeySetFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Jwks, JwksError>;
}

/// Plain HTTP GET fetcher
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, JwksError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| JwksError::FetchFailed(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl KeySetFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Jwks, JwksError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| JwksError::FetchFailed(e.without_url().to_string()))?;

        if !response.status().is_success() {
            return Err(JwksError::FetchFailed(format!(
                "HTTP {}: {}",
                response.status().as_u16(),
                response.status().canonical_reason().unwrap_or("Unknown")
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| JwksError::FetchFailed(e.without_url().to_string()))?;

        if body.trim().is_empty() {
            return Err(JwksError::EmptyResponse);
        }

        serde_json::from_str(&body).map_err(|e| JwksError::MalformedKeySet(e.to_string()))
    }
}

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<KeySet>, JwksError>>>;

/// Key set cache with single-flight fetching
#[derive(Clone)]
pub struct KeySetCache {
    store: Arc<dyn CacheStore<Arc<KeySet>>>,
    fetcher: Arc<dyn KeySetFetcher>,
    ttl: Duration,
    stale_if_error: Duration,
    in_flight: Arc<Mutex<HashMap<String, SharedFetch>>>,
}

impl KeySetCache {
    /// Create a cache backed by an in-memory store
    pub fn new(fetcher: Arc<dyn KeySetFetcher>) -> Self {
        Self {
            store: Arc::new(MemoryCache::<Arc<KeySet>>::new()),
            fetcher,
            ttl: DEFAULT_TTL,
            stale_if_error: Duration::ZERO,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Use a different backing store
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn CacheStore<Arc<KeySet>>>) -> Self {
        self.store = store;
        self
    }

    /// Set the key set lifetime
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Serve an expired set for up to `grace` past its TTL when a refetch fails
    #[must_use]
    pub fn with_stale_if_error(mut self, grace: Duration) -> Self {
        self.stale_if_error = grace;
        self
    }

    /// Get the cache TTL
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get the key set for `url`, fetching it on a miss or expiry.
    ///
    /// Failed fetches never populate or extend the cache.
    pub async fn get_key_set(&self, url: &str) -> Result<Arc<KeySet>, JwksError> {
        if let Some(set) = self.store.get(url).await {
            if !set.is_stale() {
                metrics::record_jwks_cache_lookup("hit");
                return Ok(set);
            }
        }
        metrics::record_jwks_cache_lookup("miss");

        match self.join_fetch(url, false).await {
            Ok(set) => Ok(set),
            Err(err) => match self.stale_fallback(url).await {
                Some(stale) => {
                    warn!(
                        jwks_url = %url,
                        error = %err,
                        age_secs = stale.age().as_secs(),
                        "JWKS refresh failed, serving stale key set"
                    );
                    metrics::record_jwks_cache_lookup("stale_served");
                    Ok(stale)
                }
                None => Err(err),
            },
        }
    }

    /// Fetch `url` now, regardless of what is cached.
    ///
    /// Joins an in-flight fetch for the same URL instead of starting another.
    pub async fn refresh(&self, url: &str) -> Result<Arc<KeySet>, JwksError> {
        self.join_fetch(url, true).await
    }

    /// Drop the cached set for `url`
    pub async fn invalidate(&self, url: &str) {
        self.store.invalidate(url).await;
    }

    /// Start a periodic refresh of `url`.
    ///
    /// The first refresh runs immediately. Failures are logged and the loop
    /// keeps going; the task stops when the returned handle is dropped.
    pub fn spawn_refresh(&self, url: &str, every: Duration) -> RefreshHandle {
        let cache = self.clone();
        let url = url.to_string();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                match cache.refresh(&url).await {
                    Ok(set) => {
                        debug!(jwks_url = %url, keys = set.len(), "Scheduled JWKS refresh complete")
                    }
                    Err(err) => {
                        warn!(jwks_url = %url, error = %err, "Scheduled JWKS refresh failed")
                    }
                }
            }
        });

        RefreshHandle { task }
    }

    async fn stale_fallback(&self, url: &str) -> Option<Arc<KeySet>> {
        if self.stale_if_error.is_zero() {
            return None;
        }
        let set = self.store.get(url).await?;
        (set.age() <= set.ttl() + self.stale_if_error).then_some(set)
    }

    fn join_fetch(&self, url: &str, force: bool) -> SharedFetch {
        let mut in_flight = self.in_flight.lock();
        if let Some(fetch) = in_flight.get(url) {
            debug!(jwks_url = %url, "Joining in-flight JWKS fetch");
            return fetch.clone();
        }

        let fetch = self.spawn_fetch(url.to_string(), force);
        in_flight.insert(url.to_string(), fetch.clone());
        fetch
    }

    // Called with the in-flight lock held; the task removes its own entry
    // once the result is stored, which cannot happen before the insert.
    fn spawn_fetch(&self, url: String, force: bool) -> SharedFetch {
        let cache = self.clone();

        let handle: JoinHandle<Result<Arc<KeySet>, JwksError>> = tokio::spawn(async move {
            let result = cache.fetch_and_store(&url, force).await;
            cache.in_flight.lock().remove(&url);
            result
        });

        async move {
            handle.await.unwrap_or_else(|e| {
                Err(JwksError::FetchFailed(format!("fetch task failed: {}", e)))
            })
        }
        .boxed()
        .shared()
    }

    async fn fetch_and_store(&self, url: &str, force: bool) -> Result<Arc<KeySet>, JwksError> {
        if !force {
            // A fetch that finished just before this one started
            if let Some(set) = self.store.get(url).await {
                if !set.is_stale() {
                    return Ok(set);
                }
            }
        }

        info!(jwks_url = %url, "Fetching JWKS");
        let started = Instant::now();

        let result = self
            .fetcher
            .fetch(url)
            .await
            .and_then(|jwks| KeySet::from_jwks(&jwks, self.ttl));

        let elapsed = started.elapsed().as_secs_f64();
        match result {
            Ok(set) => {
                let set = Arc::new(set);
                self.store.put(url, set.clone()).await;
                metrics::record_jwks_fetch("success", elapsed);
                info!(jwks_url = %url, keys = set.len(), "JWKS cached");
                Ok(set)
            }
            Err(err) => {
                metrics::record_jwks_fetch(err.label(), elapsed);
                warn!(jwks_url = %url, error = %err, "JWKS fetch failed");
                Err(err)
            }
        }
    }
}

/// Handle to a background refresh task; aborts the task on drop
pub struct RefreshHandle {
    task: JoinHandle<()>,
}

impl RefreshHandle {
    /// Stop the refresh loop. Dropping the handle does the same.
    pub fn stop(self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for RefreshHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
