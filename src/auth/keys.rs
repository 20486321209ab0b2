//! Verification key resolution
//!
//! Shared-secret mode always yields the same HMAC key. JWKS mode looks the
//! token's `kid` up in the cached key set, fetching it on first use.

use super::jwks::{HttpFetcher, JwksError, KeySetCache};
use super::AuthError;
use crate::config::{GateSettings, Secret, Verification};
use jsonwebtoken::{Algorithm, DecodingKey};
use std::sync::Arc;
use tracing::debug;

/// Resolves the key that verifies a token
#[derive(Clone)]
pub enum KeyResolver {
    /// HMAC-SHA-256 with a static secret
    SharedSecret(DecodingKey),
    /// RSA-SHA-256 with keys from a JWKS endpoint
    Jwks { url: String, cache: KeySetCache },
}

impl KeyResolver {
    pub fn shared_secret(secret: &Secret) -> Self {
        KeyResolver::SharedSecret(DecodingKey::from_secret(secret.expose()))
    }

    pub fn jwks(url: &str, cache: KeySetCache) -> Self {
        KeyResolver::Jwks {
            url: url.to_string(),
            cache,
        }
    }

    /// Build the resolver for validated settings.
    ///
    /// JWKS mode gets an HTTP fetcher with the configured timeout and a cache
    /// with the configured TTL and stale grace.
    pub fn from_settings(settings: &GateSettings) -> Result<Self, JwksError> {
        match &settings.verification {
            Verification::SharedSecret(secret) => Ok(Self::shared_secret(secret)),
            Verification::Jwks { url } => {
                let fetcher = HttpFetcher::new(settings.fetch_timeout)?;
                let cache = KeySetCache::new(Arc::new(fetcher))
                    .with_ttl(settings.cache_ttl)
                    .with_stale_if_error(settings.stale_if_error);
                Ok(Self::jwks(url, cache))
            }
        }
    }

    /// The only algorithm accepted in this mode
    pub fn algorithm(&self) -> Algorithm {
        match self {
            KeyResolver::SharedSecret(_) => Algorithm::HS256,
            KeyResolver::Jwks { .. } => Algorithm::RS256,
        }
    }

    /// Verification mode label for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            KeyResolver::SharedSecret(_) => "shared_secret",
            KeyResolver::Jwks { .. } => "jwks",
        }
    }

    /// The key set cache and URL, in JWKS mode
    pub fn key_set_cache(&self) -> Option<(&str, &KeySetCache)> {
        match self {
            KeyResolver::SharedSecret(_) => None,
            KeyResolver::Jwks { url, cache } => Some((url.as_str(), cache)),
        }
    }

    /// Resolve the verification key for a token with key id `kid`
    pub async fn resolve(&self, kid: Option<&str>) -> Result<DecodingKey, AuthError> {
        match self {
            KeyResolver::SharedSecret(key) => Ok(key.clone()),
            KeyResolver::Jwks { url, cache } => {
                let set = cache.get_key_set(url).await?;
                let key = set
                    .find(kid)
                    .ok_or_else(|| AuthError::UnknownKeyId(kid.map(str::to_string)))?;

                if let Some(alg) = key.alg.as_deref() {
                    if alg != "RS256" {
                        return Err(AuthError::AlgorithmNotAllowed(alg.to_string()));
                    }
                }

                debug!(kid = ?kid, "Resolved verification key from JWKS");
                Ok(key.key.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shared_secret_resolves_without_kid() {
        let resolver = KeyResolver::shared_secret(&Secret::from("s3cr3t"));
        assert_eq!(resolver.algorithm(), Algorithm::HS256);
        assert_eq!(resolver.label(), "shared_secret");
        assert!(resolver.resolve(None).await.is_ok());
        assert!(resolver.resolve(Some("ignored")).await.is_ok());
        assert!(resolver.key_set_cache().is_none());
    }

    #[test]
    fn test_from_settings_selects_mode() {
        let settings = GateSettings::jwks("https://auth.example.com/jwks.json");
        let resolver = KeyResolver::from_settings(&settings).unwrap();
        assert_eq!(resolver.algorithm(), Algorithm::RS256);
        let (url, cache) = resolver.key_set_cache().unwrap();
        assert_eq!(url, "https://auth.example.com/jwks.json");
        assert_eq!(cache.ttl(), settings.cache_ttl);
    }
}
