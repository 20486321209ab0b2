//! Configuration module for Torii
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion, and validates the raw file into the
//! immutable [`GateSettings`] snapshot used on the request path.

use http::HeaderName;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

// ============================================================================
// Validation Helpers
// ============================================================================

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Treat blank strings as unset, the way an empty settings field behaves.
fn non_blank(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Parse configuration from a YAML string (environment variables are expanded)
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        ConfigLoader::parse(content)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.auth.settings()?;
        self.logging.validate()?;
        Ok(())
    }
}

// ============================================================================
// Secrets
// ============================================================================

/// Shared secret material.
///
/// `Debug` never prints the bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Vec<u8>);

impl Secret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Raw secret bytes
    pub fn expose(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value.as_bytes())
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Secret::new(s.into_bytes()))
    }
}

// ============================================================================
// Authentication Configuration
// ============================================================================

/// Authentication configuration as written in the config file.
///
/// Exactly one of `shared_secret` and `jwks_url` must be set. Use
/// [`AuthConfig::settings`] to obtain the validated form.
///
/// # Example
///
/// ```yaml
/// auth:
///   header: "X-Forwarded-Access-Token"
///   jwks_url: "https://auth.example.com/.well-known/jwks.json"
///   default_role: "subscriber"
///   cache_ttl_secs: 604800
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HTTP header carrying the token. Default: "Authorization"
    #[serde(default = "default_header")]
    pub header: String,

    /// HMAC secret for HS256 tokens
    #[serde(default)]
    pub shared_secret: Option<Secret>,

    /// JWKS endpoint for RS256 tokens
    #[serde(default)]
    pub jwks_url: Option<String>,

    /// Role given to new identities when the token carries none. Default: "subscriber"
    #[serde(default = "default_role")]
    pub default_role: String,

    /// Roles a token may assign. Empty means any role is accepted.
    #[serde(default)]
    pub allowed_roles: Vec<String>,

    /// Key set cache lifetime in seconds. Default: one week
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Timeout for the key set fetch in seconds. Default: 5
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Interval of the proactive key set refresh in seconds.
    /// Default: daily. Set to 0 to disable.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// How long past expiry a cached key set may still be served when a
    /// refetch fails. Default: 0 (never)
    #[serde(default)]
    pub stale_if_error_secs: u64,

    /// Clock skew tolerated on `exp`/`nbf`/`iat`. Default: 0, at most
    /// [`MAX_LEEWAY_SECS`]
    #[serde(default)]
    pub leeway_secs: u64,

    /// Required `iss` claim
    #[serde(default)]
    pub issuer: Option<String>,

    /// Required `aud` claim
    #[serde(default)]
    pub audience: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            header: default_header(),
            shared_secret: None,
            jwks_url: None,
            default_role: default_role(),
            allowed_roles: Vec::new(),
            cache_ttl_secs: default_cache_ttl(),
            fetch_timeout_secs: default_fetch_timeout(),
            refresh_interval_secs: default_refresh_interval(),
            stale_if_error_secs: 0,
            leeway_secs: 0,
            issuer: None,
            audience: None,
        }
    }
}

fn default_header() -> String {
    "Authorization".to_string()
}

/// Upper bound for `leeway_secs` (1 hour)
pub const MAX_LEEWAY_SECS: u64 = 3600;

/// Least-privileged role, used when nothing else is configured
pub const FALLBACK_ROLE: &str = "subscriber";

fn default_role() -> String {
    FALLBACK_ROLE.to_string()
}

fn default_cache_ttl() -> u64 {
    604800 // 1 week
}

fn default_fetch_timeout() -> u64 {
    5
}

fn default_refresh_interval() -> u64 {
    86400 // daily
}

/// How tokens are verified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// HS256 with a shared secret
    SharedSecret(Secret),
    /// RS256 with keys published at a JWKS endpoint
    Jwks { url: String },
}

impl Verification {
    /// Label used in logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            Verification::SharedSecret(_) => "shared_secret",
            Verification::Jwks { .. } => "jwks",
        }
    }
}

/// Validated, immutable authentication settings
#[derive(Debug, Clone)]
pub struct GateSettings {
    /// Header name, lowercased
    pub header: String,
    pub verification: Verification,
    /// Lowercased default role
    pub default_role: String,
    /// Lowercased role allow-list (empty = unchecked)
    pub allowed_roles: Vec<String>,
    pub cache_ttl: Duration,
    pub fetch_timeout: Duration,
    pub refresh_interval: Option<Duration>,
    pub stale_if_error: Duration,
    pub leeway: Duration,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

impl GateSettings {
    /// Settings for HS256 verification with defaults for everything else
    pub fn shared_secret(secret: impl Into<Secret>) -> Self {
        Self::with_verification(Verification::SharedSecret(secret.into()))
    }

    /// Settings for JWKS verification with defaults for everything else
    pub fn jwks(url: &str) -> Self {
        Self::with_verification(Verification::Jwks {
            url: url.to_string(),
        })
    }

    fn with_verification(verification: Verification) -> Self {
        let defaults = AuthConfig::default();
        Self {
            header: defaults.header.to_ascii_lowercase(),
            verification,
            default_role: defaults.default_role,
            allowed_roles: Vec::new(),
            cache_ttl: Duration::from_secs(defaults.cache_ttl_secs),
            fetch_timeout: Duration::from_secs(defaults.fetch_timeout_secs),
            refresh_interval: Some(Duration::from_secs(defaults.refresh_interval_secs)),
            stale_if_error: Duration::ZERO,
            leeway: Duration::ZERO,
            issuer: None,
            audience: None,
        }
    }
}

impl AuthConfig {
    /// Validate the raw configuration into [`GateSettings`].
    ///
    /// Ambiguous (both sources set) or missing verification configuration is
    /// rejected here rather than resolved at request time.
    pub fn settings(&self) -> Result<GateSettings, ConfigError> {
        let verification = self.verification()?;

        let header = self.header.trim();
        if HeaderName::from_bytes(header.as_bytes()).is_err() {
            return Err(ConfigError::ValidationError(format!(
                "Invalid token header name '{}'",
                self.header
            )));
        }

        let default_role = self.default_role.trim().to_lowercase();
        if default_role.is_empty() {
            return Err(ConfigError::ValidationError(
                "default_role cannot be empty".into(),
            ));
        }

        let allowed_roles: Vec<String> = self
            .allowed_roles
            .iter()
            .map(|role| role.trim().to_lowercase())
            .filter(|role| !role.is_empty())
            .collect();
        if !allowed_roles.is_empty() && !allowed_roles.contains(&default_role) {
            return Err(ConfigError::ValidationError(format!(
                "default_role '{}' is not in allowed_roles",
                default_role
            )));
        }

        if self.cache_ttl_secs == 0 {
            return Err(ConfigError::ValidationError(
                "cache_ttl_secs must be greater than 0".into(),
            ));
        }

        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "fetch_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.leeway_secs > MAX_LEEWAY_SECS {
            return Err(ConfigError::ValidationError(format!(
                "leeway_secs must be at most {}",
                MAX_LEEWAY_SECS
            )));
        }

        let refresh_interval = match self.refresh_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(GateSettings {
            header: header.to_ascii_lowercase(),
            verification,
            default_role,
            allowed_roles,
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            refresh_interval,
            stale_if_error: Duration::from_secs(self.stale_if_error_secs),
            leeway: Duration::from_secs(self.leeway_secs),
            issuer: non_blank(&self.issuer).map(str::to_string),
            audience: non_blank(&self.audience).map(str::to_string),
        })
    }

    fn verification(&self) -> Result<Verification, ConfigError> {
        let secret = self.shared_secret.as_ref().filter(|s| !s.is_empty());
        let jwks_url = non_blank(&self.jwks_url);

        match (secret, jwks_url) {
            (Some(_), Some(_)) => Err(ConfigError::ValidationError(
                "shared_secret and jwks_url are mutually exclusive".into(),
            )),
            (None, None) => Err(ConfigError::ValidationError(
                "one of shared_secret or jwks_url must be configured".into(),
            )),
            (Some(secret), None) => Ok(Verification::SharedSecret(secret.clone())),
            (None, Some(url)) => {
                if !is_valid_http_url(url) {
                    return Err(ConfigError::ValidationError(
                        "Invalid jwks_url: must start with http:// or https://".into(),
                    ));
                }
                Ok(Verification::Jwks {
                    url: url.to_string(),
                })
            }
        }
    }
}

// ============================================================================
// Logging Configuration
// ============================================================================

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Logging configuration.
///
/// `RUST_LOG` takes precedence over `level` when set.
///
/// ```yaml
/// logging:
///   level: "info,torii=debug"
///   format: "pretty"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive. Default: "info"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format. Default: json
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl LoggingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        tracing_subscriber::EnvFilter::try_new(&self.level).map_err(|e| {
            ConfigError::ValidationError(format!("Invalid log level '{}': {}", self.level, e))
        })?;
        Ok(())
    }
}
