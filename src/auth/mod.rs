//! Authentication module
//!
//! Token extraction, key resolution and JWT verification (HS256 shared
//! secret or RS256 via JWKS).

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::debug;

pub mod extract;
pub mod jwks;
pub mod jwt;
pub mod keys;

pub use extract::extract_token;
pub use jwks::{JwksError, KeySet, KeySetCache};
pub use jwt::{TokenClaims, TokenVerifier};
pub use keys::KeyResolver;

/// Why a signature-class rejection happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureFailure {
    BadSignature,
    Expired,
    NotYetValid,
    IssuedInFuture,
}

impl fmt::Display for SignatureFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SignatureFailure::BadSignature => "signature does not match",
            SignatureFailure::Expired => "token expired",
            SignatureFailure::NotYetValid => "token not valid yet",
            SignatureFailure::IssuedInFuture => "token issued in the future",
        };
        f.write_str(reason)
    }
}

/// Authentication errors
///
/// Messages never carry token or key material.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Token not present in request")]
    TokenAbsent,

    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Algorithm not allowed: {0}")]
    AlgorithmNotAllowed(String),

    #[error("Invalid signature: {0}")]
    SignatureInvalid(SignatureFailure),

    #[error("No verification key for key id {0:?}")]
    UnknownKeyId(Option<String>),

    #[error("Claim rejected: {0}")]
    ClaimMismatch(String),

    #[error(transparent)]
    KeySet(#[from] JwksError),
}

impl AuthError {
    /// Short label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            AuthError::TokenAbsent => "token_absent",
            AuthError::Malformed(_) => "malformed",
            AuthError::AlgorithmNotAllowed(_) => "algorithm_not_allowed",
            AuthError::SignatureInvalid(_) => "signature_invalid",
            AuthError::UnknownKeyId(_) => "unknown_key_id",
            AuthError::ClaimMismatch(_) => "claim_mismatch",
            AuthError::KeySet(err) => err.label(),
        }
    }

    /// User-facing text for the diagnostic sink
    pub fn diagnostic(&self) -> &'static str {
        match self {
            AuthError::TokenAbsent => {
                "the expected JWT was not found. Please double check your reverse proxy configuration."
            }
            AuthError::Malformed(_) => "the JWT could not be decoded.",
            AuthError::AlgorithmNotAllowed(_) => {
                "the JWT is signed with an algorithm that is not allowed for the configured verification mode."
            }
            AuthError::SignatureInvalid(_) => {
                "cannot verify the JWT. Please double check that your private secret or JWKS URL is configured correctly."
            }
            AuthError::UnknownKeyId(_) => {
                "no key in the JWKS matches the JWT. Please double check your JWKS URL."
            }
            AuthError::ClaimMismatch(_) => "the JWT issuer or audience does not match the configuration.",
            AuthError::KeySet(err) => err.diagnostic(),
        }
    }
}

/// Authentication request context
///
/// Header names are stored lowercased; `Debug` prints names only.
#[derive(Clone, Default)]
pub struct AuthRequest {
    pub headers: HashMap<String, String>,
}

impl AuthRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header (builder style). The first value for a name wins.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .entry(name.to_ascii_lowercase())
            .or_insert_with(|| value.to_string());
        self
    }

    /// Build from a transport header map.
    ///
    /// Non-UTF-8 values are kept with replacement characters, so a garbled
    /// token header still counts as present and fails verification.
    pub fn from_header_map(map: &http::HeaderMap) -> Self {
        let mut headers = HashMap::new();
        for (name, value) in map {
            headers.entry(name.as_str().to_string()).or_insert_with(|| {
                value.to_str().map(str::to_string).unwrap_or_else(|_| {
                    debug!(header = %name, "Header value is not valid UTF-8");
                    String::from_utf8_lossy(value.as_bytes()).into_owned()
                })
            });
        }
        Self { headers }
    }

    /// Get header value by name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

impl From<HashMap<String, String>> for AuthRequest {
    fn from(headers: HashMap<String, String>) -> Self {
        Self {
            headers: headers
                .into_iter()
                .map(|(name, value)| (name.to_ascii_lowercase(), value))
                .collect(),
        }
    }
}

impl fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.headers.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("AuthRequest").field("headers", &names).finish()
    }
}
