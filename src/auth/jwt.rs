//! JWT verification
//!
//! Accepts exactly one algorithm per verification mode: HS256 with a shared
//! secret, RS256 with JWKS keys. The header is inspected before any key
//! lookup so that tokens naming another algorithm never trigger a fetch.

use super::keys::KeyResolver;
use super::{AuthError, SignatureFailure};
use crate::auth::jwks::JwksError;
use crate::config::{GateSettings, MAX_LEEWAY_SECS};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

/// Claims carried by a verified token
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Identity key. Optional here; required to sign in.
    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub role: Option<String>,

    /// Every other claim, untouched
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TokenClaims {
    /// `iat` as a unix timestamp
    pub fn issued_at(&self) -> Option<i64> {
        self.timestamp("iat").ok().flatten()
    }

    /// `exp` as a unix timestamp
    pub fn expires_at(&self) -> Option<i64> {
        self.timestamp("exp").ok().flatten()
    }

    /// `nbf` as a unix timestamp
    pub fn not_before(&self) -> Option<i64> {
        self.timestamp("nbf").ok().flatten()
    }

    pub fn subject(&self) -> Option<&str> {
        self.extra.get("sub").and_then(serde_json::Value::as_str)
    }

    /// A NumericDate claim. Present but not a non-negative number is malformed.
    fn timestamp(&self, claim: &str) -> Result<Option<i64>, AuthError> {
        let Some(value) = self.extra.get(claim) else {
            return Ok(None);
        };
        match value.as_f64() {
            Some(secs) if secs.is_finite() && secs >= 0.0 => Ok(Some(secs as i64)),
            _ => Err(AuthError::Malformed(format!(
                "`{}` is not a NumericDate",
                claim
            ))),
        }
    }
}

#[derive(Deserialize)]
struct RawHeader {
    alg: String,
    #[serde(default)]
    kid: Option<String>,
}

/// Parse the JOSE header without trusting anything in it
fn parse_header(token: &str) -> Result<RawHeader, AuthError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 || segments[0].is_empty() || segments[1].is_empty() {
        return Err(AuthError::Malformed(
            "expected three dot-separated segments".into(),
        ));
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(segments[0])
        .map_err(|e| AuthError::Malformed(format!("header is not base64url: {}", e)))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::Malformed(format!("header is not valid JSON: {}", e)))
}

fn map_decode_error(err: jsonwebtoken::errors::Error) -> AuthError {
    match err.kind() {
        ErrorKind::InvalidSignature => AuthError::SignatureInvalid(SignatureFailure::BadSignature),
        ErrorKind::ExpiredSignature => AuthError::SignatureInvalid(SignatureFailure::Expired),
        ErrorKind::ImmatureSignature => AuthError::SignatureInvalid(SignatureFailure::NotYetValid),
        ErrorKind::InvalidIssuer | ErrorKind::InvalidAudience | ErrorKind::MissingRequiredClaim(_) => {
            AuthError::ClaimMismatch(err.to_string())
        }
        ErrorKind::InvalidAlgorithm | ErrorKind::MissingAlgorithm => {
            AuthError::AlgorithmNotAllowed(err.to_string())
        }
        _ => AuthError::Malformed(err.to_string()),
    }
}

/// JWT verifier
///
/// # Example
///
/// ```
/// use torii::auth::{KeyResolver, TokenVerifier};
/// use torii::config::Secret;
///
/// let verifier = TokenVerifier::new(KeyResolver::shared_secret(&Secret::from("my-secret")))
///     .with_issuer("https://auth.example.com")
///     .with_audience("my-site");
/// ```
pub struct TokenVerifier {
    resolver: KeyResolver,
    validation: Validation,
    leeway: Duration,
}

impl TokenVerifier {
    /// Create a verifier with no leeway and no issuer or audience requirement
    pub fn new(resolver: KeyResolver) -> Self {
        let mut validation = Validation::new(resolver.algorithm());
        // exp is optional, but checked when present
        validation.required_spec_claims = HashSet::new();
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.validate_aud = false; // Only validate aud when explicitly set
        validation.leeway = 0;

        Self {
            resolver,
            validation,
            leeway: Duration::ZERO,
        }
    }

    /// Build the verifier for validated settings
    pub fn from_settings(settings: &GateSettings) -> Result<Self, JwksError> {
        let mut verifier =
            Self::new(KeyResolver::from_settings(settings)?).with_leeway(settings.leeway);
        if let Some(issuer) = &settings.issuer {
            verifier = verifier.with_issuer(issuer);
        }
        if let Some(audience) = &settings.audience {
            verifier = verifier.with_audience(audience);
        }
        Ok(verifier)
    }

    /// Set the required issuer (`iss` claim)
    #[must_use]
    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.validation.set_issuer(&[issuer]);
        self
    }

    /// Set the required audience (`aud` claim)
    #[must_use]
    pub fn with_audience(mut self, audience: &str) -> Self {
        self.validation.set_audience(&[audience]);
        self.validation.validate_aud = true;
        self
    }

    /// Tolerated clock skew for `exp`, `nbf` and `iat`, capped at
    /// [`MAX_LEEWAY_SECS`]
    #[must_use]
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        let leeway = leeway.min(Duration::from_secs(MAX_LEEWAY_SECS));
        self.validation.leeway = leeway.as_secs();
        self.leeway = leeway;
        self
    }

    pub fn resolver(&self) -> &KeyResolver {
        &self.resolver
    }

    /// Verify `token` and return its claims.
    ///
    /// A missing `email` claim is not an error at this stage.
    #[tracing::instrument(name = "auth.verify", skip_all, fields(auth.mode = self.resolver.label()))]
    pub async fn verify(&self, token: &str) -> Result<TokenClaims, AuthError> {
        let header = parse_header(token)?;

        let expected = self.resolver.algorithm();
        let allowed = match expected {
            Algorithm::HS256 => "HS256",
            _ => "RS256",
        };
        if header.alg != allowed {
            return Err(AuthError::AlgorithmNotAllowed(header.alg));
        }

        let key = self.resolver.resolve(header.kid.as_deref()).await?;

        let data = decode::<TokenClaims>(token, &key, &self.validation).map_err(map_decode_error)?;
        self.check_time_claims(&data.claims)?;

        debug!(
            kid = ?header.kid,
            has_email = data.claims.email.is_some(),
            has_role = data.claims.role.is_some(),
            "Token verified"
        );
        Ok(data.claims)
    }

    /// Re-check the time claims on our side. `decode` skips any `exp` or
    /// `nbf` it cannot read as an unsigned integer.
    fn check_time_claims(&self, claims: &TokenClaims) -> Result<(), AuthError> {
        let now = chrono::Utc::now().timestamp();
        let leeway = i64::try_from(self.leeway.as_secs()).unwrap_or(i64::MAX);

        if let Some(exp) = claims.timestamp("exp")? {
            if exp <= now.saturating_sub(leeway) {
                return Err(AuthError::SignatureInvalid(SignatureFailure::Expired));
            }
        }
        if let Some(nbf) = claims.timestamp("nbf")? {
            if nbf > now.saturating_add(leeway) {
                return Err(AuthError::SignatureInvalid(SignatureFailure::NotYetValid));
            }
        }
        if let Some(iat) = claims.timestamp("iat")? {
            if iat > now.saturating_add(leeway) {
                return Err(AuthError::SignatureInvalid(SignatureFailure::IssuedInFuture));
            }
        }
        Ok(())
    }
}
