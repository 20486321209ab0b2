//! Session decision engine
//!
//! Turns verified claims into a [`SessionDecision`]. The only side effects
//! are identity lookup and creation in the external [`IdentityStore`];
//! applying roles and establishing sessions happen downstream.

use crate::auth::TokenClaims;
use crate::config::{GateSettings, FALLBACK_ROLE};
use async_trait::async_trait;
use rand::distr::{Alphanumeric, SampleString};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

mod memory;

pub use memory::MemoryIdentityStore;

/// Length of the generated credential for new identities
pub const CREDENTIAL_LENGTH: usize = 64;

/// Identity store errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Identity store unavailable: {0}")]
    Unavailable(String),

    /// Create lost a race with another request for the same email
    #[error("Identity already exists")]
    AlreadyExists,
}

/// A user record as seen by the gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub id: u64,
    pub email: String,
    pub role: Option<String>,
}

/// Random credential handed to the store when creating an identity.
///
/// It is never used to sign in; `Debug` never prints it.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// 64 random alphanumeric characters
    pub fn generate() -> Self {
        Self(Alphanumeric.sample_string(&mut rand::rng(), CREDENTIAL_LENGTH))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// External user-record storage
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, IdentityError>;

    /// Create an identity. Returns [`IdentityError::AlreadyExists`] when
    /// the email is taken.
    async fn create(&self, email: &str, credential: &Credential)
        -> Result<Identity, IdentityError>;

    async fn set_role(&self, identity: &Identity, role: &str) -> Result<(), IdentityError>;
}

/// Why a verified token still does not sign anyone in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    MissingEmailClaim,
    RoleNotAllowed,
    IdentityStoreUnavailable,
    SessionUnavailable,
}

impl RejectReason {
    pub fn label(&self) -> &'static str {
        match self {
            RejectReason::MissingEmailClaim => "missing_email_claim",
            RejectReason::RoleNotAllowed => "role_not_allowed",
            RejectReason::IdentityStoreUnavailable => "identity_store_unavailable",
            RejectReason::SessionUnavailable => "session_unavailable",
        }
    }

    /// User-facing text for the diagnostic sink
    pub fn diagnostic(&self) -> &'static str {
        match self {
            RejectReason::MissingEmailClaim => "the JWT does not contain an email claim.",
            RejectReason::RoleNotAllowed => "the role in the JWT is not allowed.",
            RejectReason::IdentityStoreUnavailable => "the user could not be looked up or created.",
            RejectReason::SessionUnavailable => "the session could not be established.",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Payload of an `Authenticate` decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Authenticated {
    /// The email the identity is keyed by
    pub identity_key: String,
    /// Role to bind; `None` leaves the stored role untouched
    pub role: Option<String>,
    pub is_new_identity: bool,
}

/// Outcome of [`DecisionEngine::decide`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum SessionDecision {
    AlreadyAuthenticated,
    Authenticate(Authenticated),
    Reject { reason: RejectReason },
}

impl SessionDecision {
    pub fn label(&self) -> &'static str {
        match self {
            SessionDecision::AlreadyAuthenticated => "already_authenticated",
            SessionDecision::Authenticate(_) => "authenticate",
            SessionDecision::Reject { .. } => "reject",
        }
    }

    fn reject(reason: RejectReason) -> Self {
        SessionDecision::Reject { reason }
    }
}

/// Decides who a verified token signs in, and with which role
pub struct DecisionEngine {
    store: Arc<dyn IdentityStore>,
    default_role: String,
    allowed_roles: Vec<String>,
}

impl DecisionEngine {
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self {
            store,
            default_role: FALLBACK_ROLE.to_string(),
            allowed_roles: Vec::new(),
        }
    }

    pub fn from_settings(settings: &GateSettings, store: Arc<dyn IdentityStore>) -> Self {
        Self::new(store)
            .with_default_role(&settings.default_role)
            .with_allowed_roles(settings.allowed_roles.iter().map(String::as_str))
    }

    /// Role for new identities whose token carries none. Blank falls back
    /// to the least-privileged role.
    #[must_use]
    pub fn with_default_role(mut self, role: &str) -> Self {
        let role = role.trim().to_lowercase();
        self.default_role = if role.is_empty() {
            FALLBACK_ROLE.to_string()
        } else {
            role
        };
        self
    }

    /// Restrict claim-supplied roles. Empty accepts any role.
    #[must_use]
    pub fn with_allowed_roles<'a>(mut self, roles: impl IntoIterator<Item = &'a str>) -> Self {
        self.allowed_roles = roles
            .into_iter()
            .map(|role| role.trim().to_lowercase())
            .filter(|role| !role.is_empty())
            .collect();
        self
    }

    pub fn store(&self) -> &Arc<dyn IdentityStore> {
        &self.store
    }

    /// Decide the session outcome for `claims`.
    ///
    /// `existing` is the identity key of the caller's current session, if any.
    pub async fn decide(&self, claims: &TokenClaims, existing: Option<&str>) -> SessionDecision {
        self.decide_for(claims, existing).await.0
    }

    /// Like [`decide`](Self::decide), also returning the bound identity
    pub(crate) async fn decide_for(
        &self,
        claims: &TokenClaims,
        existing: Option<&str>,
    ) -> (SessionDecision, Option<Identity>) {
        if existing.is_some() {
            return (SessionDecision::AlreadyAuthenticated, None);
        }

        let Some(email) = claims.email.as_deref().map(str::trim).filter(|e| !e.is_empty()) else {
            return (SessionDecision::reject(RejectReason::MissingEmailClaim), None);
        };

        let claim_role = claims.role.as_deref().map(|role| role.trim().to_lowercase());
        if let Some(role) = &claim_role {
            if !self.role_allowed(role) {
                warn!(role = %role, "Token role is not in the allow-list");
                return (SessionDecision::reject(RejectReason::RoleNotAllowed), None);
            }
        }

        let (identity, is_new_identity) = match self.find_or_create(email).await {
            Ok(found) => found,
            Err(err) => {
                warn!(error = %err, "Identity store failed");
                return (
                    SessionDecision::reject(RejectReason::IdentityStoreUnavailable),
                    None,
                );
            }
        };

        let role = match claim_role {
            Some(role) => Some(role),
            None if is_new_identity => Some(self.default_role.clone()),
            None => None,
        };

        debug!(
            identity_id = identity.id,
            is_new_identity,
            role = ?role,
            "Session decision: authenticate"
        );

        let decision = SessionDecision::Authenticate(Authenticated {
            identity_key: email.to_string(),
            role,
            is_new_identity,
        });
        (decision, Some(identity))
    }

    fn role_allowed(&self, role: &str) -> bool {
        self.allowed_roles.is_empty() || self.allowed_roles.iter().any(|r| r == role)
    }

    async fn find_or_create(&self, email: &str) -> Result<(Identity, bool), IdentityError> {
        if let Some(identity) = self.store.find_by_email(email).await? {
            return Ok((identity, false));
        }

        match self.store.create(email, &Credential::generate()).await {
            Ok(identity) => {
                info!(identity_id = identity.id, "Created identity");
                Ok((identity, true))
            }
            // A concurrent request created it first
            Err(IdentityError::AlreadyExists) => {
                let identity = self.store.find_by_email(email).await?.ok_or_else(|| {
                    IdentityError::Unavailable("identity vanished after create conflict".into())
                })?;
                Ok((identity, false))
            }
            Err(err) => Err(err),
        }
    }
}
