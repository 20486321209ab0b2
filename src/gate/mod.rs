//! Sign-in gate
//!
//! Runs one request through the pipeline:
//!
//! ```text
//! existing session? ──yes──▶ AlreadyAuthenticated
//!        │ no
//!        ▼
//!   extract token ──absent──▶ no decision + warning
//!        │
//!        ▼
//!   verify token ──error───▶ no decision + error
//!        │
//!        ▼
//!      decide ──────reject──▶ Reject + error
//!        │
//!        ▼
//!  set role, establish session
//! ```
//!
//! Nothing on the request path is fatal; failures become diagnostics and the
//! request simply stays unauthenticated.

use crate::auth::jwks::RefreshHandle;
use crate::auth::{extract_token, AuthRequest, JwksError, KeySet, TokenVerifier};
use crate::config::{ConfigError, GateSettings};
use crate::metrics;
use crate::session::{
    Authenticated, DecisionEngine, Identity, IdentityStore, RejectReason, SessionDecision,
};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod diagnostics;

pub use diagnostics::{DiagnosticSink, Diagnostics, Severity, TracingSink};

/// Session manager errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session could not be established: {0}")]
    Failed(String),
}

/// Establishes sessions for authenticated identities.
///
/// Clearing a previous session, setting cookies and picking the redirect
/// target are up to the implementor.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionManager: Send + Sync {
    async fn establish(
        &self,
        identity: &Identity,
        decision: &Authenticated,
    ) -> Result<(), SessionError>;
}

/// Session manager that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSessionManager;

#[async_trait]
impl SessionManager for LogSessionManager {
    async fn establish(
        &self,
        identity: &Identity,
        decision: &Authenticated,
    ) -> Result<(), SessionError> {
        info!(
            identity_id = identity.id,
            is_new_identity = decision.is_new_identity,
            role = ?decision.role,
            "Session established"
        );
        Ok(())
    }
}

/// Result of one pass through the gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateOutcome {
    /// `None` when the request carried no usable token
    pub decision: Option<SessionDecision>,
    pub diagnostics: Diagnostics,
}

/// Per-request sign-in pipeline
pub struct Gate {
    header: String,
    verifier: TokenVerifier,
    engine: DecisionEngine,
    sessions: Arc<dyn SessionManager>,
    sink: Arc<dyn DiagnosticSink>,
    refresh_interval: Option<Duration>,
}

impl Gate {
    /// Build a gate from validated settings.
    ///
    /// Diagnostics go to [`TracingSink`] unless replaced with
    /// [`with_sink`](Self::with_sink).
    pub fn new(
        settings: &GateSettings,
        identities: Arc<dyn IdentityStore>,
        sessions: Arc<dyn SessionManager>,
    ) -> Result<Self, ConfigError> {
        let verifier = TokenVerifier::from_settings(settings)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        info!(
            mode = settings.verification.label(),
            header = %settings.header,
            "Sign-in gate configured"
        );

        Ok(Self {
            header: settings.header.clone(),
            verifier,
            engine: DecisionEngine::from_settings(settings, identities),
            sessions,
            sink: Arc::new(TracingSink),
            refresh_interval: settings.refresh_interval,
        })
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Verification mode label
    pub fn mode(&self) -> &'static str {
        self.verifier.resolver().label()
    }

    /// Run `request` through the gate.
    ///
    /// `existing` is the identity key of the caller's current session.
    pub async fn handle(&self, request: &AuthRequest, existing: Option<&str>) -> GateOutcome {
        let mut diagnostics = Diagnostics::new();
        let decision = self.evaluate(request, existing, &mut diagnostics).await;

        if let Some(decision) = &decision {
            metrics::record_decision(decision.label());
        }
        if !diagnostics.is_empty() {
            self.sink.publish(&diagnostics);
        }

        GateOutcome {
            decision,
            diagnostics,
        }
    }

    /// Start the periodic key set refresh, in JWKS mode with a refresh
    /// interval configured. Must be called within a tokio runtime.
    pub fn spawn_refresh(&self) -> Option<RefreshHandle> {
        let interval = self.refresh_interval?;
        let (url, cache) = self.verifier.resolver().key_set_cache()?;
        info!(jwks_url = %url, interval_secs = interval.as_secs(), "Starting JWKS refresh task");
        Some(cache.spawn_refresh(url, interval))
    }

    /// Fetch the key set now. `None` in shared-secret mode.
    pub async fn refresh_key_set(&self) -> Option<Result<Arc<KeySet>, JwksError>> {
        let (url, cache) = self.verifier.resolver().key_set_cache()?;
        Some(cache.refresh(url).await)
    }

    async fn evaluate(
        &self,
        request: &AuthRequest,
        existing: Option<&str>,
        diagnostics: &mut Diagnostics,
    ) -> Option<SessionDecision> {
        if existing.is_some() {
            return Some(SessionDecision::AlreadyAuthenticated);
        }

        let mode = self.mode();

        let token = match extract_token(request, &self.header) {
            Ok(token) => token,
            Err(err) => {
                debug!(header = %self.header, "No token in request");
                metrics::record_auth_attempt(mode, "absent");
                diagnostics.set_warning(err.diagnostic());
                return None;
            }
        };

        let claims = match self.verifier.verify(&token).await {
            Ok(claims) => claims,
            Err(err) => {
                warn!(reason = err.label(), error = %err, "Token rejected");
                metrics::record_auth_attempt(mode, "failure");
                metrics::record_auth_failure(err.label());
                diagnostics.set_error(err.diagnostic());
                return None;
            }
        };
        metrics::record_auth_attempt(mode, "success");

        let decision = match self.engine.decide_for(&claims, existing).await {
            (SessionDecision::Authenticate(auth), Some(identity)) => {
                self.sign_in(identity, auth).await
            }
            (decision, _) => decision,
        };

        if let SessionDecision::Reject { reason } = &decision {
            info!(reason = %reason, "Sign-in rejected");
            diagnostics.set_error(reason.diagnostic());
        }
        Some(decision)
    }

    async fn sign_in(&self, mut identity: Identity, auth: Authenticated) -> SessionDecision {
        if let Some(role) = &auth.role {
            if let Err(err) = self.engine.store().set_role(&identity, role).await {
                warn!(identity_id = identity.id, error = %err, "Failed to apply role");
                return SessionDecision::Reject {
                    reason: RejectReason::IdentityStoreUnavailable,
                };
            }
            identity.role = Some(role.clone());
        }

        match self.sessions.establish(&identity, &auth).await {
            Ok(()) => {
                info!(
                    identity_id = identity.id,
                    is_new_identity = auth.is_new_identity,
                    "Signed in"
                );
                SessionDecision::Authenticate(auth)
            }
            Err(err) => {
                warn!(identity_id = identity.id, error = %err, "Session manager failed");
                SessionDecision::Reject {
                    reason: RejectReason::SessionUnavailable,
                }
            }
        }
    }
}
