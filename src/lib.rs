//! Torii Library
//!
//! JWT sign-in gate for applications behind an authenticating reverse proxy.
//!
//! # Features
//!
//! - **Header Tokens**: Reads the token from a configurable header, `Bearer` optional
//! - **Two Modes**: HS256 with a shared secret, or RS256 with keys from a JWKS URL
//! - **Key Set Cache**: Time-bounded, single-flight fetch, optional background refresh
//! - **Session Decisions**: Identity lookup/creation and role assignment
//! - **Per-Request Diagnostics**: One warning and one error at most, never secrets
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use torii::auth::AuthRequest;
//! use torii::gate::{Gate, LogSessionManager};
//! use torii::session::MemoryIdentityStore;
//! use torii::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let gate = Gate::new(
//!         &config.auth.settings()?,
//!         Arc::new(MemoryIdentityStore::new()),
//!         Arc::new(LogSessionManager),
//!     )?;
//!     let _refresh = gate.spawn_refresh();
//!
//!     let request = AuthRequest::new().with_header("Authorization", "Bearer eyJ...");
//!     let outcome = gate.handle(&request, None).await;
//!     println!("{:?}", outcome.decision);
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod cache;
pub mod config;
pub mod gate;
pub mod logging;
pub mod metrics;
pub mod session;

// Re-export commonly used types
pub use config::{Config, GateSettings};
pub use gate::{Gate, GateOutcome};
pub use session::SessionDecision;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
