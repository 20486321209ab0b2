//! Per-request diagnostics
//!
//! Each request carries at most one warning and one error. The first
//! message of each kind is kept; rendering puts the error first.

use serde::Serialize;
use std::fmt;
use tracing::{error, warn};

/// Message severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => f.write_str("error"),
            Severity::Warning => f.write_str("warning"),
        }
    }
}

/// Diagnostics for one request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the warning unless one is already set
    pub fn set_warning(&mut self, message: impl Into<String>) {
        self.warning.get_or_insert_with(|| message.into());
    }

    /// Set the error unless one is already set
    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error.get_or_insert_with(|| message.into());
    }

    pub fn warning(&self) -> Option<&str> {
        self.warning.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.warning.is_none() && self.error.is_none()
    }

    /// Messages in display order: error, then warning
    pub fn messages(&self) -> Vec<(Severity, &str)> {
        let mut messages = Vec::with_capacity(2);
        if let Some(error) = self.error() {
            messages.push((Severity::Error, error));
        }
        if let Some(warning) = self.warning() {
            messages.push((Severity::Warning, warning));
        }
        messages
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (severity, message)) in self.messages().into_iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "JWT Auth {}: {}", severity, message)?;
        }
        Ok(())
    }
}

/// Receives the diagnostics of each request
pub trait DiagnosticSink: Send + Sync {
    fn publish(&self, diagnostics: &Diagnostics);
}

/// Emits diagnostics as log events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn publish(&self, diagnostics: &Diagnostics) {
        if let Some(message) = diagnostics.error() {
            error!(diagnostic = %message, "Sign-in error");
        }
        if let Some(message) = diagnostics.warning() {
            warn!(diagnostic = %message, "Sign-in warning");
        }
    }
}
