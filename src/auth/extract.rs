//! Token extraction
//!
//! Reads the raw token from the configured header. Parsing is lenient: one
//! leading `Bearer` scheme tag is dropped and the rest is rejoined with single
//! spaces, so odd spacing still yields a best-effort token.

use super::{AuthError, AuthRequest};

/// Scheme tag stripped from the header value
pub const BEARER_SCHEME: &str = "Bearer";

/// Extract the candidate token from `header_name`.
///
/// Returns [`AuthError::TokenAbsent`] when the header is missing.
pub fn extract_token(request: &AuthRequest, header_name: &str) -> Result<String, AuthError> {
    let value = request.header(header_name).ok_or(AuthError::TokenAbsent)?;

    let mut parts = value.split_whitespace().peekable();
    if parts.peek() == Some(&BEARER_SCHEME) {
        parts.next();
    }

    Ok(parts.collect::<Vec<_>>().join(" "))
}
