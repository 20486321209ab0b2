//! Metrics module
//!
//! Prometheus counters for the sign-in gate, registered in the default
//! registry on first use.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

lazy_static! {
    // Gate metrics
    pub static ref AUTH_ATTEMPTS: CounterVec = register_counter_vec!(
        "torii_auth_attempts_total",
        "Sign-in attempts by verification mode",
        &["mode", "status"]  // status: "success", "failure" or "absent"
    ).unwrap();

    pub static ref AUTH_FAILURES: CounterVec = register_counter_vec!(
        "torii_auth_failures_total",
        "Token verification failures by reason",
        &["reason"]
    ).unwrap();

    pub static ref SESSION_DECISIONS: CounterVec = register_counter_vec!(
        "torii_session_decisions_total",
        "Session decisions by kind",
        &["decision"]
    ).unwrap();

    // JWKS metrics
    pub static ref JWKS_FETCHES: CounterVec = register_counter_vec!(
        "torii_jwks_fetches_total",
        "JWKS fetches by outcome",
        &["status"]
    ).unwrap();

    pub static ref JWKS_FETCH_DURATION: HistogramVec = register_histogram_vec!(
        "torii_jwks_fetch_duration_seconds",
        "JWKS fetch duration in seconds",
        &["status"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    pub static ref JWKS_CACHE_LOOKUPS: CounterVec = register_counter_vec!(
        "torii_jwks_cache_lookups_total",
        "JWKS cache lookups by result",
        &["result"]  // "hit", "miss" or "stale_served"
    ).unwrap();
}

/// Record a sign-in attempt
pub fn record_auth_attempt(mode: &str, status: &str) {
    AUTH_ATTEMPTS.with_label_values(&[mode, status]).inc();
}

/// Record a verification failure
pub fn record_auth_failure(reason: &str) {
    AUTH_FAILURES.with_label_values(&[reason]).inc();
}

/// Record a session decision
pub fn record_decision(decision: &str) {
    SESSION_DECISIONS.with_label_values(&[decision]).inc();
}

/// Record a JWKS fetch and its duration
pub fn record_jwks_fetch(status: &str, duration_secs: f64) {
    JWKS_FETCHES.with_label_values(&[status]).inc();
    JWKS_FETCH_DURATION
        .with_label_values(&[status])
        .observe(duration_secs);
}

/// Record a JWKS cache lookup
pub fn record_jwks_cache_lookup(result: &str) {
    JWKS_CACHE_LOOKUPS.with_label_values(&[result]).inc();
}

/// Render the default registry in the Prometheus text format
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_auth_attempt() {
        record_auth_attempt("shared_secret", "success");
        let value = AUTH_ATTEMPTS
            .with_label_values(&["shared_secret", "success"])
            .get();
        assert!(value >= 1.0);
    }

    #[test]
    fn test_record_jwks_fetch() {
        record_jwks_fetch("fetch_failed", 0.05);
        // Just verify it doesn't panic
    }

    #[test]
    fn test_gather_text_contains_counters() {
        record_decision("authenticate");
        record_jwks_cache_lookup("hit");
        let text = gather_text();
        assert!(text.contains("torii_session_decisions_total"));
        assert!(text.contains("torii_jwks_cache_lookups_total"));
    }
}
