//! Configuration Loading Tests

use serial_test::serial;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;
use torii::config::{Config, ConfigError, LogFormat, Verification};

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_jwks_config() {
    let file = write_config(
        r#"
auth:
  header: "X-Forwarded-Access-Token"
  jwks_url: "https://auth.example.com/.well-known/jwks.json"
  default_role: "Contributor"
  allowed_roles: ["contributor", "editor"]
  cache_ttl_secs: 3600
  stale_if_error_secs: 600
  issuer: "https://auth.example.com"
logging:
  level: "debug"
  format: "pretty"
"#,
    );

    let config = Config::load(file.path()).unwrap();
    let settings = config.auth.settings().unwrap();

    assert_eq!(settings.header, "x-forwarded-access-token");
    assert_eq!(
        settings.verification,
        Verification::Jwks {
            url: "https://auth.example.com/.well-known/jwks.json".into()
        }
    );
    assert_eq!(settings.default_role, "contributor");
    assert_eq!(settings.cache_ttl, Duration::from_secs(3600));
    assert_eq!(settings.stale_if_error, Duration::from_secs(600));
    assert_eq!(settings.refresh_interval, Some(Duration::from_secs(86400)));
    assert_eq!(settings.issuer.as_deref(), Some("https://auth.example.com"));
    assert_eq!(config.logging.format, LogFormat::Pretty);
}

#[test]
fn test_minimal_shared_secret_config() {
    let config = Config::from_yaml_str("auth:\n  shared_secret: \"s3cr3t\"\n").unwrap();
    let settings = config.auth.settings().unwrap();

    assert_eq!(settings.header, "authorization");
    assert_eq!(settings.verification.label(), "shared_secret");
    assert_eq!(settings.default_role, "subscriber");
    assert_eq!(settings.cache_ttl, Duration::from_secs(604800));
    assert_eq!(settings.fetch_timeout, Duration::from_secs(5));
    assert_eq!(config.logging.format, LogFormat::Json);
}

#[test]
fn test_ambiguous_config_rejected_at_load() {
    let result = Config::from_yaml_str(
        r#"
auth:
  shared_secret: "s3cr3t"
  jwks_url: "https://auth.example.com/jwks.json"
"#,
    );
    assert!(matches!(result, Err(ConfigError::ValidationError(msg)) if msg.contains("mutually exclusive")));
}

#[test]
fn test_missing_verification_rejected_at_load() {
    let result = Config::from_yaml_str("auth:\n  header: \"Authorization\"\n");
    assert!(matches!(result, Err(ConfigError::ValidationError(_))));
}

#[test]
fn test_validation_error_does_not_echo_secret() {
    let result = Config::from_yaml_str(
        r#"
auth:
  shared_secret: "do-not-print-me"
  jwks_url: "https://auth.example.com/jwks.json"
"#,
    );
    let message = result.unwrap_err().to_string();
    assert!(!message.contains("do-not-print-me"));
}

#[test]
fn test_missing_file() {
    let result = Config::load("/nonexistent/torii.yaml");
    assert!(matches!(result, Err(ConfigError::IoError(_))));
}

#[test]
fn test_invalid_yaml() {
    let result = Config::from_yaml_str("auth: [not, a, map");
    assert!(matches!(result, Err(ConfigError::ParseError(_))));
}

#[test]
#[serial]
fn test_secret_from_environment() {
    std::env::set_var("TORII_IT_SECRET", "from-env");
    let config = Config::from_yaml_str("auth:\n  shared_secret: \"${TORII_IT_SECRET}\"\n").unwrap();
    std::env::remove_var("TORII_IT_SECRET");

    let settings = config.auth.settings().unwrap();
    let Verification::SharedSecret(secret) = settings.verification else {
        panic!("expected shared secret mode");
    };
    assert_eq!(secret.expose(), b"from-env");
}

#[test]
#[serial]
fn test_env_default_selects_mode() {
    std::env::remove_var("TORII_IT_SECRET");
    std::env::remove_var("TORII_IT_JWKS");
    let config = Config::from_yaml_str(
        r#"
auth:
  shared_secret: "${TORII_IT_SECRET:-}"
  jwks_url: "${TORII_IT_JWKS:-https://auth.example.com/jwks.json}"
"#,
    )
    .unwrap();
    assert_eq!(config.auth.settings().unwrap().verification.label(), "jwks");
}
