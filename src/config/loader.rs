//! Configuration loader with environment variable expansion

use super::{Config, ConfigError};
use lazy_static::lazy_static;
use std::path::Path;

lazy_static! {
    // ${VAR} or ${VAR:-default}
    static ref ENV_VAR: regex_lite::Regex =
        regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").unwrap();
}

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Expand, parse and validate configuration text
    pub fn parse(content: &str) -> Result<Config, ConfigError> {
        let expanded = Self::expand_env_vars(content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Expand environment variables in a string.
    ///
    /// Supports two syntaxes:
    /// - `${VAR_NAME}` - keeps the placeholder if the variable is not set
    /// - `${VAR_NAME:-default}` - falls back to `default` (which may be empty)
    fn expand_env_vars(content: &str) -> String {
        let mut last_match = 0;
        let mut result = String::with_capacity(content.len());

        for cap in ENV_VAR.captures_iter(content) {
            let Some(full_match) = cap.get(0) else {
                continue;
            };
            let var_name = &cap[1];

            result.push_str(&content[last_match..full_match.start()]);

            match std::env::var(var_name) {
                Ok(value) => result.push_str(&value),
                Err(_) => match cap.get(2) {
                    Some(default) => result.push_str(default.as_str()),
                    None => result.push_str(full_match.as_str()),
                },
            }

            last_match = full_match.end();
        }

        result.push_str(&content[last_match..]);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_expand_env_vars() {
        std::env::set_var("TORII_TEST_VAR", "test_value");
        let expanded = ConfigLoader::expand_env_vars("key: ${TORII_TEST_VAR}");
        assert_eq!(expanded, "key: test_value");
        std::env::remove_var("TORII_TEST_VAR");
    }

    #[test]
    #[serial]
    fn test_expand_env_vars_default() {
        std::env::remove_var("TORII_MISSING_VAR");
        let expanded = ConfigLoader::expand_env_vars("a: ${TORII_MISSING_VAR:-fallback}");
        assert_eq!(expanded, "a: fallback");

        let expanded = ConfigLoader::expand_env_vars("a: \"${TORII_MISSING_VAR:-}\"");
        assert_eq!(expanded, "a: \"\"");
    }

    #[test]
    #[serial]
    fn test_unset_var_keeps_placeholder() {
        std::env::remove_var("TORII_MISSING_VAR");
        let expanded = ConfigLoader::expand_env_vars("a: ${TORII_MISSING_VAR}");
        assert_eq!(expanded, "a: ${TORII_MISSING_VAR}");
    }
}
