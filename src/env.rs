//! Environment variable expansion for configuration values
//!
//! Values may reference `${VAR}` or `${VAR:-fallback}`. Key material and
//! encryption key names usually come from the environment this way rather
//! than being written into the configuration file.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::env;

use crate::config::ConfigError;

/// `${NAME}` or `${NAME:-fallback}`
static ENV_VAR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("valid env var pattern")
});

/// Expand environment variable references in `input`.
///
/// A variable that is unset and has no fallback is an error; every such
/// variable is named in the message.
pub fn substitute_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut missing: Vec<String> = Vec::new();

    let expanded = ENV_VAR_PATTERN.replace_all(input, |caps: &Captures| {
        let name = &caps[1];
        match (env::var(name), caps.get(2)) {
            (Ok(value), _) => value,
            (Err(_), Some(fallback)) => fallback.as_str().to_string(),
            (Err(_), None) => {
                if !missing.iter().any(|m| m == name) {
                    missing.push(name.to_string());
                }
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        return Err(ConfigError::ValidationError(format!(
            "Missing environment variables: {}",
            missing.join(", ")
        )));
    }

    Ok(expanded.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_value_unchanged() {
        assert_eq!(
            substitute_env_vars("projects/p/keys/k").unwrap(),
            "projects/p/keys/k"
        );
    }

    #[test]
    fn test_variable_expansion() {
        env::set_var("GCS_VFS_ENV_BUCKET", "npd-test");
        assert_eq!(
            substitute_env_vars("gcs://${GCS_VFS_ENV_BUCKET}/${GCS_VFS_ENV_BUCKET}").unwrap(),
            "gcs://npd-test/npd-test"
        );
        env::remove_var("GCS_VFS_ENV_BUCKET");
    }

    #[test]
    fn test_fallback_used_when_unset() {
        assert_eq!(
            substitute_env_vars("${GCS_VFS_ENV_UNSET_HOST:-http://localhost:4443}").unwrap(),
            "http://localhost:4443"
        );
    }

    #[test]
    fn test_set_variable_wins_over_fallback() {
        env::set_var("GCS_VFS_ENV_HOST", "https://storage.example");
        assert_eq!(
            substitute_env_vars("${GCS_VFS_ENV_HOST:-http://localhost}").unwrap(),
            "https://storage.example"
        );
        env::remove_var("GCS_VFS_ENV_HOST");
    }

    #[test]
    fn test_missing_variables_reported_once() {
        let err = substitute_env_vars("${GCS_VFS_MISSING_A} ${GCS_VFS_MISSING_B} ${GCS_VFS_MISSING_A}")
            .unwrap_err()
            .to_string();
        assert!(err.contains("GCS_VFS_MISSING_A"));
        assert!(err.contains("GCS_VFS_MISSING_B"));
        assert_eq!(err.matches("GCS_VFS_MISSING_A").count(), 1);
    }

    #[test]
    fn test_bare_dollar_is_literal() {
        assert_eq!(substitute_env_vars("$VAR {VAR}").unwrap(), "$VAR {VAR}");
    }
}
