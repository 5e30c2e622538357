//! `crossverify-config`: configuration for the verification runtime.
//!
//! Provides:
//! - Typed config schema (identity, transaction tunables, logging, store)
//! - YAML read/write with backup rotation
//! - `${ENV_VAR}` substitution
//! - Default value application
//! - Validation with warnings and errors

pub mod defaults;
pub mod env;
pub mod io;
pub mod schema;
pub mod validation;

pub use defaults::apply_all_defaults;
pub use env::{collect_referenced_vars, resolve_env_vars, resolve_env_vars_with, MissingEnvVarError};
pub use io::{config_dir, config_file_path, load_config, load_raw, write_config, CONFIG_DIR_ENV};
pub use schema::{IdentityConfig, LoggingConfig, StoreConfig, TransactionConfig, VerificationConfig};
pub use validation::{validate, ConfigValidationError, ValidationReport};

use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

/// Load, substitute env vars, apply defaults, and validate.
///
/// Validation problems are logged and returned alongside the config; only
/// unreadable files and missing env vars are hard errors.
pub async fn load_and_prepare(path: &Path) -> Result<(VerificationConfig, ValidationReport)> {
    let raw = load_raw(path).await?;
    let env: HashMap<String, String> = std::env::vars().collect();
    prepare(raw, &env)
}

/// The pipeline behind [`load_and_prepare`], over an already-parsed tree.
pub fn prepare(
    raw: Value,
    env: &HashMap<String, String>,
) -> Result<(VerificationConfig, ValidationReport)> {
    let value = resolve_env_vars_with(&raw, env).context("Failed to resolve env vars in config")?;

    let config: VerificationConfig =
        serde_json::from_value(value).context("Failed to deserialize config after processing")?;
    let config = apply_all_defaults(config);

    let report = validate(&config);
    for warning in &report.warnings {
        tracing::warn!(path = %warning.path, message = %warning.message, "Config warning");
    }
    for error in &report.errors {
        tracing::error!(path = %error.path, message = %error.message, "Config error");
    }

    Ok((config, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn prepare_substitutes_and_defaults() {
        let raw = json!({
            "identity": {"userId": "@${USER_PART}:example.org", "deviceId": "DEV1"},
            "verification": {"keyFetchTimeoutSecs": 5}
        });
        let env = HashMap::from([("USER_PART".to_string(), "alice".to_string())]);

        let (cfg, report) = prepare(raw, &env).unwrap();

        assert!(report.is_valid(), "errors: {:?}", report.errors);
        assert_eq!(cfg.user_id(), Some("@alice:example.org"));
        assert_eq!(cfg.key_fetch_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.transaction_timeout(), Duration::from_secs(600));
        assert_eq!(cfg.log_level(), "info");
    }

    #[test]
    fn prepare_reports_invalid_values() {
        let raw = json!({
            "identity": {"userId": "alice", "deviceId": "DEV1"},
            "logging": {"level": "loud"}
        });
        let (_, report) = prepare(raw, &HashMap::new()).unwrap();
        assert_eq!(report.errors.len(), 2);
    }

    #[test]
    fn prepare_fails_on_missing_env_var() {
        let raw = json!({"identity": {"deviceId": "${NOPE}"}});
        assert!(prepare(raw, &HashMap::new()).is_err());
    }
}
