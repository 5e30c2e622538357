//! Config validation with field paths and user-facing messages.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::schema::VerificationConfig;

/// `@localpart:server`, where the server part may carry a port.
static USER_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^@[^:\s]+:[^\s]+$").expect("user id pattern"));

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A config validation error with field path and message.
#[derive(Debug, Error)]
#[error("Config validation error at '{path}': {message}")]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

/// Errors and warnings found in one pass.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }
}

pub fn validate(config: &VerificationConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    validate_identity(config, &mut report);
    validate_timeouts(config, &mut report);
    validate_logging(config, &mut report);
    report
}

fn validate_identity(config: &VerificationConfig, report: &mut ValidationReport) {
    let Some(identity) = &config.identity else {
        report.warn("identity", "No identity configured; the demo identity is used");
        return;
    };
    match identity.user_id.as_deref() {
        Some(user_id) if USER_ID_PATTERN.is_match(user_id) => {}
        Some(user_id) => report.error(
            "identity.userId",
            format!("'{user_id}' is not a user id of the form @localpart:server"),
        ),
        None => report.error("identity.userId", "userId is required"),
    }
    if identity
        .device_id
        .as_deref()
        .map(str::trim)
        .unwrap_or_default()
        .is_empty()
    {
        report.error("identity.deviceId", "deviceId cannot be empty");
    }
}

fn validate_timeouts(config: &VerificationConfig, report: &mut ValidationReport) {
    let Some(verification) = &config.verification else { return };
    if verification.transaction_timeout_secs == Some(0) {
        report.error(
            "verification.transactionTimeoutSecs",
            "transactionTimeoutSecs must be > 0",
        );
    }
    if verification.key_fetch_timeout_secs == Some(0) {
        report.error(
            "verification.keyFetchTimeoutSecs",
            "keyFetchTimeoutSecs must be > 0",
        );
    }
    if config.key_fetch_timeout() > config.transaction_timeout() {
        report.warn(
            "verification.keyFetchTimeoutSecs",
            "Key fetch timeout exceeds the transaction timeout",
        );
    }
}

fn validate_logging(config: &VerificationConfig, report: &mut ValidationReport) {
    let Some(level) = config.logging.as_ref().and_then(|l| l.level.as_deref()) else {
        return;
    };
    if !LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
        report.error(
            "logging.level",
            format!("Unknown log level '{level}'. Use one of {}", LOG_LEVELS.join(", ")),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{IdentityConfig, LoggingConfig, TransactionConfig};

    fn with_identity(user_id: &str, device_id: &str) -> VerificationConfig {
        VerificationConfig {
            identity: Some(IdentityConfig {
                user_id: Some(user_id.to_string()),
                device_id: Some(device_id.to_string()),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn well_formed_identity_is_valid() {
        let report = validate(&with_identity("@alice:example.org:8448", "ALICEDEV"));
        assert!(report.is_valid(), "errors: {:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn missing_identity_is_only_a_warning() {
        let report = validate(&VerificationConfig::default());
        assert!(report.is_valid());
        assert_eq!(report.warnings[0].path, "identity");
    }

    #[test]
    fn malformed_identity_is_rejected() {
        let report = validate(&with_identity("alice", " "));
        let paths: Vec<_> = report.errors.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["identity.userId", "identity.deviceId"]);
    }

    #[test]
    fn zero_timeouts_are_errors() {
        let mut cfg = with_identity("@a:b", "DEV");
        cfg.verification = Some(TransactionConfig {
            transaction_timeout_secs: Some(0),
            key_fetch_timeout_secs: Some(0),
            ..Default::default()
        });
        assert_eq!(validate(&cfg).errors.len(), 2);
    }

    #[test]
    fn long_key_fetch_is_a_warning() {
        let mut cfg = with_identity("@a:b", "DEV");
        cfg.verification = Some(TransactionConfig {
            transaction_timeout_secs: Some(30),
            key_fetch_timeout_secs: Some(60),
            ..Default::default()
        });
        let report = validate(&cfg);
        assert!(report.is_valid());
        assert_eq!(report.warnings[0].path, "verification.keyFetchTimeoutSecs");
    }

    #[test]
    fn unknown_log_level_is_error() {
        let mut cfg = with_identity("@a:b", "DEV");
        cfg.logging = Some(LoggingConfig {
            level: Some("verbose".into()),
            dir: None,
        });
        let report = validate(&cfg);
        assert!(!report.is_valid());
        assert!(report.errors[0].message.contains("verbose"));
    }
}
