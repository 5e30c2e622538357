//! Config defaults applied after load.

use crate::schema::{LoggingConfig, StoreConfig, TransactionConfig, VerificationConfig};

/// Default idle window of a transaction, in seconds.
pub const DEFAULT_TRANSACTION_TIMEOUT_SECS: u64 = 600;

/// Default bound on the cross-signing key fetch, in seconds.
pub const DEFAULT_KEY_FETCH_TIMEOUT_SECS: u64 = 60;

pub const DEFAULT_LOG_LEVEL: &str = "info";

pub const DEFAULT_LOG_DIR: &str = "logs";

/// Apply all defaults to a freshly loaded config.
pub fn apply_all_defaults(config: VerificationConfig) -> VerificationConfig {
    let config = apply_verification_defaults(config);
    let config = apply_logging_defaults(config);
    apply_store_defaults(config)
}

fn apply_verification_defaults(mut config: VerificationConfig) -> VerificationConfig {
    let verification = config
        .verification
        .get_or_insert_with(TransactionConfig::default);
    verification
        .transaction_timeout_secs
        .get_or_insert(DEFAULT_TRANSACTION_TIMEOUT_SECS);
    verification
        .key_fetch_timeout_secs
        .get_or_insert(DEFAULT_KEY_FETCH_TIMEOUT_SECS);
    verification.request_cross_signing_keys.get_or_insert(true);
    config
}

fn apply_logging_defaults(mut config: VerificationConfig) -> VerificationConfig {
    let logging = config.logging.get_or_insert_with(LoggingConfig::default);
    if logging.level.is_none() {
        logging.level = Some(DEFAULT_LOG_LEVEL.to_string());
    }
    if logging.dir.is_none() {
        logging.dir = Some(DEFAULT_LOG_DIR.to_string());
    }
    config
}

fn apply_store_defaults(mut config: VerificationConfig) -> VerificationConfig {
    let store = config.store.get_or_insert_with(StoreConfig::default);
    store.lazy_load_members.get_or_insert(false);
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_every_section() {
        let cfg = apply_all_defaults(VerificationConfig::default());
        let verification = cfg.verification.unwrap();
        assert_eq!(verification.transaction_timeout_secs, Some(600));
        assert_eq!(verification.key_fetch_timeout_secs, Some(60));
        assert_eq!(verification.request_cross_signing_keys, Some(true));
        let logging = cfg.logging.unwrap();
        assert_eq!(logging.level.as_deref(), Some("info"));
        assert_eq!(logging.dir.as_deref(), Some("logs"));
        assert_eq!(cfg.store.unwrap().lazy_load_members, Some(false));
    }

    #[test]
    fn does_not_override_user_values() {
        let cfg = VerificationConfig {
            verification: Some(TransactionConfig {
                transaction_timeout_secs: Some(30),
                ..Default::default()
            }),
            ..Default::default()
        };
        let cfg = apply_all_defaults(cfg);
        let verification = cfg.verification.unwrap();
        assert_eq!(verification.transaction_timeout_secs, Some(30));
        assert_eq!(verification.key_fetch_timeout_secs, Some(60));
    }
}
