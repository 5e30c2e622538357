//! crossverify configuration schema.
//!
//! Typed for serde YAML/JSON deserialization. Every section is optional on
//! disk; `defaults::apply_all_defaults` fills in what the runtime needs.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::defaults::{DEFAULT_KEY_FETCH_TIMEOUT_SECS, DEFAULT_TRANSACTION_TIMEOUT_SECS};

/// Root configuration, as read from `crossverify.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationConfig {
    /// This device's identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityConfig>,

    /// Transaction tunables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<TransactionConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,

    /// Persisted store settings checked at open time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<StoreConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityConfig {
    /// Fully-qualified user id, e.g. `@alice:example.org`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionConfig {
    /// Idle window before a stalled transaction is cancelled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_timeout_secs: Option<u64>,
    /// Bound on the post-verification key fetch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_fetch_timeout_secs: Option<u64>,
    /// Ask the verified device for cross-signing keys after self-verification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_cross_signing_keys: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Directory for the rotating JSON log file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// Lazy-loading setting the client store was written with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lazy_load_members: Option<bool>,
}

impl VerificationConfig {
    pub fn user_id(&self) -> Option<&str> {
        self.identity.as_ref()?.user_id.as_deref()
    }

    pub fn device_id(&self) -> Option<&str> {
        self.identity.as_ref()?.device_id.as_deref()
    }

    pub fn transaction_timeout(&self) -> Duration {
        let secs = self
            .verification
            .as_ref()
            .and_then(|v| v.transaction_timeout_secs)
            .unwrap_or(DEFAULT_TRANSACTION_TIMEOUT_SECS);
        Duration::from_secs(secs)
    }

    pub fn key_fetch_timeout(&self) -> Duration {
        let secs = self
            .verification
            .as_ref()
            .and_then(|v| v.key_fetch_timeout_secs)
            .unwrap_or(DEFAULT_KEY_FETCH_TIMEOUT_SECS);
        Duration::from_secs(secs)
    }

    pub fn request_cross_signing_keys(&self) -> bool {
        self.verification
            .as_ref()
            .and_then(|v| v.request_cross_signing_keys)
            .unwrap_or(true)
    }

    pub fn log_level(&self) -> &str {
        self.logging
            .as_ref()
            .and_then(|l| l.level.as_deref())
            .unwrap_or(crate::defaults::DEFAULT_LOG_LEVEL)
    }

    pub fn log_dir(&self) -> &str {
        self.logging
            .as_ref()
            .and_then(|l| l.dir.as_deref())
            .unwrap_or(crate::defaults::DEFAULT_LOG_DIR)
    }

    pub fn lazy_load_members(&self) -> bool {
        self.store
            .as_ref()
            .and_then(|s| s.lazy_load_members)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_camel_case_yaml() {
        let yaml = r#"
identity:
  userId: "@alice:example.org"
  deviceId: ALICEDEV
verification:
  transactionTimeoutSecs: 120
  requestCrossSigningKeys: false
logging:
  level: debug
"#;
        let cfg: VerificationConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.user_id(), Some("@alice:example.org"));
        assert_eq!(cfg.device_id(), Some("ALICEDEV"));
        assert_eq!(cfg.transaction_timeout(), Duration::from_secs(120));
        assert_eq!(cfg.key_fetch_timeout(), Duration::from_secs(60));
        assert!(!cfg.request_cross_signing_keys());
        assert_eq!(cfg.log_level(), "debug");
        assert_eq!(cfg.log_dir(), "logs");
    }

    #[test]
    fn empty_sections_are_not_serialized() {
        let yaml = serde_yaml::to_string(&VerificationConfig::default()).unwrap();
        assert_eq!(yaml.trim(), "{}");
    }
}
