use std::path::PathBuf;

use anyhow::Result;
use crossverify_config::{config_dir, config_file_path, load_and_prepare, ValidationReport, VerificationConfig};
use crossverify_core::LocalIdentity;
use crossverify_verification::TransactionOptions;

/// Identity used when the config names none.
pub const DEMO_USER_ID: &str = "@demo:localhost";
pub const DEMO_DEVICE_ID: &str = "DEMODEV";

/// A loaded, defaulted, validated config and where it came from.
pub struct Settings {
    pub path: PathBuf,
    pub config: VerificationConfig,
    pub report: ValidationReport,
}

impl Settings {
    pub async fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = resolve_path(path);
        let (config, report) = load_and_prepare(&path).await?;
        Ok(Self {
            path,
            config,
            report,
        })
    }

    pub fn local_identity(&self) -> LocalIdentity {
        local_identity(&self.config)
    }

    pub fn transaction_options(&self) -> TransactionOptions {
        transaction_options(&self.config)
    }
}

/// `--config` wins; otherwise the file in the config directory.
pub fn resolve_path(path: Option<PathBuf>) -> PathBuf {
    path.unwrap_or_else(|| config_file_path(&config_dir()))
}

pub fn local_identity(config: &VerificationConfig) -> LocalIdentity {
    LocalIdentity::new(
        config.user_id().unwrap_or(DEMO_USER_ID),
        config.device_id().unwrap_or(DEMO_DEVICE_ID),
    )
}

pub fn transaction_options(config: &VerificationConfig) -> TransactionOptions {
    TransactionOptions {
        timeout: config.transaction_timeout(),
        key_fetch_timeout: config.key_fetch_timeout(),
        request_cross_signing_keys: config.request_cross_signing_keys(),
    }
}
