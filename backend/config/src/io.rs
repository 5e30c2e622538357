//! Config file read/write with backup rotation.

use crate::schema::VerificationConfig;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Config file name within the config directory.
const CONFIG_FILE_NAME: &str = "crossverify.yaml";

/// Env var overriding the config directory.
pub const CONFIG_DIR_ENV: &str = "CROSSVERIFY_CONFIG_DIR";

const MAX_BACKUPS: usize = 3;

/// Resolve the config directory: `CROSSVERIFY_CONFIG_DIR`, else `~/.crossverify/`.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        return PathBuf::from(dir);
    }
    match dirs::home_dir() {
        Some(home) => home.join(".crossverify"),
        None => PathBuf::from(".crossverify"),
    }
}

pub fn config_file_path(config_dir: &Path) -> PathBuf {
    config_dir.join(CONFIG_FILE_NAME)
}

/// Read the raw config tree. A missing file yields an empty object.
pub async fn load_raw(path: &Path) -> Result<serde_json::Value> {
    if !path.exists() {
        debug!(path = %path.display(), "Config file does not exist; using defaults");
        return Ok(serde_json::Value::Object(Default::default()));
    }

    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let value: serde_json::Value = serde_yaml::from_str(&raw)
        .with_context(|| format!("Failed to parse config YAML at: {}", path.display()))?;

    // An empty document parses as null.
    Ok(if value.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        value
    })
}

/// Load and parse the config, without env substitution or defaults.
pub async fn load_config(path: &Path) -> Result<VerificationConfig> {
    let value = load_raw(path).await?;
    let config: VerificationConfig = serde_json::from_value(value)
        .with_context(|| format!("Invalid config at: {}", path.display()))?;
    info!(path = %path.display(), "Loaded config");
    Ok(config)
}

/// Write the config via a temp file and rename, keeping rolling backups.
pub async fn write_config(config: &VerificationConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.with_context(|| {
            format!("Failed to create config directory: {}", parent.display())
        })?;
    }

    if path.exists() {
        rotate_backups(path).await;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;

    let tmp_path = path.with_extension("yaml.tmp");
    fs::write(&tmp_path, yaml.as_bytes())
        .await
        .with_context(|| format!("Failed to write temp config: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("Failed to rename temp config to: {}", path.display()))?;

    info!(path = %path.display(), "Wrote config");
    Ok(())
}

/// crossverify.yaml.bak.1 -> .bak.2 -> ... ; the current file becomes .bak.1.
async fn rotate_backups(path: &Path) {
    for i in (1..MAX_BACKUPS).rev() {
        let old = path.with_extension(format!("yaml.bak.{i}"));
        let new = path.with_extension(format!("yaml.bak.{}", i + 1));
        if old.exists() {
            if let Err(e) = fs::rename(&old, &new).await {
                warn!(backup = %old.display(), error = %e, "Failed to rotate config backup");
            }
        }
    }

    let bak = path.with_extension("yaml.bak.1");
    if let Err(e) = fs::copy(path, &bak).await {
        warn!(backup = %bak.display(), error = %e, "Failed to create config backup");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{IdentityConfig, LoggingConfig};

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("crossverify-{name}-{}", std::process::id()))
    }

    #[tokio::test]
    async fn missing_file_loads_empty_config() {
        let dir = scratch_dir("missing");
        let cfg = load_config(&config_file_path(&dir)).await.unwrap();
        assert_eq!(cfg, VerificationConfig::default());
    }

    #[tokio::test]
    async fn write_then_load_keeps_backup() {
        let dir = scratch_dir("write");
        let path = config_file_path(&dir);
        let mut cfg = VerificationConfig {
            identity: Some(IdentityConfig {
                user_id: Some("@alice:example.org".into()),
                device_id: Some("ALICEDEV".into()),
            }),
            ..Default::default()
        };
        write_config(&cfg, &path).await.unwrap();

        cfg.logging = Some(LoggingConfig {
            level: Some("debug".into()),
            dir: None,
        });
        write_config(&cfg, &path).await.unwrap();

        let loaded = load_config(&path).await.unwrap();
        assert_eq!(loaded, cfg);
        assert!(path.with_extension("yaml.bak.1").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
