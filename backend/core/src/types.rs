use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The local account and device running a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalIdentity {
    pub user_id: String,
    pub device_id: String,
}

impl LocalIdentity {
    pub fn new(user_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            device_id: device_id.into(),
        }
    }
}

/// Key info exchanged for a key id, typically a MAC over the key.
pub type KeyInfo = String;

/// A device known to the local device list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: String,
    /// `algorithm:key_id` → public key.
    #[serde(default)]
    pub keys: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl DeviceInfo {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            keys: BTreeMap::new(),
            display_name: None,
        }
    }

    pub fn with_key(mut self, key_id: impl Into<String>, key: impl Into<String>) -> Self {
        self.keys.insert(key_id.into(), key.into());
        self
    }

    /// Minimal stand-in used when a key id names a cross-signing key rather
    /// than a device: the only key is the id itself.
    pub fn for_cross_signing_key(key_id: &str, id: &str) -> Self {
        Self::new(id).with_key(key_id, id)
    }

    pub fn key(&self, key_id: &str) -> Option<&str> {
        self.keys.get(key_id).map(String::as_str)
    }
}

/// Splits `algorithm:device_id` into its device id part.
pub fn device_id_from_key_id(key_id: &str) -> Option<&str> {
    key_id.split(':').nth(1).filter(|id| !id.is_empty())
}

/// The cross-signing key kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossSigningKeyType {
    Master,
    SelfSigning,
    UserSigning,
}

impl CrossSigningKeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrossSigningKeyType::Master => "master",
            CrossSigningKeyType::SelfSigning => "self_signing",
            CrossSigningKeyType::UserSigning => "user_signing",
        }
    }

    /// Secret-storage name for this key, e.g. `m.cross_signing.self_signing`.
    pub fn secret_name(&self) -> String {
        format!("m.cross_signing.{}", self.as_str())
    }
}

impl fmt::Display for CrossSigningKeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public cross-signing identity of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossSigningInfo {
    pub user_id: String,
    /// Public master key; doubles as the identity id.
    pub master_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_signing_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_signing_key: Option<String>,
}

impl CrossSigningInfo {
    pub fn new(user_id: impl Into<String>, master_key: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            master_key: master_key.into(),
            self_signing_key: None,
            user_signing_key: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.master_key
    }

    pub fn public_key(&self, key_type: CrossSigningKeyType) -> Option<&str> {
        match key_type {
            CrossSigningKeyType::Master => Some(&self.master_key),
            CrossSigningKeyType::SelfSigning => self.self_signing_key.as_deref(),
            CrossSigningKeyType::UserSigning => self.user_signing_key.as_deref(),
        }
    }
}
