//! In-memory device list, cross-signing identities, and private key cache.
//!
//! Also hosts the consistency checks run when a persisted store is opened.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{InvalidCryptoStoreReason, InvalidStoreReason, VerificationError};
use crate::traits::{CrossSigningCache, DeviceStore};
use crate::types::{CrossSigningInfo, CrossSigningKeyType, DeviceInfo};

/// Newest crypto store schema this build can read.
pub const CRYPTO_STORE_VERSION: u32 = 1;

/// Reject a client store written with a different lazy-loading setting.
pub fn check_lazy_loading(stored: bool, configured: bool) -> Result<(), VerificationError> {
    if stored != configured {
        warn!(stored, configured, "Lazy-loading setting changed since store was written");
        return Err(VerificationError::invalid_store(
            InvalidStoreReason::ToggledLazyLoading,
            configured,
        ));
    }
    Ok(())
}

/// Reject a crypto store written by a newer schema.
pub fn check_crypto_store_version(version: u32) -> Result<(), VerificationError> {
    if version > CRYPTO_STORE_VERSION {
        warn!(
            version,
            supported = CRYPTO_STORE_VERSION,
            "Crypto store is newer than this build"
        );
        return Err(VerificationError::InvalidCryptoStore {
            reason: InvalidCryptoStoreReason::TooNew,
        });
    }
    Ok(())
}

type DeviceKey = (String, String);

#[derive(Default)]
pub struct MemoryDeviceStore {
    devices: RwLock<HashMap<DeviceKey, DeviceInfo>>,
    verified: RwLock<HashSet<DeviceKey>>,
    cross_signing: RwLock<HashMap<String, CrossSigningInfo>>,
    private_keys: RwLock<HashMap<(String, CrossSigningKeyType), Vec<u8>>>,
}

impl MemoryDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store persisted at the given schema version.
    pub fn open_with_version(version: u32) -> Result<Self, VerificationError> {
        check_crypto_store_version(version)?;
        Ok(Self::new())
    }

    pub async fn add_device(&self, user_id: &str, device: DeviceInfo) {
        let key = (user_id.to_string(), device.device_id.clone());
        self.devices.write().await.insert(key, device);
    }

    pub async fn add_cross_signing(&self, info: CrossSigningInfo) {
        self.cross_signing
            .write()
            .await
            .insert(info.user_id.clone(), info);
    }

    pub async fn is_verified(&self, user_id: &str, device_id: &str) -> bool {
        self.verified
            .read()
            .await
            .contains(&(user_id.to_string(), device_id.to_string()))
    }

    pub async fn verified_count(&self) -> usize {
        self.verified.read().await.len()
    }

    pub async fn cached_private_key(
        &self,
        user_id: &str,
        key_type: CrossSigningKeyType,
    ) -> Option<Vec<u8>> {
        self.private_keys
            .read()
            .await
            .get(&(user_id.to_string(), key_type))
            .cloned()
    }
}

#[async_trait]
impl DeviceStore for MemoryDeviceStore {
    async fn stored_device(&self, user_id: &str, device_id: &str) -> Option<DeviceInfo> {
        self.devices
            .read()
            .await
            .get(&(user_id.to_string(), device_id.to_string()))
            .cloned()
    }

    async fn stored_cross_signing(&self, user_id: &str) -> Option<CrossSigningInfo> {
        self.cross_signing.read().await.get(user_id).cloned()
    }

    async fn set_device_verified(
        &self,
        user_id: &str,
        device_id: &str,
    ) -> Result<(), VerificationError> {
        let inserted = self
            .verified
            .write()
            .await
            .insert((user_id.to_string(), device_id.to_string()));
        if inserted {
            info!(user_id, device_id, "Marked device verified");
        }
        Ok(())
    }
}

#[async_trait]
impl CrossSigningCache for MemoryDeviceStore {
    async fn store_private_key(
        &self,
        user_id: &str,
        key_type: CrossSigningKeyType,
        private_key: Vec<u8>,
    ) -> Result<(), VerificationError> {
        let identity = self.stored_cross_signing(user_id).await.ok_or_else(|| {
            VerificationError::CrossSigning(format!("no cross-signing identity for {user_id}"))
        })?;
        if identity.public_key(key_type).is_none() {
            return Err(VerificationError::CrossSigning(format!(
                "{user_id} has no public {key_type} key"
            )));
        }
        if private_key.is_empty() {
            return Err(VerificationError::CrossSigning(format!(
                "empty {key_type} private key"
            )));
        }
        debug!(user_id, key_type = %key_type, "Caching cross-signing private key");
        self.private_keys
            .write()
            .await
            .insert((user_id.to_string(), key_type), private_key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lazy_loading_toggle_is_rejected() {
        assert!(check_lazy_loading(true, true).is_ok());
        let err = check_lazy_loading(false, true).unwrap_err();
        assert!(matches!(
            err,
            VerificationError::InvalidStore {
                reason: InvalidStoreReason::ToggledLazyLoading,
                ..
            }
        ));
    }

    #[test]
    fn newer_crypto_store_is_rejected() {
        assert!(MemoryDeviceStore::open_with_version(CRYPTO_STORE_VERSION).is_ok());
        let err = MemoryDeviceStore::open_with_version(CRYPTO_STORE_VERSION + 1)
            .err()
            .unwrap();
        assert!(err.to_string().contains("TOO_NEW"));
    }

    #[tokio::test]
    async fn marking_verified_is_idempotent() {
        let store = MemoryDeviceStore::new();
        store.set_device_verified("@a:x", "DEV").await.unwrap();
        store.set_device_verified("@a:x", "DEV").await.unwrap();
        assert!(store.is_verified("@a:x", "DEV").await);
        assert_eq!(store.verified_count().await, 1);
    }

    #[tokio::test]
    async fn private_key_needs_matching_identity() {
        let store = MemoryDeviceStore::new();
        let err = store
            .store_private_key("@a:x", CrossSigningKeyType::SelfSigning, vec![1])
            .await
            .unwrap_err();
        assert!(matches!(err, VerificationError::CrossSigning(_)));

        let mut info = CrossSigningInfo::new("@a:x", "MASTER");
        info.self_signing_key = Some("SSK".into());
        store.add_cross_signing(info).await;

        store
            .store_private_key("@a:x", CrossSigningKeyType::SelfSigning, vec![1, 2])
            .await
            .unwrap();
        assert!(store
            .store_private_key("@a:x", CrossSigningKeyType::UserSigning, vec![3])
            .await
            .is_err());
        assert_eq!(
            store
                .cached_private_key("@a:x", CrossSigningKeyType::SelfSigning)
                .await,
            Some(vec![1, 2])
        );
    }
}
