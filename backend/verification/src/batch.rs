//! Batch key verification.

use std::collections::BTreeMap;

use async_trait::async_trait;
use crossverify_core::{device_id_from_key_id, DeviceInfo, KeyInfo, VerificationError};
use tracing::{debug, warn};

use crate::context::CryptoContext;

/// Checks one key against the device that owns it.
#[async_trait]
pub trait KeyVerifier: Send + Sync {
    async fn verify_key(
        &self,
        key_id: &str,
        device: &DeviceInfo,
        key_info: &KeyInfo,
    ) -> Result<(), VerificationError>;
}

#[async_trait]
impl<F> KeyVerifier for F
where
    F: Fn(&str, &DeviceInfo, &KeyInfo) -> Result<(), VerificationError> + Send + Sync,
{
    async fn verify_key(
        &self,
        key_id: &str,
        device: &DeviceInfo,
        key_info: &KeyInfo,
    ) -> Result<(), VerificationError> {
        self(key_id, device, key_info)
    }
}

/// Verify every key we know about and mark the owning devices verified.
///
/// Keys naming neither a stored device nor the user's cross-signing identity
/// are skipped. Fails only when nothing could be verified, or when the
/// verifier itself rejects a key. Devices are marked one at a time; a failure
/// part-way leaves the earlier ones marked.
pub async fn verify_keys(
    ctx: &CryptoContext,
    user_id: &str,
    keys: &BTreeMap<String, KeyInfo>,
    verifier: &dyn KeyVerifier,
) -> Result<Vec<String>, VerificationError> {
    let mut verified: Vec<String> = Vec::new();

    for (key_id, key_info) in keys {
        let Some(device_id) = device_id_from_key_id(key_id) else {
            warn!(key_id = %key_id, "verification: Malformed key id, skipping");
            continue;
        };

        if let Some(device) = ctx.devices.stored_device(user_id, device_id).await {
            verifier.verify_key(key_id, &device, key_info).await?;
            record(&mut verified, device_id);
            continue;
        }

        let cross_signing = ctx.devices.stored_cross_signing(user_id).await;
        match cross_signing {
            Some(info) if info.id() == device_id => {
                let device = DeviceInfo::for_cross_signing_key(key_id, device_id);
                verifier.verify_key(key_id, &device, key_info).await?;
                record(&mut verified, device_id);
            }
            _ => {
                warn!(user_id, device_id, "verification: Could not find device to verify");
            }
        }
    }

    if verified.is_empty() {
        return Err(VerificationError::NoDevicesVerified);
    }

    for device_id in &verified {
        ctx.devices.set_device_verified(user_id, device_id).await?;
    }

    if let Some(uploader) = &ctx.uploader {
        match uploader.upload_signatures(user_id, &verified).await {
            Ok(()) => debug!(user_id, count = verified.len(), "Uploaded cross-signatures"),
            Err(VerificationError::KeySignatureUpload { message, value }) => {
                warn!(user_id, error = %message, result = %value, "Cross-signature upload failed");
            }
            Err(e) => warn!(user_id, error = %e, "Cross-signature upload failed"),
        }
    }

    Ok(verified)
}

fn record(verified: &mut Vec<String>, device_id: &str) {
    if !verified.iter().any(|d| d == device_id) {
        verified.push(device_id.to_string());
    }
}
