use async_trait::async_trait;

use crate::error::VerificationError;
use crate::event::VerificationEvent;
use crate::types::{CrossSigningInfo, CrossSigningKeyType, DeviceInfo};

/// Ordered transport for protocol events to the remote party.
///
/// Implementations must preserve per-transaction ordering.
#[async_trait]
pub trait VerificationChannel: Send + Sync {
    async fn send(
        &self,
        event_type: &str,
        content: serde_json::Value,
    ) -> Result<(), VerificationError>;
}

/// Device list and cross-signing identity lookups.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn stored_device(&self, user_id: &str, device_id: &str) -> Option<DeviceInfo>;

    async fn stored_cross_signing(&self, user_id: &str) -> Option<CrossSigningInfo>;

    /// Idempotent.
    async fn set_device_verified(
        &self,
        user_id: &str,
        device_id: &str,
    ) -> Result<(), VerificationError>;
}

/// Requests account secrets from other devices of the same user.
#[async_trait]
pub trait SecretStorage: Send + Sync {
    /// Resolves with the base64-encoded secret once a device shares it.
    async fn request(&self, name: &str, device_ids: &[String]) -> Result<String, VerificationError>;
}

/// Validates and caches cross-signing private keys.
#[async_trait]
pub trait CrossSigningCache: Send + Sync {
    /// Idempotent; rejects keys that do not belong to the user's identity.
    async fn store_private_key(
        &self,
        user_id: &str,
        key_type: CrossSigningKeyType,
        private_key: Vec<u8>,
    ) -> Result<(), VerificationError>;
}

/// Publishes cross-signatures for freshly verified devices.
#[async_trait]
pub trait SignatureUploader: Send + Sync {
    /// Fails with `KeySignatureUpload` carrying the partial result.
    async fn upload_signatures(
        &self,
        user_id: &str,
        device_ids: &[String],
    ) -> Result<(), VerificationError>;
}

/// The verification request that owns a transaction.
pub trait VerificationRequest: Send + Sync {
    /// Called once when the transaction completes successfully.
    fn on_verifier_finished(&self);

    /// An already-received event of this type from the other party, if any.
    fn event_from_other_party(&self, _event_type: &str) -> Option<VerificationEvent> {
        None
    }
}
