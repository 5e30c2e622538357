use std::sync::Arc;
use std::time::Duration;

use crossverify_core::{
    CrossSigningCache, DeviceStore, LocalIdentity, SecretStorage, SignatureUploader,
};

/// Default idle window before a stalled transaction is cancelled.
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Default bound on the post-verification cross-signing key fetch.
pub const DEFAULT_KEY_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Shared crypto collaborators of every transaction on this device.
#[derive(Clone)]
pub struct CryptoContext {
    pub local: LocalIdentity,
    pub devices: Arc<dyn DeviceStore>,
    pub secrets: Arc<dyn SecretStorage>,
    pub cross_signing: Arc<dyn CrossSigningCache>,
    pub uploader: Option<Arc<dyn SignatureUploader>>,
}

impl CryptoContext {
    pub fn new(
        local: LocalIdentity,
        devices: Arc<dyn DeviceStore>,
        secrets: Arc<dyn SecretStorage>,
        cross_signing: Arc<dyn CrossSigningCache>,
    ) -> Self {
        Self {
            local,
            devices,
            secrets,
            cross_signing,
            uploader: None,
        }
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn SignatureUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }
}

impl std::fmt::Debug for CryptoContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoContext")
            .field("local", &self.local)
            .field("uploader", &self.uploader.is_some())
            .finish_non_exhaustive()
    }
}

/// Per-transaction tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionOptions {
    pub timeout: Duration,
    pub key_fetch_timeout: Duration,
    /// Fetch cross-signing secrets after a successful self-verification.
    pub request_cross_signing_keys: bool,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TRANSACTION_TIMEOUT,
            key_fetch_timeout: DEFAULT_KEY_FETCH_TIMEOUT,
            request_cross_signing_keys: true,
        }
    }
}
