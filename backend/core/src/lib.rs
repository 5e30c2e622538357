pub mod channel;
pub mod error;
pub mod event;
pub mod store;
pub mod traits;
pub mod types;

pub use channel::{ChannelPair, MemoryChannel};
pub use error::{InvalidCryptoStoreReason, InvalidStoreReason, VerificationError};
pub use event::{
    CancelCode, CancelContent, VerificationEvent, CANCEL_EVENT_TYPE, DONE_EVENT_TYPE,
    UNKNOWN_REASON,
};
pub use store::{check_crypto_store_version, check_lazy_loading, MemoryDeviceStore};
pub use traits::{
    CrossSigningCache, DeviceStore, SecretStorage, SignatureUploader, VerificationChannel,
    VerificationRequest,
};
pub use types::{
    device_id_from_key_id, CrossSigningInfo, CrossSigningKeyType, DeviceInfo, KeyInfo,
    LocalIdentity,
};
