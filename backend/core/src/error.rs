use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::VerificationEvent;

/// Why a persisted client store was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvalidStoreReason {
    /// The store was written with a different lazy-loading setting.
    ToggledLazyLoading,
}

impl InvalidStoreReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidStoreReason::ToggledLazyLoading => "TOGGLED_LAZY_LOADING",
        }
    }
}

impl fmt::Display for InvalidStoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a persisted crypto store was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvalidCryptoStoreReason {
    /// The store schema is newer than this build understands.
    TooNew,
}

impl InvalidCryptoStoreReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidCryptoStoreReason::TooNew => "TOO_NEW",
        }
    }
}

impl fmt::Display for InvalidCryptoStoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error taxonomy for verification transactions and the stores behind them.
///
/// Cloneable so a single terminal outcome can be observed by every caller of
/// `verify()` and by every cancellation subscriber.
#[derive(Debug, Clone, Error)]
pub enum VerificationError {
    #[error("Store is invalid because {reason}, please stop the client, delete all data and start the client again")]
    InvalidStore {
        reason: InvalidStoreReason,
        value: serde_json::Value,
    },

    #[error("Crypto store is invalid because {reason}, please stop the client, delete all data and start the client again")]
    InvalidCryptoStore { reason: InvalidCryptoStoreReason },

    #[error("{message}")]
    KeySignatureUpload {
        message: String,
        value: serde_json::Value,
    },

    #[error("Verification timed out")]
    Timeout,

    #[error("Unexpected message: expecting {expected} but got {received}")]
    ProtocolViolation { expected: String, received: String },

    #[error("Other side cancelled verification because {reason} ({code})")]
    RemoteCancelled { code: String, reason: String },

    #[error("Verification cancelled because {reason} ({code})")]
    Cancelled { code: String, reason: String },

    /// The in-flight method should restart against the carried start event.
    #[error("Verification start event switched to {}", .0.event_type)]
    StartEventSwitched(Box<VerificationEvent>),

    #[error("Verification is already done")]
    AlreadyDone,

    #[error("Already waiting for {0}")]
    WaiterBusy(String),

    #[error("No devices could be verified")]
    NoDevicesVerified,

    #[error("channel closed: {0}")]
    ChannelClosed(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("secret storage error: {0}")]
    SecretStorage(String),

    #[error("cross-signing error: {0}")]
    CrossSigning(String),

    #[error("verification method failed: {0}")]
    Method(String),
}

impl VerificationError {
    pub fn invalid_store(reason: InvalidStoreReason, value: impl Into<serde_json::Value>) -> Self {
        VerificationError::InvalidStore {
            reason,
            value: value.into(),
        }
    }

    pub fn key_signature_upload(
        message: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        VerificationError::KeySignatureUpload {
            message: message.into(),
            value: value.into(),
        }
    }

    /// True for the watchdog sentinel.
    pub fn is_timeout(&self) -> bool {
        matches!(self, VerificationError::Timeout)
    }

    /// True for the restart signal a method is expected to catch and retry on.
    pub fn is_start_event_switch(&self) -> bool {
        matches!(self, VerificationError::StartEventSwitched(_))
    }

    /// Store corruption errors; recovery is a full local reset by the caller.
    pub fn requires_reset(&self) -> bool {
        matches!(
            self,
            VerificationError::InvalidStore { .. } | VerificationError::InvalidCryptoStore { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_store_message_names_reason() {
        let err = VerificationError::invalid_store(InvalidStoreReason::ToggledLazyLoading, true);
        let msg = err.to_string();
        assert!(msg.starts_with("Store is invalid because TOGGLED_LAZY_LOADING"));
        assert!(err.requires_reset());
        match err {
            VerificationError::InvalidStore { value, .. } => assert_eq!(value, true),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn invalid_crypto_store_message_names_reason() {
        let err = VerificationError::InvalidCryptoStore {
            reason: InvalidCryptoStoreReason::TooNew,
        };
        assert!(err.to_string().contains("Crypto store is invalid because TOO_NEW"));
    }

    #[test]
    fn key_signature_upload_keeps_payload() {
        let err = VerificationError::key_signature_upload(
            "Key upload failed",
            serde_json::json!({"failures": {"@a:b": {"DEV": "M_INVALID_SIGNATURE"}}}),
        );
        assert_eq!(err.to_string(), "Key upload failed");
        let VerificationError::KeySignatureUpload { value, .. } = err else {
            panic!("wrong variant");
        };
        assert!(value["failures"]["@a:b"].is_object());
    }

    #[test]
    fn remote_cancel_embeds_reason_and_code() {
        let err = VerificationError::RemoteCancelled {
            code: "m.user".into(),
            reason: "rejected".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("rejected"));
        assert!(msg.contains("m.user"));
    }
}
