use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Cancels a verification; content carries `code` and `reason`.
pub const CANCEL_EVENT_TYPE: &str = "m.key.verification.cancel";

/// Acknowledges a finished verification; informational only.
pub const DONE_EVENT_TYPE: &str = "m.key.verification.done";

/// A protocol event exchanged with the remote party.
///
/// Only the type tag is interpreted by the transaction; `content` is opaque
/// apart from the cancellation fields and `from_device`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default)]
    pub content: Value,
}

impl VerificationEvent {
    pub fn new(event_type: impl Into<String>, content: Value) -> Self {
        Self {
            event_type: event_type.into(),
            sender: None,
            content,
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn is_cancel(&self) -> bool {
        self.event_type == CANCEL_EVENT_TYPE
    }

    pub fn is_done(&self) -> bool {
        self.event_type == DONE_EVENT_TYPE
    }

    pub fn from_device(&self) -> Option<&str> {
        self.content.get("from_device").and_then(Value::as_str)
    }

    pub fn body(&self) -> Option<&str> {
        self.content.get("body").and_then(Value::as_str)
    }

    /// Best-effort cancellation fields: code falls back to `m.unknown`,
    /// reason falls back to `body`, then to "Unknown reason".
    pub fn cancel_content(&self) -> CancelContent {
        let code = self
            .content
            .get("code")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
            .unwrap_or(CancelCode::Unknown.as_str());
        let reason = self
            .content
            .get("reason")
            .and_then(Value::as_str)
            .filter(|r| !r.is_empty())
            .or_else(|| self.body())
            .unwrap_or(UNKNOWN_REASON);
        CancelContent {
            code: code.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub const UNKNOWN_REASON: &str = "Unknown reason";

/// Standard cancellation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelCode {
    User,
    Timeout,
    UnknownTransaction,
    UnknownMethod,
    UnexpectedMessage,
    KeyMismatch,
    UserMismatch,
    InvalidMessage,
    Accepted,
    Unknown,
}

impl CancelCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelCode::User => "m.user",
            CancelCode::Timeout => "m.timeout",
            CancelCode::UnknownTransaction => "m.unknown_transaction",
            CancelCode::UnknownMethod => "m.unknown_method",
            CancelCode::UnexpectedMessage => "m.unexpected_message",
            CancelCode::KeyMismatch => "m.key_mismatch",
            CancelCode::UserMismatch => "m.user_mismatch",
            CancelCode::InvalidMessage => "m.invalid_message",
            CancelCode::Accepted => "m.accepted",
            CancelCode::Unknown => "m.unknown",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        let parsed = match code {
            "m.user" => CancelCode::User,
            "m.timeout" => CancelCode::Timeout,
            "m.unknown_transaction" => CancelCode::UnknownTransaction,
            "m.unknown_method" => CancelCode::UnknownMethod,
            "m.unexpected_message" => CancelCode::UnexpectedMessage,
            "m.key_mismatch" => CancelCode::KeyMismatch,
            "m.user_mismatch" => CancelCode::UserMismatch,
            "m.invalid_message" => CancelCode::InvalidMessage,
            "m.accepted" => CancelCode::Accepted,
            "m.unknown" => CancelCode::Unknown,
            _ => return None,
        };
        Some(parsed)
    }
}

impl std::fmt::Display for CancelCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of an `m.key.verification.cancel` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelContent {
    pub code: String,
    pub reason: String,
}

impl CancelContent {
    pub fn new(code: CancelCode, reason: impl Into<String>) -> Self {
        Self {
            code: code.as_str().to_string(),
            reason: reason.into(),
        }
    }

    pub fn user_cancelled() -> Self {
        Self::new(CancelCode::User, "Cancelled by user")
    }

    pub fn timeout() -> Self {
        Self::new(CancelCode::Timeout, "Verification timed out")
    }

    pub fn unknown_method() -> Self {
        Self::new(CancelCode::UnknownMethod, "Unknown method")
    }

    pub fn unexpected_message() -> Self {
        Self::new(CancelCode::UnexpectedMessage, "Unexpected message")
    }

    pub fn key_mismatch() -> Self {
        Self::new(CancelCode::KeyMismatch, "Key mismatch")
    }

    pub fn user_mismatch() -> Self {
        Self::new(CancelCode::UserMismatch, "User mismatch")
    }

    pub fn invalid_message() -> Self {
        Self::new(CancelCode::InvalidMessage, "Invalid message")
    }

    pub fn to_value(&self) -> Value {
        json!({ "code": self.code, "reason": self.reason })
    }

    /// Wraps the content in a locally-originated cancel event.
    pub fn into_event(self) -> VerificationEvent {
        let content = self.to_value();
        VerificationEvent::new(CANCEL_EVENT_TYPE, content)
    }
}
