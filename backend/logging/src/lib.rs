//! Telemetry and structured logging components for crossverify.
//!
//! Handles log redaction, JSON output generation, file rotation, and
//! verification audit logging.

pub mod event_logger;
pub mod logger;
pub mod redact;

pub use event_logger::{AuditEvent, AuditLogEntry, AuditLogger, AUDIT_TARGET};
pub use logger::{init_console_logger, init_logger, LOG_FILE_PREFIX};
pub use redact::redact_sensitive_data;
