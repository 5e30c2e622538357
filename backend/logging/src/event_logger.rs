//! Verification Audit Logger
//!
//! Lifecycle events of verification transactions, serialized through the
//! `verification_audit` tracing target so they land in the NDJSON file log.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::redact::redact_sensitive_data;

/// Target used for audit records; filter on it to split them out.
pub const AUDIT_TARGET: &str = "verification_audit";

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    Started {
        user_id: String,
        device_id: String,
        initiated_by_me: bool,
    },
    EventAccepted {
        event_type: String,
    },
    Cancelled {
        reason: String,
        notified_remote: bool,
    },
    Done,
    KeyFetch {
        outcome: String,
    },
}

#[derive(Debug, Serialize)]
pub struct AuditLogEntry {
    pub txn_id: String,
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
}

pub struct AuditLogger;

impl AuditLogger {
    /// Build the entry for a lifecycle event, redacting free text.
    pub fn entry(txn_id: &str, mut event: AuditEvent) -> AuditLogEntry {
        match &mut event {
            AuditEvent::Cancelled { reason, .. } => {
                *reason = redact_sensitive_data(reason);
            }
            AuditEvent::KeyFetch { outcome } => {
                *outcome = redact_sensitive_data(outcome);
            }
            AuditEvent::Started { .. } | AuditEvent::EventAccepted { .. } | AuditEvent::Done => {}
        }

        AuditLogEntry {
            txn_id: txn_id.into(),
            timestamp: Utc::now(),
            event,
        }
    }

    /// Record a transaction lifecycle event.
    pub fn log_event(txn_id: &str, event: AuditEvent) {
        let entry = Self::entry(txn_id, event);
        let record = serde_json::to_string(&entry).unwrap_or_else(|_| format!("{entry:?}"));
        info!(target: AUDIT_TARGET, txn_id = %entry.txn_id, record = %record, "Verification audit event");
    }
}
