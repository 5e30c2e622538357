//! Single-slot event waiter.
//!
//! The slot pairs the expected event type with the continuation that
//! resumes the suspended flow, so clearing the expectation and resolving
//! the continuation is one move out of the slot.

use crossverify_core::{VerificationError, VerificationEvent};
use tokio::sync::oneshot;

pub(crate) type WaitResult = Result<VerificationEvent, VerificationError>;

/// A suspended `wait_for_event` call.
#[derive(Debug)]
pub(crate) struct PendingWait {
    expected: String,
    tx: oneshot::Sender<WaitResult>,
}

impl PendingWait {
    pub(crate) fn expected(&self) -> &str {
        &self.expected
    }

    pub(crate) fn resolve(self, event: VerificationEvent) {
        // The waiting flow may have been dropped; nothing to resume then.
        let _ = self.tx.send(Ok(event));
    }

    pub(crate) fn reject(self, error: VerificationError) {
        let _ = self.tx.send(Err(error));
    }
}

#[derive(Debug, Default)]
pub(crate) enum WaiterSlot {
    #[default]
    Idle,
    Awaiting(PendingWait),
}

impl WaiterSlot {
    /// Record an expectation and hand back the receiving half.
    ///
    /// A slot whose previous waiter was dropped counts as free.
    pub(crate) fn arm(
        &mut self,
        expected: &str,
    ) -> Result<oneshot::Receiver<WaitResult>, VerificationError> {
        if let WaiterSlot::Awaiting(pending) = self {
            if !pending.tx.is_closed() {
                return Err(VerificationError::WaiterBusy(pending.expected.clone()));
            }
        }
        let (tx, rx) = oneshot::channel();
        *self = WaiterSlot::Awaiting(PendingWait {
            expected: expected.to_string(),
            tx,
        });
        Ok(rx)
    }

    pub(crate) fn expected(&self) -> Option<&str> {
        match self {
            WaiterSlot::Idle => None,
            WaiterSlot::Awaiting(pending) => Some(pending.expected()),
        }
    }

    pub(crate) fn is_awaiting(&self) -> bool {
        matches!(self, WaiterSlot::Awaiting(_))
    }

    /// Clear the slot, returning the waiter that was in it.
    pub(crate) fn take(&mut self) -> Option<PendingWait> {
        match std::mem::take(self) {
            WaiterSlot::Idle => None,
            WaiterSlot::Awaiting(pending) => Some(pending),
        }
    }
}
