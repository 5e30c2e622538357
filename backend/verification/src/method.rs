use async_trait::async_trait;
use crossverify_core::{VerificationError, VerificationEvent};

use crate::transaction::VerificationTransaction;

/// A concrete verification method (SAS, QR, ...) plugged into a transaction.
///
/// `run` drives the exchange through [`VerificationTransaction::send`] and
/// [`VerificationTransaction::wait_for_event`]. Returning `Ok` completes the
/// transaction; returning `Err` cancels it with that error as the cause.
#[async_trait]
pub trait VerificationMethod: Send + Sync + 'static {
    /// Method name for logging, e.g. `m.sas.v1`.
    fn name(&self) -> &str;

    /// Whether this method may restart against a replacement start event.
    fn can_switch_start_event(&self, _event: &VerificationEvent) -> bool {
        false
    }

    async fn run(&self, txn: &VerificationTransaction) -> Result<(), VerificationError>;
}
