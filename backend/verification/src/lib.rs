//! `crossverify-verification`: interactive device verification.
//!
//! Provides:
//! - [`VerificationTransaction`]: the per-transaction state machine
//! - [`VerificationMethod`]: the hook concrete methods (SAS, QR) implement
//! - Single-slot event waiter and idle-timeout watchdog
//! - Post-verification cross-signing key fetch
//! - Batch key verification

pub mod batch;
pub mod context;
pub mod key_fetch;
pub mod method;
pub mod timer;
pub mod transaction;
mod waiter;

pub use batch::{verify_keys, KeyVerifier};
pub use context::{
    CryptoContext, TransactionOptions, DEFAULT_KEY_FETCH_TIMEOUT, DEFAULT_TRANSACTION_TIMEOUT,
};
pub use key_fetch::{fetch_cross_signing_keys, spawn_key_fetch, REQUESTED_KEYS};
pub use method::VerificationMethod;
pub use timer::TransactionTimer;
pub use transaction::{CancelCause, TransactionBuilder, TransactionEvent, VerificationTransaction};
