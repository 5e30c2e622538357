//! Verification transaction state machine.
//!
//! A transaction is a cheap, cloneable handle. Its mutable state sits behind
//! one short-lived lock that is never held across an await, so every
//! transition (arm a waiter, resolve it, go terminal) is a single step.
//! Inbound events must be delivered serially per transaction, from within a
//! Tokio runtime.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crossverify_core::{
    CancelCode, CancelContent, KeyInfo, VerificationChannel, VerificationError,
    VerificationEvent, VerificationRequest, CANCEL_EVENT_TYPE, UNKNOWN_REASON,
};
use logging::{AuditEvent, AuditLogger};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::batch::{self, KeyVerifier};
use crate::context::{CryptoContext, TransactionOptions};
use crate::key_fetch;
use crate::method::VerificationMethod;
use crate::timer::TransactionTimer;
use crate::waiter::WaiterSlot;

const NOTIFICATION_CAPACITY: usize = 16;

/// What ended a transaction through [`VerificationTransaction::cancel`].
#[derive(Debug, Clone)]
pub enum CancelCause {
    Error(VerificationError),
    /// A protocol event; a cancel event from the party being verified is
    /// never echoed back.
    Event(VerificationEvent),
}

impl From<VerificationError> for CancelCause {
    fn from(error: VerificationError) -> Self {
        CancelCause::Error(error)
    }
}

impl From<VerificationEvent> for CancelCause {
    fn from(event: VerificationEvent) -> Self {
        CancelCause::Event(event)
    }
}

impl From<CancelContent> for CancelCause {
    fn from(content: CancelContent) -> Self {
        CancelCause::Event(content.into_event())
    }
}

/// Notifications observable without calling `verify()`.
#[derive(Debug, Clone)]
pub enum TransactionEvent {
    Cancelled(VerificationError),
    Done,
}

#[derive(Debug, Clone, Default)]
enum Phase {
    #[default]
    Pending,
    Done,
    Cancelled(VerificationError),
}

impl Phase {
    fn is_terminal(&self) -> bool {
        !matches!(self, Phase::Pending)
    }
}

#[derive(Debug, Default)]
struct State {
    phase: Phase,
    waiter: WaiterSlot,
    started: bool,
    start_event: Option<VerificationEvent>,
}

type Outcome = Option<Result<(), VerificationError>>;

struct Inner {
    id: String,
    user_id: String,
    device_id: Option<String>,
    ctx: CryptoContext,
    options: TransactionOptions,
    channel: Arc<dyn VerificationChannel>,
    request: Option<Arc<dyn VerificationRequest>>,
    method: Option<Arc<dyn VerificationMethod>>,
    state: Mutex<State>,
    timer: TransactionTimer,
    outcome: watch::Sender<Outcome>,
    notifications: broadcast::Sender<TransactionEvent>,
    key_fetch: Mutex<Option<JoinHandle<()>>>,
}

/// One run of the verification protocol with a remote device.
#[derive(Clone)]
pub struct VerificationTransaction {
    inner: Arc<Inner>,
}

/// Builder for [`VerificationTransaction`].
pub struct TransactionBuilder {
    channel: Arc<dyn VerificationChannel>,
    ctx: CryptoContext,
    user_id: String,
    device_id: Option<String>,
    start_event: Option<VerificationEvent>,
    request: Option<Arc<dyn VerificationRequest>>,
    method: Option<Arc<dyn VerificationMethod>>,
    options: TransactionOptions,
}

impl TransactionBuilder {
    pub fn device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn start_event(mut self, event: VerificationEvent) -> Self {
        self.start_event = Some(event);
        self
    }

    pub fn request(mut self, request: Arc<dyn VerificationRequest>) -> Self {
        self.request = Some(request);
        self
    }

    pub fn method(mut self, method: Arc<dyn VerificationMethod>) -> Self {
        self.method = Some(method);
        self
    }

    pub fn options(mut self, options: TransactionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> VerificationTransaction {
        let (outcome, _) = watch::channel(None);
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        VerificationTransaction {
            inner: Arc::new(Inner {
                id: Uuid::new_v4().to_string(),
                user_id: self.user_id,
                device_id: self.device_id,
                ctx: self.ctx,
                options: self.options,
                channel: self.channel,
                request: self.request,
                method: self.method,
                state: Mutex::new(State {
                    start_event: self.start_event,
                    ..State::default()
                }),
                timer: TransactionTimer::new(),
                outcome,
                notifications,
                key_fetch: Mutex::new(None),
            }),
        }
    }
}

impl VerificationTransaction {
    pub fn builder(
        channel: Arc<dyn VerificationChannel>,
        ctx: CryptoContext,
        user_id: impl Into<String>,
    ) -> TransactionBuilder {
        TransactionBuilder {
            channel,
            ctx,
            user_id: user_id.into(),
            device_id: None,
            start_event: None,
            request: None,
            method: None,
            options: TransactionOptions::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// User being verified.
    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    /// Device being verified, when known.
    pub fn device_id(&self) -> Option<&str> {
        self.inner.device_id.as_deref()
    }

    pub fn context(&self) -> &CryptoContext {
        &self.inner.ctx
    }

    pub fn start_event(&self) -> Option<VerificationEvent> {
        self.state().start_event.clone()
    }

    /// True when no start event exists yet (we are expected to send it), or
    /// when the start event came from this very device.
    pub fn initiated_by_me(&self) -> bool {
        let local = &self.inner.ctx.local;
        match &self.state().start_event {
            None => true,
            Some(event) => {
                event.sender.as_deref() == Some(local.user_id.as_str())
                    && event.from_device() == Some(local.device_id.as_str())
            }
        }
    }

    pub fn is_started(&self) -> bool {
        self.state().started
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state().phase, Phase::Done)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.state().phase, Phase::Cancelled(_))
    }

    pub fn cancellation_error(&self) -> Option<VerificationError> {
        match &self.state().phase {
            Phase::Cancelled(error) => Some(error.clone()),
            _ => None,
        }
    }

    pub fn expected_event(&self) -> Option<String> {
        self.state().waiter.expected().map(str::to_string)
    }

    /// Whether a flow is live, i.e. suspended on an expected event.
    ///
    /// Events arriving while no flow is live are treated as history being
    /// replayed during resynchronization and ignored; events that miss the
    /// expectation of a live flow are protocol violations.
    pub fn is_live(&self) -> bool {
        self.state().waiter.is_awaiting()
    }

    /// Settled outcome, if the transaction has ended.
    pub fn outcome(&self) -> Option<Result<(), VerificationError>> {
        self.inner.outcome.borrow().clone()
    }

    /// Subscribe to cancellation and completion notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<TransactionEvent> {
        self.inner.notifications.subscribe()
    }

    /// Send a protocol event to the remote party.
    pub async fn send(
        &self,
        event_type: &str,
        content: serde_json::Value,
    ) -> Result<(), VerificationError> {
        self.inner.channel.send(event_type, content).await
    }

    /// Start the verification method once and wait for the single outcome.
    ///
    /// Every call observes the same outcome; the method never runs twice. A
    /// transaction cancelled before this is called resolves to that
    /// cancellation straight away.
    pub async fn verify(&self) -> Result<(), VerificationError> {
        self.start();
        let mut rx = self.inner.outcome.subscribe();
        let settled = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|e| VerificationError::ChannelClosed(e.to_string()))?
            .clone();
        settled.unwrap_or_else(|| {
            Err(VerificationError::ChannelClosed(
                "outcome was never settled".to_string(),
            ))
        })
    }

    fn start(&self) {
        let method = {
            let mut state = self.state();
            if state.started || state.phase.is_terminal() {
                return;
            }
            let Some(method) = self.inner.method.clone() else {
                return;
            };
            state.started = true;
            method
        };

        info!(
            txn_id = %self.inner.id,
            user_id = %self.inner.user_id,
            device_id = ?self.inner.device_id,
            method = method.name(),
            "Starting verification"
        );
        AuditLogger::log_event(
            &self.inner.id,
            AuditEvent::Started {
                user_id: self.inner.user_id.clone(),
                device_id: self.inner.device_id.clone().unwrap_or_default(),
                initiated_by_me: self.initiated_by_me(),
            },
        );
        self.reset_timer();

        let txn = self.clone();
        tokio::spawn(async move {
            match method.run(&txn).await {
                Ok(()) => txn.done(),
                Err(e) => txn.cancel(e),
            }
        });
    }

    fn reset_timer(&self) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        self.inner.timer.arm(self.inner.options.timeout, move || {
            let Some(inner) = weak.upgrade() else { return };
            let txn = VerificationTransaction { inner };
            if !txn.state().phase.is_terminal() {
                info!(txn_id = %txn.inner.id, "Triggering verification timeout");
                txn.cancel(VerificationError::Timeout);
            }
        });
    }

    /// Suspend until the remote party sends an event of `event_type`.
    ///
    /// Fails straight away on a terminal transaction, and when another
    /// wait is already outstanding.
    pub async fn wait_for_event(
        &self,
        event_type: &str,
    ) -> Result<VerificationEvent, VerificationError> {
        self.check_not_terminal()?;

        if let Some(request) = &self.inner.request {
            if let Some(event) = request.event_from_other_party(event_type) {
                debug!(txn_id = %self.inner.id, event_type, "Using already received event");
                return Ok(event);
            }
        }

        let rx = {
            let mut state = self.state();
            if let Some(error) = Self::terminal_error(&state.phase) {
                return Err(error);
            }
            state.waiter.arm(event_type)?
        };
        trace!(txn_id = %self.inner.id, event_type, "Waiting for event");

        rx.await
            .map_err(|_| VerificationError::ChannelClosed("event waiter dropped".to_string()))?
    }

    fn check_not_terminal(&self) -> Result<(), VerificationError> {
        match Self::terminal_error(&self.state().phase) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn terminal_error(phase: &Phase) -> Option<VerificationError> {
        match phase {
            Phase::Pending => None,
            Phase::Done => Some(VerificationError::AlreadyDone),
            Phase::Cancelled(error) => Some(error.clone()),
        }
    }

    /// Route one inbound event. Never suspends.
    pub fn handle_event(&self, event: VerificationEvent) {
        let mut state = self.state();
        if state.phase.is_terminal() {
            trace!(txn_id = %self.inner.id, event_type = %event.event_type, "Ignoring event on finished transaction");
            return;
        }

        if state.waiter.expected() == Some(event.event_type.as_str()) {
            if event.is_done() {
                // Informational acknowledgement; the waiter stays armed.
                debug!(txn_id = %self.inner.id, "Received verification done acknowledgement");
                return;
            }
            let waiter = state.waiter.take();
            drop(state);
            self.reset_timer();
            AuditLogger::log_event(
                &self.inner.id,
                AuditEvent::EventAccepted {
                    event_type: event.event_type.clone(),
                },
            );
            if let Some(waiter) = waiter {
                waiter.resolve(event);
            }
            return;
        }

        if event.is_cancel() {
            drop(state);
            let content = event.cancel_content();
            info!(
                txn_id = %self.inner.id,
                code = %content.code,
                reason = %content.reason,
                "Other side cancelled verification"
            );
            self.finish_cancelled(
                VerificationError::RemoteCancelled {
                    code: content.code,
                    reason: content.reason,
                },
                None,
            );
            return;
        }

        if let Some(expected) = state.waiter.expected() {
            let error = VerificationError::ProtocolViolation {
                expected: expected.to_string(),
                received: event.event_type.clone(),
            };
            let waiter = state.waiter.take();
            drop(state);
            warn!(txn_id = %self.inner.id, error = %error, "Protocol violation");
            if let Some(waiter) = waiter {
                waiter.reject(error.clone());
            }
            self.cancel(error);
            return;
        }

        trace!(txn_id = %self.inner.id, event_type = %event.event_type, "No live flow; ignoring replayed event");
    }

    /// Hand the transaction a replacement start event.
    ///
    /// Ignored unless the method allows switching. A live flow is told to
    /// restart through a `StartEventSwitched` error; otherwise the stored
    /// start event is replaced.
    pub fn switch_start_event(&self, event: VerificationEvent) {
        let allowed = self
            .inner
            .method
            .as_ref()
            .is_some_and(|m| m.can_switch_start_event(&event));
        if !allowed {
            return;
        }

        let mut state = self.state();
        let restarting = state.waiter.is_awaiting();
        info!(txn_id = %self.inner.id, restarting, "Switching verification start event");
        match state.waiter.take() {
            Some(waiter) => {
                drop(state);
                waiter.reject(VerificationError::StartEventSwitched(Box::new(event)));
            }
            None => state.start_event = Some(event),
        }
    }

    /// Take `event` as the start event. Methods call this when restarting
    /// after a `StartEventSwitched` rejection, so that `initiated_by_me`
    /// and `start_event` describe the flow that is now running.
    pub fn adopt_start_event(&self, event: VerificationEvent) {
        let mut state = self.state();
        if state.phase.is_terminal() {
            return;
        }
        debug!(txn_id = %self.inner.id, event_type = %event.event_type, "Adopting start event");
        state.start_event = Some(event);
    }

    /// Complete the transaction successfully. Idempotent.
    pub fn done(&self) {
        self.inner.timer.stop();
        let waiter = {
            let mut state = self.state();
            if state.phase.is_terminal() {
                return;
            }
            state.phase = Phase::Done;
            state.waiter.take()
        };
        if let Some(waiter) = waiter {
            waiter.reject(VerificationError::AlreadyDone);
        }

        if let Some(request) = &self.inner.request {
            request.on_verifier_finished();
        }
        self.settle(Ok(()));
        let _ = self.inner.notifications.send(TransactionEvent::Done);
        info!(txn_id = %self.inner.id, user_id = %self.inner.user_id, "Verification done");
        AuditLogger::log_event(&self.inner.id, AuditEvent::Done);

        if self.inner.options.request_cross_signing_keys
            && self.inner.user_id == self.inner.ctx.local.user_id
        {
            let handle = key_fetch::spawn_key_fetch(
                self.inner.ctx.clone(),
                self.inner.id.clone(),
                self.inner.user_id.clone(),
                self.inner.device_id.iter().cloned().collect(),
                self.inner.options.key_fetch_timeout,
            );
            *self
                .inner
                .key_fetch
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        }
    }

    /// Wait for the detached key fetch, if one was started.
    pub async fn key_fetch_finished(&self) {
        let handle = self
            .inner
            .key_fetch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Cancel the transaction. Idempotent.
    ///
    /// Unless the cause came from the party being verified, the remote
    /// device is sent an `m.key.verification.cancel`.
    pub fn cancel(&self, cause: impl Into<CancelCause>) {
        let cause = cause.into();
        let error = self.cause_error(&cause);
        let outbound = self.outbound_cancel(&cause);
        self.finish_cancelled(error, outbound);
    }

    fn cause_error(&self, cause: &CancelCause) -> VerificationError {
        match cause {
            CancelCause::Error(error) => error.clone(),
            CancelCause::Event(event) => {
                let content = if event.is_cancel() {
                    event.cancel_content()
                } else {
                    CancelContent::new(
                        CancelCode::Unknown,
                        event.body().unwrap_or(UNKNOWN_REASON),
                    )
                };
                if event.sender.as_deref() == Some(self.inner.user_id.as_str()) {
                    VerificationError::RemoteCancelled {
                        code: content.code,
                        reason: content.reason,
                    }
                } else {
                    VerificationError::Cancelled {
                        code: content.code,
                        reason: content.reason,
                    }
                }
            }
        }
    }

    fn outbound_cancel(&self, cause: &CancelCause) -> Option<CancelContent> {
        if self.inner.user_id.is_empty() || self.inner.device_id.is_none() {
            return None;
        }
        match cause {
            CancelCause::Error(VerificationError::Timeout) => Some(CancelContent::timeout()),
            CancelCause::Event(event) => {
                if event.sender.as_deref() == Some(self.inner.user_id.as_str()) {
                    return None;
                }
                if event.is_cancel() {
                    Some(event.cancel_content())
                } else {
                    Some(CancelContent::new(
                        CancelCode::Unknown,
                        event.body().unwrap_or(UNKNOWN_REASON),
                    ))
                }
            }
            CancelCause::Error(error) => {
                Some(CancelContent::new(CancelCode::Unknown, error.to_string()))
            }
        }
    }

    fn finish_cancelled(&self, error: VerificationError, outbound: Option<CancelContent>) {
        self.inner.timer.stop();
        let waiter = {
            let mut state = self.state();
            if state.phase.is_terminal() {
                return;
            }
            state.phase = Phase::Cancelled(error.clone());
            state.waiter.take()
        };

        let notified_remote = outbound.is_some();
        if let Some(content) = outbound {
            let channel = self.inner.channel.clone();
            let txn_id = self.inner.id.clone();
            tokio::spawn(async move {
                if let Err(e) = channel.send(CANCEL_EVENT_TYPE, content.to_value()).await {
                    warn!(txn_id = %txn_id, error = %e, "Failed to send verification cancellation");
                }
            });
        }

        if let Some(waiter) = waiter {
            waiter.reject(error.clone());
        }
        self.settle(Err(error.clone()));
        let _ = self
            .inner
            .notifications
            .send(TransactionEvent::Cancelled(error.clone()));

        info!(txn_id = %self.inner.id, error = %error, notified_remote, "Verification cancelled");
        AuditLogger::log_event(
            &self.inner.id,
            AuditEvent::Cancelled {
                reason: error.to_string(),
                notified_remote,
            },
        );
    }

    fn settle(&self, result: Result<(), VerificationError>) {
        self.inner.outcome.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(result);
            true
        });
    }

    /// Verify `keys` of `user_id` with `verifier`, then mark the owning
    /// devices verified. See [`batch::verify_keys`].
    pub async fn verify_keys(
        &self,
        user_id: &str,
        keys: &BTreeMap<String, KeyInfo>,
        verifier: &dyn KeyVerifier,
    ) -> Result<Vec<String>, VerificationError> {
        batch::verify_keys(&self.inner.ctx, user_id, keys, verifier).await
    }
}

impl fmt::Debug for VerificationTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationTransaction")
            .field("id", &self.inner.id)
            .field("user_id", &self.inner.user_id)
            .field("device_id", &self.inner.device_id)
            .finish_non_exhaustive()
    }
}
