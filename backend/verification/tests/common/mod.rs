#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use crossverify_core::{
    CrossSigningInfo, LocalIdentity, MemoryChannel, MemoryDeviceStore, SecretStorage,
    VerificationError, VerificationEvent, VerificationRequest,
};
use crossverify_verification::{
    CryptoContext, TransactionOptions, VerificationMethod, VerificationTransaction,
};
use serde_json::json;
use tokio::sync::mpsc;

pub const ALICE: &str = "@alice:example.org";
pub const ALICE1: &str = "ALICE1";
pub const ALICE2: &str = "ALICE2";
pub const BOB: &str = "@bob:example.org";
pub const BOB1: &str = "BOBDEV";

pub const KEY_TYPE: &str = "m.key.verification.key";
pub const MAC_TYPE: &str = "m.key.verification.mac";
pub const ACCEPT_TYPE: &str = "m.key.verification.accept";
pub const START_TYPE: &str = "m.key.verification.start";

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Secret storage answering from a fixed table, optionally after a delay.
#[derive(Default)]
pub struct ScriptedSecrets {
    secrets: HashMap<String, String>,
    delay: Option<Duration>,
    pub requests: Mutex<Vec<(String, Vec<String>)>>,
}

impl ScriptedSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, name: &str, encoded: &str) -> Self {
        self.secrets.insert(name.to_string(), encoded.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requested(&self) -> Vec<(String, Vec<String>)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SecretStorage for ScriptedSecrets {
    async fn request(&self, name: &str, device_ids: &[String]) -> Result<String, VerificationError> {
        self.requests
            .lock()
            .unwrap()
            .push((name.to_string(), device_ids.to_vec()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.secrets
            .get(name)
            .cloned()
            .ok_or_else(|| VerificationError::SecretStorage(format!("{name} not shared")))
    }
}

#[derive(Default)]
pub struct RecordingRequest {
    pub finished: AtomicUsize,
    pub buffered: Mutex<HashMap<String, VerificationEvent>>,
}

impl RecordingRequest {
    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn buffer(&self, event: VerificationEvent) {
        self.buffered
            .lock()
            .unwrap()
            .insert(event.event_type.clone(), event);
    }
}

impl VerificationRequest for RecordingRequest {
    fn on_verifier_finished(&self) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }

    fn event_from_other_party(&self, event_type: &str) -> Option<VerificationEvent> {
        self.buffered.lock().unwrap().get(event_type).cloned()
    }
}

// ---------------------------------------------------------------------------
// Methods
// ---------------------------------------------------------------------------

/// Waits for each listed event type in turn.
pub struct ScriptMethod {
    steps: Vec<String>,
    pub runs: AtomicUsize,
    pub last_error: Mutex<Option<VerificationError>>,
}

impl ScriptMethod {
    pub fn new(steps: &[&str]) -> Self {
        Self {
            steps: steps.iter().map(|s| s.to_string()).collect(),
            runs: AtomicUsize::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> Option<VerificationError> {
        self.last_error.lock().unwrap().clone()
    }

    /// The error the flow ended with, once its task has observed it.
    pub async fn settled_error(&self) -> VerificationError {
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Some(e) = self.last_error() {
                    return e;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("flow never observed an error")
    }
}

#[async_trait]
impl VerificationMethod for ScriptMethod {
    fn name(&self) -> &str {
        "test.script"
    }

    async fn run(&self, txn: &VerificationTransaction) -> Result<(), VerificationError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        for step in &self.steps {
            if let Err(e) = txn.wait_for_event(step).await {
                *self.last_error.lock().unwrap() = Some(e.clone());
                return Err(e);
            }
        }
        Ok(())
    }
}

/// Restarts whenever the start event is switched under it.
#[derive(Default)]
pub struct SwitchingMethod {
    pub restarts: AtomicUsize,
    pub switched_to: Mutex<Option<VerificationEvent>>,
}

#[async_trait]
impl VerificationMethod for SwitchingMethod {
    fn name(&self) -> &str {
        "test.switching"
    }

    fn can_switch_start_event(&self, _event: &VerificationEvent) -> bool {
        true
    }

    async fn run(&self, txn: &VerificationTransaction) -> Result<(), VerificationError> {
        loop {
            match txn.wait_for_event(ACCEPT_TYPE).await {
                Err(VerificationError::StartEventSwitched(event)) => {
                    self.restarts.fetch_add(1, Ordering::SeqCst);
                    *self.switched_to.lock().unwrap() = Some((*event).clone());
                    txn.adopt_start_event(*event);
                }
                other => return other.map(|_| ()),
            }
        }
    }
}

pub struct FailingMethod;

#[async_trait]
impl VerificationMethod for FailingMethod {
    fn name(&self) -> &str {
        "test.failing"
    }

    async fn run(&self, _txn: &VerificationTransaction) -> Result<(), VerificationError> {
        Err(VerificationError::Method("boom".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub store: Arc<MemoryDeviceStore>,
    pub secrets: Arc<ScriptedSecrets>,
    pub request: Arc<RecordingRequest>,
    pub ctx: CryptoContext,
    pub channel: Arc<MemoryChannel>,
    /// Everything the transaction sent to the remote party.
    pub sent: mpsc::Receiver<VerificationEvent>,
    _inbound: mpsc::Receiver<VerificationEvent>,
}

impl Harness {
    pub fn new(secrets: ScriptedSecrets) -> Self {
        let pair = MemoryChannel::pair(
            LocalIdentity::new(ALICE, ALICE1),
            LocalIdentity::new(BOB, BOB1),
        );
        let store = Arc::new(MemoryDeviceStore::new());
        let secrets = Arc::new(secrets);
        let ctx = CryptoContext::new(
            LocalIdentity::new(ALICE, ALICE1),
            store.clone(),
            secrets.clone(),
            store.clone(),
        );
        Self {
            store,
            secrets,
            request: Arc::new(RecordingRequest::default()),
            ctx,
            channel: Arc::new(pair.first),
            sent: pair.second_rx,
            _inbound: pair.first_rx,
        }
    }

    pub fn txn(
        &self,
        user_id: &str,
        device_id: &str,
        method: Option<Arc<dyn VerificationMethod>>,
        options: TransactionOptions,
    ) -> VerificationTransaction {
        let mut builder = VerificationTransaction::builder(
            self.channel.clone(),
            self.ctx.clone(),
            user_id,
        )
        .device_id(device_id)
        .request(self.request.clone())
        .options(options);
        if let Some(method) = method {
            builder = builder.method(method);
        }
        builder.build()
    }

    pub async fn add_alice_cross_signing(&self) {
        let mut info = CrossSigningInfo::new(ALICE, "ALICEMASTER");
        info.self_signing_key = Some("ALICESSK".into());
        info.user_signing_key = Some("ALICEUSK".into());
        self.store.add_cross_signing(info).await;
    }

    /// Next event sent to the remote party, if one shows up soon.
    pub async fn next_sent(&mut self) -> Option<VerificationEvent> {
        tokio::time::timeout(Duration::from_secs(1), self.sent.recv())
            .await
            .ok()
            .flatten()
    }

    /// Asserts nothing further is sent to the remote party.
    pub async fn assert_nothing_sent(&mut self) {
        let next = tokio::time::timeout(Duration::from_millis(50), self.sent.recv()).await;
        assert!(next.is_err(), "unexpected outbound event: {next:?}");
    }
}

pub fn from_bob(event_type: &str, content: serde_json::Value) -> VerificationEvent {
    VerificationEvent::new(event_type, content).with_sender(BOB)
}

pub fn from_alice(event_type: &str, content: serde_json::Value) -> VerificationEvent {
    VerificationEvent::new(event_type, content).with_sender(ALICE)
}

pub fn empty() -> serde_json::Value {
    json!({})
}

/// Yield until the transaction's flow is suspended on a waiter.
pub async fn wait_until_live(txn: &VerificationTransaction) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !txn.is_live() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("flow never reached wait_for_event");
}
