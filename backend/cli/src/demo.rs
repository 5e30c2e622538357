//! Loopback self-verification between two in-memory devices of one user.
//!
//! The initiator and the responder each own a transaction, a device store
//! and one end of a [`MemoryChannel`] pair. A pump task per side feeds the
//! events arriving from the other side into that side's transaction.
//!
//! The pump records an event in the request inbox and then routes it in two
//! steps, and a method reads the inbox and then arms its waiter in two steps.
//! Neither pair is atomic, so the demo only runs on a current-thread runtime,
//! where no await separates either pair.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use crossverify_core::{
    CancelCode, CrossSigningInfo, CrossSigningKeyType, DeviceInfo, KeyInfo, LocalIdentity,
    MemoryChannel, MemoryDeviceStore, SecretStorage, VerificationError, VerificationEvent,
    VerificationRequest, DONE_EVENT_TYPE,
};
use crossverify_verification::{
    CryptoContext, TransactionOptions, VerificationMethod, VerificationTransaction, REQUESTED_KEYS,
};
use serde_json::json;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

pub const RECIPROCATE_METHOD: &str = "m.reciprocate.v1";

const START_TYPE: &str = "m.key.verification.start";
const KEY_TYPE: &str = "m.key.verification.key";
const MAC_TYPE: &str = "m.key.verification.mac";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// Toy method: exchange device keys, then MAC the keys each side claims.
///
/// The initiator runs start → key → mac → done; the responder answers.
pub struct ReciprocateMethod {
    role: Role,
    device_key: String,
    /// `algorithm:id` → public key this side vouches for.
    own_keys: BTreeMap<String, String>,
}

impl ReciprocateMethod {
    pub fn new(role: Role, device_id: &str, device_key: &str) -> Self {
        Self {
            role,
            device_key: device_key.to_string(),
            own_keys: BTreeMap::from([(format!("ed25519:{device_id}"), device_key.to_string())]),
        }
    }

    /// Also vouch for the user's master cross-signing key.
    pub fn with_master_key(mut self, master_key: &str) -> Self {
        self.own_keys
            .insert(format!("ed25519:{master_key}"), master_key.to_string());
        self
    }

    async fn check_mac(
        &self,
        txn: &VerificationTransaction,
        mac: &VerificationEvent,
    ) -> Result<(), VerificationError> {
        let keys: BTreeMap<String, KeyInfo> = serde_json::from_value(mac.content["keys"].clone())
            .map_err(|e| VerificationError::Method(format!("malformed mac: {e}")))?;
        let verified = txn.verify_keys(txn.user_id(), &keys, &matching_key).await?;
        info!(txn_id = %txn.id(), ?verified, "Verified keys from mac");
        Ok(())
    }

    async fn run_initiator(&self, txn: &VerificationTransaction) -> Result<(), VerificationError> {
        let local = &txn.context().local;
        txn.send(
            START_TYPE,
            json!({
                "method": RECIPROCATE_METHOD,
                "from_device": local.device_id,
                "transaction_id": txn.id(),
            }),
        )
        .await?;

        let key = txn.wait_for_event(KEY_TYPE).await?;
        debug!(txn_id = %txn.id(), key = %key.content["key"], "Received device key");
        txn.send(KEY_TYPE, json!({ "key": self.device_key })).await?;

        let mac = txn.wait_for_event(MAC_TYPE).await?;
        self.check_mac(txn, &mac).await?;
        txn.send(MAC_TYPE, json!({ "keys": self.own_keys })).await?;
        txn.send(DONE_EVENT_TYPE, json!({})).await
    }

    async fn run_responder(&self, txn: &VerificationTransaction) -> Result<(), VerificationError> {
        let start = txn.wait_for_event(START_TYPE).await?;
        if start.content["method"] != RECIPROCATE_METHOD {
            return Err(VerificationError::Cancelled {
                code: CancelCode::UnknownMethod.as_str().to_string(),
                reason: format!("unsupported method {}", start.content["method"]),
            });
        }

        txn.send(KEY_TYPE, json!({ "key": self.device_key })).await?;
        let key = txn.wait_for_event(KEY_TYPE).await?;
        debug!(txn_id = %txn.id(), key = %key.content["key"], "Received device key");

        txn.send(MAC_TYPE, json!({ "keys": self.own_keys })).await?;
        let mac = txn.wait_for_event(MAC_TYPE).await?;
        self.check_mac(txn, &mac).await?;
        txn.send(DONE_EVENT_TYPE, json!({})).await
    }
}

#[async_trait]
impl VerificationMethod for ReciprocateMethod {
    fn name(&self) -> &str {
        RECIPROCATE_METHOD
    }

    async fn run(&self, txn: &VerificationTransaction) -> Result<(), VerificationError> {
        match self.role {
            Role::Initiator => self.run_initiator(txn).await,
            Role::Responder => self.run_responder(txn).await,
        }
    }
}

fn matching_key(key_id: &str, device: &DeviceInfo, key_info: &KeyInfo) -> Result<(), VerificationError> {
    match device.key(key_id) {
        Some(known) if known == key_info => Ok(()),
        _ => Err(VerificationError::Cancelled {
            code: CancelCode::KeyMismatch.as_str().to_string(),
            reason: format!("{key_id} does not match the stored key"),
        }),
    }
}

/// Request side of the demo: remembers what the other party sent so a late
/// `wait_for_event` still sees it.
#[derive(Default)]
struct DemoRequest {
    inbox: Mutex<HashMap<String, VerificationEvent>>,
    finished: AtomicBool,
}

impl DemoRequest {
    fn record(&self, event: &VerificationEvent) {
        self.inbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(event.event_type.clone(), event.clone());
    }
}

impl VerificationRequest for DemoRequest {
    fn on_verifier_finished(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }

    fn event_from_other_party(&self, event_type: &str) -> Option<VerificationEvent> {
        self.inbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_type)
            .cloned()
    }
}

/// Secret storage answered by the peer device, which holds the private keys.
pub struct PeerSecrets {
    peer_device: String,
    secrets: HashMap<String, String>,
}

impl PeerSecrets {
    pub fn new(peer_device: impl Into<String>) -> Self {
        Self {
            peer_device: peer_device.into(),
            secrets: HashMap::new(),
        }
    }

    pub fn share(mut self, key_type: CrossSigningKeyType, private_key: &[u8]) -> Self {
        self.secrets
            .insert(key_type.secret_name(), STANDARD.encode(private_key));
        self
    }
}

#[async_trait]
impl SecretStorage for PeerSecrets {
    async fn request(&self, name: &str, device_ids: &[String]) -> Result<String, VerificationError> {
        if !device_ids.iter().any(|d| d == &self.peer_device) {
            return Err(VerificationError::SecretStorage(format!(
                "{name} requested from unknown devices {device_ids:?}"
            )));
        }
        self.secrets
            .get(name)
            .cloned()
            .ok_or_else(|| VerificationError::SecretStorage(format!("{name} is not shared")))
    }
}

/// What the demo run achieved.
#[derive(Debug, Clone)]
pub struct DemoReport {
    pub txn_id: String,
    pub initiator: LocalIdentity,
    pub responder: LocalIdentity,
    pub initiator_verified_peer: bool,
    pub responder_verified_peer: bool,
    pub cached_keys: Vec<CrossSigningKeyType>,
}

fn spawn_pump(
    mut inbound: mpsc::Receiver<VerificationEvent>,
    txn: VerificationTransaction,
    request: Arc<DemoRequest>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = inbound.recv().await {
            request.record(&event);
            txn.handle_event(event);
        }
    })
}

fn random_key() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Verify `identity` against a second device of the same user, then fetch
/// the cross-signing keys from it.
///
/// Fails unless called on a current-thread runtime.
pub async fn run_demo(identity: LocalIdentity, options: TransactionOptions) -> Result<DemoReport> {
    if Handle::current().runtime_flavor() != RuntimeFlavor::CurrentThread {
        bail!("the loopback demo needs a current-thread runtime");
    }

    let user_id = identity.user_id.clone();
    let peer = LocalIdentity::new(user_id.clone(), format!("{}PEER", identity.device_id));

    let own_key = random_key();
    let peer_key = random_key();
    let master_key = format!("MASTER{}", &random_key()[..8]);
    let ssk_private = Uuid::new_v4().as_bytes().to_vec();
    let usk_private = Uuid::new_v4().as_bytes().to_vec();

    let mut cross_signing = CrossSigningInfo::new(user_id.clone(), master_key.clone());
    cross_signing.self_signing_key = Some(random_key());
    cross_signing.user_signing_key = Some(random_key());

    let initiator_store = Arc::new(MemoryDeviceStore::new());
    initiator_store
        .add_device(&user_id, DeviceInfo::new(&peer.device_id).with_key(format!("ed25519:{}", peer.device_id), &peer_key))
        .await;
    initiator_store.add_cross_signing(cross_signing.clone()).await;

    let responder_store = Arc::new(MemoryDeviceStore::new());
    responder_store
        .add_device(&user_id, DeviceInfo::new(&identity.device_id).with_key(format!("ed25519:{}", identity.device_id), &own_key))
        .await;
    responder_store.add_cross_signing(cross_signing).await;

    let secrets = PeerSecrets::new(&peer.device_id)
        .share(CrossSigningKeyType::SelfSigning, &ssk_private)
        .share(CrossSigningKeyType::UserSigning, &usk_private);

    let initiator_ctx = CryptoContext::new(
        identity.clone(),
        initiator_store.clone(),
        Arc::new(secrets),
        initiator_store.clone(),
    );
    let responder_ctx = CryptoContext::new(
        peer.clone(),
        responder_store.clone(),
        Arc::new(PeerSecrets::new(&identity.device_id)),
        responder_store.clone(),
    );

    let pair = MemoryChannel::pair(identity.clone(), peer.clone());
    let initiator_request = Arc::new(DemoRequest::default());
    let responder_request = Arc::new(DemoRequest::default());

    let initiator = VerificationTransaction::builder(Arc::new(pair.first), initiator_ctx, &user_id)
        .device_id(&peer.device_id)
        .request(initiator_request.clone())
        .method(Arc::new(ReciprocateMethod::new(
            Role::Initiator,
            &identity.device_id,
            &own_key,
        )))
        .options(options)
        .build();
    let responder = VerificationTransaction::builder(Arc::new(pair.second), responder_ctx, &user_id)
        .device_id(&identity.device_id)
        .request(responder_request.clone())
        .method(Arc::new(
            ReciprocateMethod::new(Role::Responder, &peer.device_id, &peer_key)
                .with_master_key(&master_key),
        ))
        .options(TransactionOptions {
            request_cross_signing_keys: false,
            ..options
        })
        .build();

    let pumps = [
        spawn_pump(pair.first_rx, initiator.clone(), initiator_request),
        spawn_pump(pair.second_rx, responder.clone(), responder_request),
    ];

    info!(txn_id = %initiator.id(), user_id = %user_id, peer = %peer.device_id, "Running loopback verification");
    let (initiated, responded) = tokio::join!(initiator.verify(), responder.verify());
    let finished = initiated.and(responded);
    if finished.is_ok() {
        initiator.key_fetch_finished().await;
    }
    for pump in &pumps {
        pump.abort();
    }
    finished?;

    let mut cached_keys = Vec::new();
    for key_type in REQUESTED_KEYS {
        if initiator_store
            .cached_private_key(&user_id, key_type)
            .await
            .is_some()
        {
            cached_keys.push(key_type);
        }
    }

    Ok(DemoReport {
        txn_id: initiator.id().to_string(),
        initiator_verified_peer: initiator_store.is_verified(&user_id, &peer.device_id).await,
        responder_verified_peer: responder_store
            .is_verified(&user_id, &identity.device_id)
            .await,
        initiator: identity,
        responder: peer,
        cached_keys,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loopback_verification_caches_keys() {
        let report = run_demo(
            LocalIdentity::new("@alice:example.org", "ALICEDEV"),
            TransactionOptions::default(),
        )
        .await
        .unwrap();

        assert!(report.initiator_verified_peer);
        assert!(report.responder_verified_peer);
        assert_eq!(report.responder.device_id, "ALICEDEVPEER");
        assert_eq!(report.cached_keys, REQUESTED_KEYS.to_vec());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn refuses_multi_thread_runtime() {
        let err = run_demo(
            LocalIdentity::new("@alice:example.org", "ALICEDEV"),
            TransactionOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("current-thread"));
    }

    #[tokio::test]
    async fn secrets_only_answer_the_peer() {
        let secrets = PeerSecrets::new("PEER").share(CrossSigningKeyType::SelfSigning, b"k");
        let name = CrossSigningKeyType::SelfSigning.secret_name();

        assert_eq!(secrets.request(&name, &["PEER".into()]).await.unwrap(), "aw==");
        assert!(secrets.request(&name, &["OTHER".into()]).await.is_err());
        assert!(secrets
            .request(&CrossSigningKeyType::UserSigning.secret_name(), &["PEER".into()])
            .await
            .is_err());
    }

    #[test]
    fn mismatched_key_is_rejected() {
        let device = DeviceInfo::new("DEV").with_key("ed25519:DEV", "right");
        assert!(matching_key("ed25519:DEV", &device, &"right".to_string()).is_ok());
        let err = matching_key("ed25519:DEV", &device, &"wrong".to_string()).unwrap_err();
        assert!(matches!(err, VerificationError::Cancelled { ref code, .. } if code == "m.key_mismatch"));
    }
}
