//! Post-verification cross-signing key fetch.
//!
//! After a successful self-verification the verified device is asked for
//! the self-signing and user-signing private keys. The fetch runs detached
//! from the transaction: its result is logged and never reaches `verify()`.

use std::time::Duration;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use crossverify_core::{CrossSigningKeyType, VerificationError};
use logging::{AuditEvent, AuditLogger};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::context::CryptoContext;

/// Secrets arrive padded or unpadded depending on the sharing client.
const SECRET_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Keys requested from the verified device.
pub const REQUESTED_KEYS: [CrossSigningKeyType; 2] = [
    CrossSigningKeyType::SelfSigning,
    CrossSigningKeyType::UserSigning,
];

pub fn decode_secret(
    key_type: CrossSigningKeyType,
    encoded: &str,
) -> Result<Vec<u8>, VerificationError> {
    SECRET_ENGINE
        .decode(encoded.trim())
        .map_err(|e| VerificationError::SecretStorage(format!("{key_type} secret is not base64: {e}")))
}

async fn request_key(
    ctx: &CryptoContext,
    key_type: CrossSigningKeyType,
    device_ids: &[String],
) -> Result<(CrossSigningKeyType, Vec<u8>), VerificationError> {
    let name = key_type.secret_name();
    debug!(secret = %name, ?device_ids, "Requesting cross-signing secret");
    let encoded = ctx.secrets.request(&name, device_ids).await?;
    Ok((key_type, decode_secret(key_type, &encoded)?))
}

/// Request both signing keys concurrently, then validate and cache them.
///
/// Nothing is cached unless both requests succeed.
pub async fn fetch_cross_signing_keys(
    ctx: &CryptoContext,
    user_id: &str,
    device_ids: &[String],
) -> Result<Vec<CrossSigningKeyType>, VerificationError> {
    let [first, second] = REQUESTED_KEYS;
    let (first, second) = tokio::try_join!(
        request_key(ctx, first, device_ids),
        request_key(ctx, second, device_ids),
    )?;

    let mut cached = Vec::with_capacity(REQUESTED_KEYS.len());
    for (key_type, private_key) in [first, second] {
        ctx.cross_signing
            .store_private_key(user_id, key_type, private_key)
            .await?;
        cached.push(key_type);
    }
    Ok(cached)
}

/// Spawn the bounded, best-effort fetch. The handle only reports completion.
pub fn spawn_key_fetch(
    ctx: CryptoContext,
    txn_id: String,
    user_id: String,
    device_ids: Vec<String>,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let outcome = match tokio::time::timeout(
            timeout,
            fetch_cross_signing_keys(&ctx, &user_id, &device_ids),
        )
        .await
        {
            Ok(Ok(cached)) => {
                info!(txn_id = %txn_id, user_id = %user_id, ?cached, "Cached cross-signing keys from verified device");
                format!("cached {} keys", cached.len())
            }
            Ok(Err(e)) => {
                warn!(txn_id = %txn_id, error = %e, "Cross-signing key fetch failed");
                format!("failed: {e}")
            }
            Err(_) => {
                warn!(txn_id = %txn_id, ?timeout, "Cross-signing key fetch timed out");
                "timed out".to_string()
            }
        };
        AuditLogger::log_event(&txn_id, AuditEvent::KeyFetch { outcome });
    })
}
