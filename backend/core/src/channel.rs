use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::VerificationError;
use crate::event::VerificationEvent;
use crate::traits::VerificationChannel;
use crate::types::LocalIdentity;

/// Default buffer size for each direction of a channel pair.
const DEFAULT_BUFFER_SIZE: usize = 256;

/// One end of an in-memory, ordered verification channel.
///
/// Events sent here are stamped with this end's user id and delivered, in
/// order, to the receiver handed to the other end.
#[derive(Clone)]
pub struct MemoryChannel {
    identity: LocalIdentity,
    peer_tx: mpsc::Sender<VerificationEvent>,
}

/// Both ends of a linked pair, each with the receiver of its inbound events.
pub struct ChannelPair {
    pub first: MemoryChannel,
    pub first_rx: mpsc::Receiver<VerificationEvent>,
    pub second: MemoryChannel,
    pub second_rx: mpsc::Receiver<VerificationEvent>,
}

impl MemoryChannel {
    /// Link two parties with the default buffer size.
    pub fn pair(first: LocalIdentity, second: LocalIdentity) -> ChannelPair {
        Self::pair_with_buffer_size(first, second, DEFAULT_BUFFER_SIZE)
    }

    /// Link two parties with a custom buffer size.
    pub fn pair_with_buffer_size(
        first: LocalIdentity,
        second: LocalIdentity,
        buffer: usize,
    ) -> ChannelPair {
        let (to_second_tx, second_rx) = mpsc::channel(buffer);
        let (to_first_tx, first_rx) = mpsc::channel(buffer);

        info!(
            buffer_size = buffer,
            first = %first.device_id,
            second = %second.device_id,
            "Memory channel pair initialized"
        );

        ChannelPair {
            first: MemoryChannel {
                identity: first,
                peer_tx: to_second_tx,
            },
            first_rx,
            second: MemoryChannel {
                identity: second,
                peer_tx: to_first_tx,
            },
            second_rx,
        }
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }
}

#[async_trait]
impl VerificationChannel for MemoryChannel {
    async fn send(
        &self,
        event_type: &str,
        content: serde_json::Value,
    ) -> Result<(), VerificationError> {
        let event =
            VerificationEvent::new(event_type, content).with_sender(self.identity.user_id.clone());
        debug!(
            event_type,
            from = %self.identity.device_id,
            "Sending verification event"
        );
        self.peer_tx
            .send(event)
            .await
            .map_err(|e| VerificationError::ChannelClosed(e.to_string()))
    }
}
