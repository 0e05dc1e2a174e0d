//! Player state relay.
//!
//! Stores each client's latest `playerState` message so late joiners can be
//! caught up on `connected`, and echoes it to everyone, the sender included.

use super::serve;
use crate::error::HubError;
use crate::messaging::{HubMessage, Inbound, MessageKind, Outbound, ServiceInbox};
use crate::publisher::Publisher;
use crate::registry::ClientRegistry;
use crate::supervisor::Service;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

pub struct PlayerStateService {
    inbox: ServiceInbox,
    registry: Arc<ClientRegistry>,
    publisher: Publisher,
}

impl PlayerStateService {
    pub fn new(inbox: ServiceInbox, registry: Arc<ClientRegistry>, publisher: Publisher) -> Self {
        Self {
            inbox,
            registry,
            publisher,
        }
    }

    async fn handle(&self, inbound: Inbound) {
        let message = match inbound.message {
            HubMessage::PlayerState { message } => message,
            other => {
                debug!(kind = other.kind().tag(), "Player state service ignoring message");
                return;
            }
        };

        self.registry.record_state(&inbound.client, message.clone());
        let delivered = self
            .publisher
            .broadcast(&Outbound::new(MessageKind::PlayerState.tag(), message))
            .await;
        trace!(client = %inbound.client, delivered, "Relayed player state");
    }
}

#[async_trait]
impl Service for PlayerStateService {
    fn name(&self) -> &'static str {
        "player_state"
    }

    async fn run(&self, shutdown: CancellationToken) -> Result<(), HubError> {
        serve(&self.inbox, &shutdown, |inbound| self.handle(inbound)).await
    }
}
