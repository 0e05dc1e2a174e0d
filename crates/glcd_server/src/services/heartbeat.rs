//! Liveness: `heartbeat` and `ping`.

use super::serve;
use crate::error::HubError;
use crate::messaging::{HubMessage, Inbound, Outbound, ServiceInbox};
use crate::publisher::Publisher;
use crate::registry::ClientRegistry;
use crate::supervisor::Service;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct HeartbeatService {
    inbox: ServiceInbox,
    registry: Arc<ClientRegistry>,
    publisher: Publisher,
}

impl HeartbeatService {
    pub fn new(inbox: ServiceInbox, registry: Arc<ClientRegistry>, publisher: Publisher) -> Self {
        Self {
            inbox,
            registry,
            publisher,
        }
    }

    async fn handle(&self, inbound: Inbound) {
        self.registry.touch(&inbound.client);
        match inbound.message {
            HubMessage::Heartbeat => {}
            HubMessage::Ping => {
                self.publisher
                    .send_to(&inbound.client, &Outbound::pong(Utc::now()))
                    .await;
            }
            other => debug!(kind = other.kind().tag(), "Heartbeat service ignoring message"),
        }
    }
}

#[async_trait]
impl Service for HeartbeatService {
    fn name(&self) -> &'static str {
        "heartbeat"
    }

    async fn run(&self, shutdown: CancellationToken) -> Result<(), HubError> {
        serve(&self.inbox, &shutdown, |inbound| self.handle(inbound)).await
    }
}
