//! `wall`, `chat` and `broadcast`: fan the original bytes out to everyone.

use super::serve;
use crate::error::HubError;
use crate::messaging::{HubMessage, Inbound, ServiceInbox};
use crate::publisher::Publisher;
use crate::supervisor::Service;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct BroadcastService {
    inbox: ServiceInbox,
    publisher: Publisher,
}

impl BroadcastService {
    pub fn new(inbox: ServiceInbox, publisher: Publisher) -> Self {
        Self { inbox, publisher }
    }

    async fn handle(&self, inbound: Inbound) {
        let (kind, raw) = match inbound.message {
            HubMessage::Broadcast { kind, raw } => (kind, raw),
            other => {
                debug!(kind = other.kind().tag(), "Broadcast service ignoring message");
                return;
            }
        };

        let delivered = self.publisher.broadcast_raw(&raw).await;
        debug!(client = %inbound.client, kind = kind.tag(), delivered, "📢 Fanned out message");
    }
}

#[async_trait]
impl Service for BroadcastService {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    async fn run(&self, shutdown: CancellationToken) -> Result<(), HubError> {
        serve(&self.inbox, &shutdown, |inbound| self.handle(inbound)).await
    }
}
