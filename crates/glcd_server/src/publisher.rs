//! Outbound path from services to clients.

use crate::bus::{Bus, Destination};
use crate::messaging::Outbound;
use crate::registry::{ClientAddress, ClientRegistry};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

/// Publishes replies and broadcasts to client topics.
///
/// A client is reachable only if its identifier has the `host:port:topic`
/// form; sends to any other client are dropped with a diagnostic. Publish
/// failures are logged and never propagate into the calling service.
#[derive(Clone)]
pub struct Publisher {
    bus: Arc<dyn Bus>,
    registry: Arc<ClientRegistry>,
}

impl Publisher {
    pub fn new(bus: Arc<dyn Bus>, registry: Arc<ClientRegistry>) -> Self {
        Self { bus, registry }
    }

    /// Sends one envelope to one client. Returns whether it was published.
    pub async fn send_to(&self, client_id: &str, message: &Outbound) -> bool {
        match message.encode() {
            Ok(bytes) => self.send_raw(client_id, bytes).await,
            Err(e) => {
                warn!(client = client_id, "Failed to encode '{}' reply: {}", message.kind, e);
                false
            }
        }
    }

    /// Sends pre-encoded bytes to one client.
    pub async fn send_raw(&self, client_id: &str, bytes: Vec<u8>) -> bool {
        let Some(address) = ClientAddress::parse(client_id) else {
            debug!(client = client_id, "Client id has no publish target, dropping reply");
            return false;
        };
        let destination = Destination::from(address);

        match self.bus.publish(&destination, bytes).await {
            Ok(()) => true,
            Err(e) => {
                warn!(client = client_id, %destination, "Publish failed: {:#}", e);
                false
            }
        }
    }

    /// Sends one envelope to every known client. Returns how many sends
    /// succeeded.
    pub async fn broadcast(&self, message: &Outbound) -> usize {
        match message.encode() {
            Ok(bytes) => self.broadcast_raw(&bytes).await,
            Err(e) => {
                warn!("Failed to encode '{}' broadcast: {}", message.kind, e);
                0
            }
        }
    }

    /// Sends the same bytes to every known client.
    ///
    /// Sends run concurrently, so a slow peer holds up only its own copy.
    pub async fn broadcast_raw(&self, bytes: &[u8]) -> usize {
        let sends = self
            .registry
            .snapshot_all()
            .into_iter()
            .map(|session| async move { self.send_raw(&session.client_id, bytes.to_vec()).await });
        join_all(sends).await.into_iter().filter(|sent| *sent).count()
    }

    /// Publishes directly to a topic on the home nsqd.
    ///
    /// Used at startup to make sure the server topic exists before clients
    /// publish to it.
    pub async fn provision(&self, topic: &str, message: &serde_json::Value) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec(message)?;
        self.bus.publish(&Destination::home(topic), bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use serde_json::{json, Value};

    fn setup() -> (Arc<MemoryBus>, Arc<ClientRegistry>, Publisher) {
        let bus = Arc::new(MemoryBus::new());
        let registry = Arc::new(ClientRegistry::new());
        let publisher = Publisher::new(bus.clone(), registry.clone());
        (bus, registry, publisher)
    }

    #[tokio::test]
    async fn sends_to_the_topic_in_the_client_id() {
        let (bus, _, publisher) = setup();
        assert!(publisher.send_to("10.0.0.5:4151:arena", &Outbound::message("hi")).await);

        let sent = bus.published(&Destination::at("10.0.0.5:4151", "arena"));
        assert_eq!(sent.len(), 1);
        let wire: Value = serde_json::from_slice(&sent[0]).expect("json");
        assert_eq!(wire, json!({"type": "message", "data": "hi"}));
    }

    #[tokio::test]
    async fn malformed_client_ids_are_a_no_op() {
        let (_, _, publisher) = setup();
        assert!(!publisher.send_to("C1", &Outbound::message("hi")).await);
        assert!(!publisher.send_to("h:notaport:t", &Outbound::message("hi")).await);
    }

    #[tokio::test]
    async fn broadcast_reaches_every_reachable_client() {
        let (bus, registry, publisher) = setup();
        registry.touch("h:4150:a");
        registry.touch("h:4150:b");
        registry.touch("unreachable");

        assert_eq!(publisher.broadcast_raw(b"raw").await, 2);
        assert_eq!(bus.published(&Destination::at("h:4150", "a")), vec![b"raw".to_vec()]);
        assert_eq!(bus.published(&Destination::at("h:4150", "b")), vec![b"raw".to_vec()]);
    }

    #[tokio::test]
    async fn provision_publishes_to_home_topic() {
        let (bus, _, publisher) = setup();
        publisher
            .provision("glcd", &json!({"client": "server"}))
            .await
            .expect("published");
        assert_eq!(
            bus.published(&Destination::home("glcd")),
            vec![br#"{"client":"server"}"#.to_vec()]
        );
    }
}
