//! Zones and the `connected` catch-up.
//!
//! * `updateZone` writes a zone and confirms with a `message`
//! * `sendZone` replies with one zone as an `updateZone` envelope
//! * `connected` replies with every zone, then every known player state
//!
//! None of the read paths mutate anything, so repeating `connected` yields
//! the same replies.

use super::{codes, serve, store_failure};
use crate::error::HubError;
use crate::messaging::{HubMessage, Inbound, MessageKind, Outbound, ServiceInbox};
use crate::persistence::{PersistenceError, PersistenceGateway, Zone};
use crate::publisher::Publisher;
use crate::registry::ClientRegistry;
use crate::supervisor::Service;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct WorldService {
    inbox: ServiceInbox,
    registry: Arc<ClientRegistry>,
    gateway: PersistenceGateway,
    publisher: Publisher,
}

impl WorldService {
    pub fn new(
        inbox: ServiceInbox,
        registry: Arc<ClientRegistry>,
        gateway: PersistenceGateway,
        publisher: Publisher,
    ) -> Self {
        Self {
            inbox,
            registry,
            gateway,
            publisher,
        }
    }

    async fn handle(&self, inbound: Inbound) {
        let client = inbound.client;
        match inbound.message {
            HubMessage::UpdateZone { zone, data } => self.update_zone(&client, &zone, &data).await,
            HubMessage::SendZone { zone } => self.send_zone(&client, &zone).await,
            HubMessage::Connected => self.connected(&client).await,
            other => debug!(kind = other.kind().tag(), "World service ignoring message"),
        }
    }

    async fn update_zone(&self, client: &str, name: &str, data: &Value) {
        let reply = match self.gateway.upsert_zone(name, data).await {
            Ok(()) => {
                info!(client, zone = name, "🗺️ Zone updated");
                Outbound::message(format!("Updated zone '{name}'"))
            }
            Err(err) => store_failure(&format!("update zone '{name}'"), &err),
        };
        self.publisher.send_to(client, &reply).await;
    }

    async fn send_zone(&self, client: &str, name: &str) {
        let reply = match self.gateway.get_zone(name).await {
            Ok(zone) => zone_envelope(&zone),
            Err(PersistenceError::NotFound(_)) => {
                warn!(client, zone = name, "Client asked for a zone that does not exist");
                Some(Outbound::error(codes::ZONE_NOT_FOUND, format!("No such zone '{name}'")))
            }
            Err(err) => Some(store_failure(&format!("load zone '{name}'"), &err)),
        };
        if let Some(reply) = reply {
            self.publisher.send_to(client, &reply).await;
        }
    }

    async fn connected(&self, client: &str) {
        match self.gateway.list_zones().await {
            Ok(zones) => {
                for zone in &zones {
                    if let Some(envelope) = zone_envelope(zone) {
                        self.publisher.send_to(client, &envelope).await;
                    }
                }
                debug!(client, zones = zones.len(), "Sent zone set");
            }
            Err(err) => {
                let reply = store_failure("list zones", &err);
                self.publisher.send_to(client, &reply).await;
            }
        }

        for session in self.registry.snapshot_all() {
            if let Some(state) = session.last_known_state {
                let envelope = Outbound::new(MessageKind::PlayerState.tag(), state);
                self.publisher.send_to(client, &envelope).await;
            }
        }
    }
}

fn zone_envelope(zone: &Zone) -> Option<Outbound> {
    match serde_json::to_value(zone) {
        Ok(data) => Some(Outbound::new(MessageKind::UpdateZone.tag(), data)),
        Err(e) => {
            warn!(zone = %zone.name, "Failed to encode zone: {}", e);
            None
        }
    }
}

#[async_trait]
impl Service for WorldService {
    fn name(&self) -> &'static str {
        "world"
    }

    async fn run(&self, shutdown: CancellationToken) -> Result<(), HubError> {
        serve(&self.inbox, &shutdown, |inbound| self.handle(inbound)).await
    }
}
