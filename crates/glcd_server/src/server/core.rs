//! Core hub implementation.
//!
//! This module contains the [`HubServer`], which wires the registry, the
//! persistence gateway, the publisher and the supervised services together
//! and runs the ingress loop until shutdown.

use crate::{
    bus::Bus,
    config::HubConfig,
    error::HubError,
    messaging::{service_channels, DispatchStats, Dispatcher},
    persistence::{DocumentStore, PersistenceGateway},
    publisher::Publisher,
    registry::{ClientRegistry, SERVER_CLIENT_ID},
    services::{
        BroadcastService, CleanupService, HeartbeatService, PlayerAuthService,
        PlayerStateService, WorldService,
    },
    supervisor::Supervisor,
};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// The hub: one ingress stream in, many supervised services out.
///
/// # Architecture
///
/// * **Dispatcher**: decodes bus messages and routes them by type
/// * **Services**: heartbeat, player state, world, broadcast, auth and
///   cleanup, each restarted in isolation by the [`Supervisor`]
/// * **Client Registry**: the only state shared between services
/// * **Publisher**: replies and broadcasts back onto the bus
///
/// The bus and document store are injected, so the same hub runs against
/// NSQ and MongoDB in production and in-memory backends in tests.
pub struct HubServer {
    /// Hub configuration settings
    config: HubConfig,

    /// Transport for inbound and outbound messages
    bus: Arc<dyn Bus>,

    /// Sessions of every client heard from
    registry: Arc<ClientRegistry>,

    /// Zone and auth storage
    gateway: PersistenceGateway,

    /// Outbound path shared by all services
    publisher: Publisher,
}

impl HubServer {
    /// Creates a hub over the given bus and store.
    ///
    /// # Arguments
    ///
    /// * `config` - Topology and tuning settings
    /// * `bus` - Transport the hub subscribes and publishes on
    /// * `store` - Backend for zones and auth records
    pub fn new(config: HubConfig, bus: Arc<dyn Bus>, store: Arc<dyn DocumentStore>) -> Self {
        let registry = Arc::new(ClientRegistry::new());
        let gateway = PersistenceGateway::new(store, &config.auth_secret);
        let publisher = Publisher::new(bus.clone(), registry.clone());

        Self {
            config,
            bus,
            registry,
            gateway,
            publisher,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// The client registry, shared with the running services.
    pub fn registry(&self) -> Arc<ClientRegistry> {
        self.registry.clone()
    }

    pub fn gateway(&self) -> &PersistenceGateway {
        &self.gateway
    }

    /// Runs the hub until `shutdown` is cancelled.
    ///
    /// # Startup
    ///
    /// 1. Validate the configuration
    /// 2. Start every service under supervision
    /// 3. Publish the provisioning echo so the server topic exists
    /// 4. Subscribe to the server topic and dispatch until shutdown
    ///
    /// # Shutdown
    ///
    /// Ingress stops first, then services are cancelled at message
    /// boundaries and given `shutdown_grace` to finish what they are doing.
    ///
    /// # Returns
    ///
    /// The ingress counters on a clean stop, [`HubError::Configuration`] if
    /// the configuration is unusable, [`HubError::Bus`] if the subscription
    /// cannot be made, or [`HubError::SupervisorExhausted`] if a service kept
    /// crashing.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<DispatchStats, HubError> {
        self.config.validate()?;

        let (senders, inboxes) = service_channels(self.config.channel_capacity);
        let dispatcher = Dispatcher::new(self.registry.clone(), senders);

        let services_token = CancellationToken::new();
        let mut supervisor =
            Supervisor::new(self.config.supervisor.clone(), services_token.clone());
        let registry = &self.registry;
        let publisher = &self.publisher;

        supervisor.spawn(Arc::new(HeartbeatService::new(
            inboxes.heartbeat,
            registry.clone(),
            publisher.clone(),
        )));
        supervisor.spawn(Arc::new(PlayerStateService::new(
            inboxes.player_state,
            registry.clone(),
            publisher.clone(),
        )));
        supervisor.spawn(Arc::new(WorldService::new(
            inboxes.world,
            registry.clone(),
            self.gateway.clone(),
            publisher.clone(),
        )));
        supervisor.spawn(Arc::new(BroadcastService::new(
            inboxes.broadcast,
            publisher.clone(),
        )));
        supervisor.spawn(Arc::new(PlayerAuthService::new(
            inboxes.player_auth,
            self.gateway.clone(),
            publisher.clone(),
        )));
        supervisor.spawn(Arc::new(CleanupService::new(
            registry.clone(),
            publisher.clone(),
            self.config.cleanup_interval,
        )));

        let ingress_token = shutdown.child_token();
        let mut inbound = match self.subscribe(&ingress_token).await {
            Ok(rx) => rx,
            Err(e) => {
                supervisor.shutdown(self.config.shutdown_grace).await;
                return Err(e);
            }
        };

        info!(
            topic = %self.config.server_topic,
            channel = %self.config.server_channel,
            services = ?supervisor.services(),
            "🚀 Hub is listening"
        );

        let mut outcome = Ok(());
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("🛑 Shutdown requested, stopping ingress");
                    break;
                }
                name = supervisor.exhausted() => {
                    error!(service = name, "Service restart budget exhausted, stopping hub");
                    outcome = Err(HubError::SupervisorExhausted(name.to_string()));
                    break;
                }
                next = inbound.recv() => match next {
                    Some(bytes) => {
                        // A full service queue blocks here; shutdown still wins.
                        tokio::select! {
                            biased;
                            _ = shutdown.cancelled() => {
                                info!("🛑 Shutdown requested while a service queue was full");
                                break;
                            }
                            () = dispatcher.handle(&bytes) => {}
                        }
                    }
                    None => {
                        warn!("Bus subscription closed, stopping ingress");
                        break;
                    }
                },
            }
        }

        ingress_token.cancel();
        drop(inbound);

        let clean = supervisor.shutdown(self.config.shutdown_grace).await;
        let stats = dispatcher.stats();
        info!(
            received = stats.received,
            routed = stats.routed,
            decode_errors = stats.decode_errors,
            routing_errors = stats.routing_errors,
            clients = self.registry.len(),
            clean,
            "✅ Hub stopped"
        );

        outcome.map(|()| stats)
    }

    /// Provisions the server topic and subscribes to it.
    async fn subscribe(
        &self,
        token: &CancellationToken,
    ) -> Result<tokio::sync::mpsc::Receiver<Vec<u8>>, HubError> {
        let topic = &self.config.server_topic;

        // nsqd creates topics on first publish.
        match self
            .publisher
            .provision(topic, &json!({ "client": SERVER_CLIENT_ID }))
            .await
        {
            Ok(()) => debug!(%topic, "Provisioned server topic"),
            Err(e) => warn!(%topic, "Could not provision server topic: {:#}", e),
        }

        self.bus
            .subscribe(topic, &self.config.server_channel, token.clone())
            .await
            .map_err(|e| HubError::Bus(format!("subscribing to '{topic}': {e:#}")))
    }
}
