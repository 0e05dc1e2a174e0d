//! Message routing from the bus to the owning service.
//!
//! The [`Dispatcher`] is the hub's single ingress point. It decodes each
//! inbound envelope, refreshes the sender's session and hands the decoded
//! message to the service that owns its type. It performs no other I/O and
//! never runs business logic, so a slow service only ever stalls its own
//! queue (and, once that queue is full, the ingress loop).

use crate::error::HubError;
use crate::messaging::types::{Envelope, Inbound, MessageKind};
use crate::registry::ClientRegistry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace, warn};

/// The services messages can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    Heartbeat,
    PlayerState,
    World,
    Broadcast,
    PlayerAuth,
}

impl ServiceKind {
    pub fn name(self) -> &'static str {
        match self {
            ServiceKind::Heartbeat => "heartbeat",
            ServiceKind::PlayerState => "player_state",
            ServiceKind::World => "world",
            ServiceKind::Broadcast => "broadcast",
            ServiceKind::PlayerAuth => "player_auth",
        }
    }
}

impl MessageKind {
    /// The service that owns messages of this kind.
    pub fn service(self) -> ServiceKind {
        match self {
            MessageKind::Ping | MessageKind::Heartbeat => ServiceKind::Heartbeat,
            MessageKind::PlayerState => ServiceKind::PlayerState,
            MessageKind::UpdateZone | MessageKind::SendZone | MessageKind::Connected => {
                ServiceKind::World
            }
            MessageKind::Wall | MessageKind::Chat | MessageKind::Broadcast => {
                ServiceKind::Broadcast
            }
            MessageKind::PlayerAuth => ServiceKind::PlayerAuth,
        }
    }
}

/// A service's input queue.
///
/// The receiver sits behind an async mutex so it outlives any one run of the
/// service: a restarted service picks up where the crashed one left off.
pub type ServiceInbox = Arc<Mutex<mpsc::Receiver<Inbound>>>;

/// Sending halves of every service queue.
#[derive(Debug, Clone)]
pub struct ServiceSenders {
    pub heartbeat: mpsc::Sender<Inbound>,
    pub player_state: mpsc::Sender<Inbound>,
    pub world: mpsc::Sender<Inbound>,
    pub broadcast: mpsc::Sender<Inbound>,
    pub player_auth: mpsc::Sender<Inbound>,
}

impl ServiceSenders {
    fn for_service(&self, service: ServiceKind) -> &mpsc::Sender<Inbound> {
        match service {
            ServiceKind::Heartbeat => &self.heartbeat,
            ServiceKind::PlayerState => &self.player_state,
            ServiceKind::World => &self.world,
            ServiceKind::Broadcast => &self.broadcast,
            ServiceKind::PlayerAuth => &self.player_auth,
        }
    }
}

/// Receiving halves of every service queue.
#[derive(Debug, Clone)]
pub struct ServiceInboxes {
    pub heartbeat: ServiceInbox,
    pub player_state: ServiceInbox,
    pub world: ServiceInbox,
    pub broadcast: ServiceInbox,
    pub player_auth: ServiceInbox,
}

/// Creates one bounded queue per service.
pub fn service_channels(capacity: usize) -> (ServiceSenders, ServiceInboxes) {
    fn pair(capacity: usize) -> (mpsc::Sender<Inbound>, ServiceInbox) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Arc::new(Mutex::new(rx)))
    }

    let (heartbeat, heartbeat_rx) = pair(capacity);
    let (player_state, player_state_rx) = pair(capacity);
    let (world, world_rx) = pair(capacity);
    let (broadcast, broadcast_rx) = pair(capacity);
    let (player_auth, player_auth_rx) = pair(capacity);

    (
        ServiceSenders {
            heartbeat,
            player_state,
            world,
            broadcast,
            player_auth,
        },
        ServiceInboxes {
            heartbeat: heartbeat_rx,
            player_state: player_state_rx,
            world: world_rx,
            broadcast: broadcast_rx,
            player_auth: player_auth_rx,
        },
    )
}

/// What the dispatcher did with one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// The hub's own provisioning echo
    Ignored,
    Routed(ServiceKind),
}

/// Counters describing ingress traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub received: u64,
    pub decode_errors: u64,
    pub routing_errors: u64,
    pub ignored: u64,
    pub routed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    decode_errors: AtomicU64,
    routing_errors: AtomicU64,
    ignored: AtomicU64,
    routed: AtomicU64,
}

/// Decodes inbound envelopes and routes them to services.
#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<ClientRegistry>,
    routes: ServiceSenders,
    counters: Counters,
}

impl Dispatcher {
    pub fn new(registry: Arc<ClientRegistry>, routes: ServiceSenders) -> Self {
        Self {
            registry,
            routes,
            counters: Counters::default(),
        }
    }

    /// Handles one inbound bus message.
    ///
    /// Decode and routing failures are logged and the message is dropped;
    /// they never stop the ingress loop.
    pub async fn handle(&self, bytes: &[u8]) {
        match self.dispatch(bytes).await {
            Ok(Dispatched::Ignored) => trace!("Ignoring provisioning echo"),
            Ok(Dispatched::Routed(service)) => trace!(service = service.name(), "Routed message"),
            Err(HubError::Decode(reason)) => {
                warn!("🚫 Dropping undecodable message: {}", reason);
            }
            Err(HubError::Routing(reason)) => {
                warn!("🚫 Dropping unroutable message: {}", reason);
            }
            Err(e) => warn!("Dispatch failed: {}", e),
        }
    }

    /// Decodes, records liveness and routes one message.
    ///
    /// # Message Flow
    ///
    /// 1. Decode the envelope; failure is a [`HubError::Decode`]
    /// 2. Ignore the `"server"` provisioning echo
    /// 3. Create or refresh the sender's session
    /// 4. Decode the typed payload; failure is a [`HubError::Routing`]
    /// 5. Queue the message for its service, waiting if the queue is full
    pub async fn dispatch(&self, bytes: &[u8]) -> Result<Dispatched, HubError> {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        let envelope = Envelope::decode(bytes).inspect_err(|_| {
            self.counters.decode_errors.fetch_add(1, Ordering::Relaxed);
        })?;

        if envelope.is_server_echo() {
            self.counters.ignored.fetch_add(1, Ordering::Relaxed);
            return Ok(Dispatched::Ignored);
        }

        let client = envelope.client.clone();
        self.registry.touch(&client);

        let message = envelope.into_message().inspect_err(|_| {
            self.counters.routing_errors.fetch_add(1, Ordering::Relaxed);
        })?;
        let service = message.kind().service();
        debug!(client = %client, kind = message.kind().tag(), service = service.name(), "📨 Routing message");

        self.routes
            .for_service(service)
            .send(Inbound { client, message })
            .await
            .map_err(|_| HubError::Internal(format!("{} queue is closed", service.name())))?;

        self.counters.routed.fetch_add(1, Ordering::Relaxed);
        Ok(Dispatched::Routed(service))
    }

    /// Current ingress counters.
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            received: self.counters.received.load(Ordering::Relaxed),
            decode_errors: self.counters.decode_errors.load(Ordering::Relaxed),
            routing_errors: self.counters.routing_errors.load(Ordering::Relaxed),
            ignored: self.counters.ignored.load(Ordering::Relaxed),
            routed: self.counters.routed.load(Ordering::Relaxed),
        }
    }
}
