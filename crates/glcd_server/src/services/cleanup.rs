//! Expiry of silent clients.
//!
//! Each tick fixes its cutoff first and only then waits one interval, so a
//! client is evicted only after a full interval without any message.

use crate::error::HubError;
use crate::messaging::Outbound;
use crate::publisher::Publisher;
use crate::registry::{ClientId, ClientRegistry};
use crate::supervisor::Service;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct CleanupService {
    registry: Arc<ClientRegistry>,
    publisher: Publisher,
    interval: Duration,
}

impl CleanupService {
    pub fn new(registry: Arc<ClientRegistry>, publisher: Publisher, interval: Duration) -> Self {
        Self {
            registry,
            publisher,
            interval,
        }
    }

    /// Evicts every session older than `cutoff` and tells the remaining
    /// clients, one `playerGone` per evicted client.
    pub async fn sweep(&self, cutoff: Instant) -> Vec<ClientId> {
        let evicted = self.registry.evict_stale(cutoff);
        for client in &evicted {
            info!(client = %client, "👻 Client timed out");
            self.publisher.broadcast(&Outbound::player_gone(client)).await;
        }
        if !evicted.is_empty() {
            debug!(evicted = evicted.len(), remaining = self.registry.len(), "Cleanup sweep done");
        }
        evicted
    }
}

#[async_trait]
impl Service for CleanupService {
    fn name(&self) -> &'static str {
        "cleanup"
    }

    async fn run(&self, shutdown: CancellationToken) -> Result<(), HubError> {
        loop {
            let cutoff = Instant::now();
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.interval) => {}
            }
            self.sweep(cutoff).await;
        }
    }
}
