//! Factory functions for assembling a hub.
//!
//! This module provides convenient constructors that pick the bus and store
//! backends for common setups.

use crate::{
    bus::{MemoryBus, NsqBus},
    config::HubConfig,
    error::HubError,
    persistence::{DocumentStore, MemoryStore, MongoStore},
    server::HubServer,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Creates a hub backed entirely by in-process backends.
///
/// Useful for tests and for trying the hub without NSQ or MongoDB. The
/// backends are returned so callers can inject traffic, inspect what was
/// published and seed auth records.
///
/// # Example
///
/// ```rust
/// # #[tokio::main]
/// # async fn main() {
/// use glcd_server::{create_memory_hub, HubConfig};
///
/// let (hub, bus, store) = create_memory_hub(HubConfig::default());
/// # }
/// ```
pub fn create_memory_hub(config: HubConfig) -> (HubServer, Arc<MemoryBus>, Arc<MemoryStore>) {
    let bus = Arc::new(MemoryBus::new());
    let store = Arc::new(MemoryStore::new());
    let hub = HubServer::new(config, bus.clone(), store.clone());
    (hub, bus, store)
}

/// Creates a hub talking to NSQ and MongoDB as configured.
///
/// The MongoDB connection is checked once; an unreachable database is
/// reported but not fatal, since store failures are answered per request
/// and the driver reconnects on its own.
///
/// # Errors
///
/// [`HubError::Configuration`] if the configuration is invalid or the
/// MongoDB connection string cannot be parsed.
pub async fn create_nsq_hub(config: HubConfig) -> Result<HubServer, HubError> {
    config.validate()?;

    let mongo = MongoStore::connect(&config.mongo_servers, &config.mongo_db)
        .await
        .map_err(|e| HubError::Configuration(format!("MongoDB: {e}")))?;
    match mongo.ping().await {
        Ok(()) => {
            info!(servers = %config.mongo_servers, "🗄️ Connected to MongoDB");
            if let Err(e) = mongo.ensure_indexes().await {
                warn!("Could not ensure zone index: {}", e);
            }
        }
        Err(e) => warn!(servers = %config.mongo_servers, "MongoDB is not reachable yet: {}", e),
    }

    Ok(create_hub_with_store(config, Arc::new(mongo)))
}

/// Creates a hub talking to NSQ, with the given store.
pub fn create_hub_with_store(config: HubConfig, store: Arc<dyn DocumentStore>) -> HubServer {
    let bus = Arc::new(NsqBus::new((&config).into()));
    HubServer::new(config, bus, store)
}
