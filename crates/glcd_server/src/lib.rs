//! # GLCD Hub - Game Server Message Hub
//!
//! The hub sits between many game clients and the shared world state. Clients
//! publish small JSON envelopes to one server topic on an NSQ bus; the hub
//! consumes that topic, keeps track of who is alive, persists zone data to
//! MongoDB and publishes replies and broadcasts back to each client's own
//! topic.
//!
//! ## Architecture Overview
//!
//! ### Core Components
//!
//! * **Dispatcher** - Single ingress point; decodes and routes by message type
//! * **Client Registry** - Concurrent map of client sessions with liveness
//! * **Services** - Heartbeat, player state, world, broadcast, auth and
//!   cleanup, each on its own queue and restarted in isolation
//! * **Supervisor** - Restarts crashed services with exponential backoff
//! * **Publisher** - Outbound path to client topics
//! * **Persistence Gateway** - Zone upserts and password checks
//!
//! ### Message Flow
//!
//! 1. A client publishes `{"client": "host:port:topic", "command": "...", "data": ...}`
//! 2. The dispatcher decodes it and refreshes the client's heartbeat
//! 3. The decoded message is queued for the service that owns its type
//! 4. The service updates the registry or the store and replies
//! 5. Replies go out as `{"type": "...", "data": ...}` to the client's topic
//!
//! ### Backends
//!
//! The bus and the store sit behind the [`Bus`] and [`DocumentStore`] traits:
//!
//! * [`NsqBus`] and [`MongoStore`] for production
//! * [`MemoryBus`] and [`MemoryStore`] for tests and local runs
//!
//! ## Error Handling
//!
//! Bad messages are dropped and logged, store failures are answered with an
//! `error` envelope, and only configuration problems and a service that keeps
//! crashing stop the hub (see [`HubError::is_fatal`]).

// Re-export core types and functions for easy access
pub use bus::{Bus, Destination, MemoryBus, NsqBus};
pub use config::HubConfig;
pub use error::HubError;
pub use messaging::{DispatchStats, HubMessage, Outbound};
pub use persistence::{DocumentStore, MemoryStore, MongoStore, PersistenceError, PersistenceGateway};
pub use registry::{ClientRegistry, ClientSession};
pub use server::HubServer;
pub use supervisor::{BackoffPolicy, SupervisorConfig};
pub use utils::{create_hub_with_store, create_memory_hub, create_nsq_hub};

// Public module declarations
pub mod bus;
pub mod config;
pub mod error;
pub mod messaging;
pub mod persistence;
pub mod publisher;
pub mod registry;
pub mod server;
pub mod services;
pub mod supervisor;
pub mod utils;

#[cfg(test)]
mod tests;
