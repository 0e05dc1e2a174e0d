//! Client registry and session records.
//!
//! This module tracks every client the hub has heard from, their liveness and
//! their last known player state.

pub mod manager;
pub mod session;

pub use manager::ClientRegistry;
pub use session::{ClientAddress, ClientSession};

/// Type alias for client identifiers.
///
/// Identifiers are chosen by clients; the `host:port:topic` form doubles as
/// the outbound publish target.
pub type ClientId = String;

/// Reserved identifier used by the hub's own provisioning echo.
pub const SERVER_CLIENT_ID: &str = "server";
