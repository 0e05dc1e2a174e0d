//! The hub's supervised services.
//!
//! Each service consumes its own [`ServiceInbox`] and is stateless between
//! messages; shared state lives in the [`ClientRegistry`](crate::registry::ClientRegistry)
//! and the document store. Services reply through the
//! [`Publisher`](crate::publisher::Publisher).

pub mod broadcast;
pub mod cleanup;
pub mod heartbeat;
pub mod player_auth;
pub mod player_state;
pub mod world;

pub use broadcast::BroadcastService;
pub use cleanup::CleanupService;
pub use heartbeat::HeartbeatService;
pub use player_auth::PlayerAuthService;
pub use player_state::PlayerStateService;
pub use world::WorldService;

use crate::error::HubError;
use crate::messaging::{Inbound, Outbound, ServiceInbox};
use crate::persistence::PersistenceError;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Error codes carried in `error` replies and failed `playerAuth` replies.
pub mod codes {
    pub const ZONE_NOT_FOUND: &str = "zone_not_found";
    pub const STORE_UNAVAILABLE: &str = "store_unavailable";
    pub const UNKNOWN_USER: &str = "unknown_user";
    pub const INVALID_PASSWORD: &str = "invalid_password";
    pub const MALFORMED_RECORD: &str = "malformed_record";
}

/// Feeds messages from `inbox` to `handle` until shutdown or until every
/// sender is gone.
///
/// The inbox lock is held for the whole run, so only one instance of a
/// service ever consumes it. Shutdown is only observed between messages.
pub(crate) async fn serve<F, Fut>(
    inbox: &ServiceInbox,
    shutdown: &CancellationToken,
    mut handle: F,
) -> Result<(), HubError>
where
    F: FnMut(Inbound) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut inbox = inbox.lock().await;
    loop {
        let inbound = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(()),
            next = inbox.recv() => match next {
                Some(inbound) => inbound,
                None => return Ok(()),
            },
        };
        handle(inbound).await;
    }
}

/// Turns a store failure into the reply the requesting client sees.
pub(crate) fn store_failure(context: &str, err: &PersistenceError) -> Outbound {
    error!("💾 Store failure while {}: {}", context, err);
    Outbound::error(codes::STORE_UNAVAILABLE, format!("Could not {context}: {err}"))
}
