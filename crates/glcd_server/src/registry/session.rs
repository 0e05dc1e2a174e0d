//! Client session representation.
//!
//! This module defines the hub's in-memory record of a connected client and
//! the parsed reachability information encoded in its identifier.

use super::ClientId;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Represents an individual client known to the hub.
///
/// Sessions are owned by the [`ClientRegistry`](super::ClientRegistry) and
/// handed out as clones; mutating a clone has no effect on the registry.
///
/// # Fields
///
/// * `client_id` - Identifier the client sends in every envelope
/// * `last_heartbeat` - When the hub last heard from the client
/// * `last_known_state` - Last `playerState` message received, if any
/// * `first_seen` - Wall-clock time the session was created
#[derive(Debug, Clone)]
pub struct ClientSession {
    /// Identifier the client sends in every envelope
    pub client_id: ClientId,

    /// When the hub last heard from this client
    pub last_heartbeat: Instant,

    /// The full last `playerState` message, replayed to late joiners
    pub last_known_state: Option<serde_json::Value>,

    /// Wall-clock creation time, for diagnostics
    pub first_seen: DateTime<Utc>,
}

impl ClientSession {
    /// Creates a new session with a fresh heartbeat and no state.
    pub fn new(client_id: impl Into<ClientId>) -> Self {
        Self {
            client_id: client_id.into(),
            last_heartbeat: Instant::now(),
            last_known_state: None,
            first_seen: Utc::now(),
        }
    }

    /// Returns the outbound publish target for this client, if its
    /// identifier has the `host:port:topic` form.
    pub fn address(&self) -> Option<ClientAddress> {
        ClientAddress::parse(&self.client_id)
    }
}

/// Reachability parsed from a `host:port:topic` client identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientAddress {
    /// The nsqd `host:port` the client consumes from
    pub node: String,
    /// The topic the client consumes
    pub topic: String,
}

impl ClientAddress {
    /// Splits a client identifier into its nsqd address and topic.
    ///
    /// Returns `None` unless the identifier has exactly three non-empty
    /// colon-separated parts and the middle one is a port number.
    pub fn parse(client_id: &str) -> Option<Self> {
        let mut parts = client_id.split(':');
        let (host, port, topic) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() || host.is_empty() || topic.is_empty() {
            return None;
        }
        port.parse::<u16>().ok()?;

        Some(Self {
            node: format!("{host}:{port}"),
            topic: topic.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_three_part_identifiers() {
        let addr = ClientAddress::parse("10.0.0.5:4151:arena").expect("valid address");
        assert_eq!(addr.node, "10.0.0.5:4151");
        assert_eq!(addr.topic, "arena");
    }

    #[test]
    fn rejects_malformed_identifiers() {
        for bad in [
            "C1",
            "10.0.0.5:4151",
            "10.0.0.5:4151:arena:extra",
            ":4151:arena",
            "10.0.0.5::arena",
            "10.0.0.5:4151:",
            "10.0.0.5:port:arena",
            "10.0.0.5:99999:arena",
        ] {
            assert!(ClientAddress::parse(bad).is_none(), "{bad} should be rejected");
        }
    }

    #[test]
    fn new_session_has_no_state() {
        let session = ClientSession::new("h:4150:t");
        assert!(session.last_known_state.is_none());
        assert_eq!(session.address().map(|a| a.topic), Some("t".to_string()));
    }
}
