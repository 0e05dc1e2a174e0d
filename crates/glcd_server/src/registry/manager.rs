//! Client registry for tracking sessions and liveness.
//!
//! This module provides the central store for every client the hub has heard
//! from. Every operation is a single atomic step on the backing map, so two
//! services seeing the same client at the same time can never lose an update.

use super::{session::ClientSession, ClientId};
use dashmap::{mapref::entry::Entry, DashMap};
use tokio::time::Instant;
use tracing::{debug, info};

/// Central registry for all known clients.
///
/// The `ClientRegistry` is shared by the dispatcher and every service behind
/// an `Arc`. The backing map is never exposed; callers get cloned
/// [`ClientSession`] snapshots and mutate only through the methods below.
///
/// # Architecture
///
/// * Uses a sharded `DashMap` so unrelated clients never contend
/// * Compound operations (create-or-refresh, evict-if-stale) run under the
///   shard lock of the affected entry
#[derive(Debug, Default)]
pub struct ClientRegistry {
    sessions: DashMap<ClientId, ClientSession>,
}

impl ClientRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the session for `client_id`, creating it if absent.
    ///
    /// An existing session is returned unchanged; its heartbeat is not
    /// refreshed.
    pub fn upsert(&self, client_id: &str) -> ClientSession {
        self.sessions
            .entry(client_id.to_string())
            .or_insert_with(|| {
                debug!(client = client_id, "session created");
                ClientSession::new(client_id)
            })
            .clone()
    }

    /// Refreshes the heartbeat of `client_id`, creating the session if absent.
    ///
    /// # Returns
    ///
    /// `true` if this call created the session.
    pub fn touch(&self, client_id: &str) -> bool {
        match self.sessions.entry(client_id.to_string()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().last_heartbeat = Instant::now();
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(ClientSession::new(client_id));
                info!(client = client_id, "👋 New client session");
                true
            }
        }
    }

    /// Stores `state` as the client's last known player state and refreshes
    /// its heartbeat, creating the session if absent.
    pub fn record_state(&self, client_id: &str, state: serde_json::Value) {
        let mut session = self
            .sessions
            .entry(client_id.to_string())
            .or_insert_with(|| ClientSession::new(client_id));
        session.last_heartbeat = Instant::now();
        session.last_known_state = Some(state);
    }

    /// Removes a client from the registry.
    ///
    /// # Returns
    ///
    /// The removed session, or `None` if the client was unknown.
    pub fn remove(&self, client_id: &str) -> Option<ClientSession> {
        self.sessions.remove(client_id).map(|(_, session)| session)
    }

    /// Returns a snapshot of one session.
    pub fn get(&self, client_id: &str) -> Option<ClientSession> {
        self.sessions.get(client_id).map(|s| s.clone())
    }

    /// Whether the registry currently holds `client_id`.
    pub fn contains(&self, client_id: &str) -> bool {
        self.sessions.contains_key(client_id)
    }

    /// Returns a snapshot of every session. Order is unspecified.
    pub fn snapshot_all(&self) -> Vec<ClientSession> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Removes every session whose last heartbeat is strictly before `cutoff`.
    ///
    /// The cutoff is fixed by the caller, so a heartbeat that lands while the
    /// sweep is running keeps its client alive: each entry is checked and
    /// removed under its own shard lock.
    ///
    /// # Returns
    ///
    /// The identifiers of the removed clients.
    pub fn evict_stale(&self, cutoff: Instant) -> Vec<ClientId> {
        let mut evicted = Vec::new();
        self.sessions.retain(|client_id, session| {
            if session.last_heartbeat < cutoff {
                evicted.push(client_id.clone());
                false
            } else {
                true
            }
        });
        evicted
    }

    /// Number of known clients.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no clients are known.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
