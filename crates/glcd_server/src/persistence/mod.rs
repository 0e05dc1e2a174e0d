//! Durable world data.
//!
//! The hub persists two kinds of document: zones (world data blobs keyed by
//! name) and auth records (read-only credentials keyed by user). Services
//! never talk to a store directly; they go through the
//! [`PersistenceGateway`], which owns id allocation, timestamps and the
//! password check. Backends implement [`DocumentStore`].

pub mod auth;
pub mod gateway;
pub mod memory;
pub mod mongo;

pub use gateway::PersistenceGateway;
pub use memory::MemoryStore;
pub use mongo::MongoStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Value of the `type` field on every zone document.
pub const ZONE_DOCUMENT_TYPE: &str = "zone";

/// Errors surfaced by document stores.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PersistenceError {
    /// The requested document does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The store could not be reached or rejected the operation
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored document does not have the expected shape
    #[error("malformed record: {0}")]
    Malformed(String),
}

/// A named blob of world data.
///
/// Field names on the wire and in the store are the legacy ones
/// (`zone`, `zdata`), so existing clients and databases keep working.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    #[serde(rename = "zone")]
    pub name: String,

    #[serde(rename = "zdata")]
    pub data: Value,

    /// Time of the last write
    pub timestamp: DateTime<Utc>,

    #[serde(rename = "type", default = "zone_type")]
    pub kind: String,

    /// Assigned once, on first insert
    pub id: i64,
}

fn zone_type() -> String {
    ZONE_DOCUMENT_TYPE.to_string()
}

impl Zone {
    pub fn new(name: impl Into<String>, data: Value, timestamp: DateTime<Utc>, id: i64) -> Self {
        Self {
            name: name.into(),
            data,
            timestamp,
            kind: zone_type(),
            id,
        }
    }
}

/// Stored credentials for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRecord {
    pub user: String,

    /// Hex digest; see [`auth`] for the scheme
    #[serde(rename = "passwordHash")]
    pub password_hash: String,

    #[serde(default)]
    pub salt: String,
}

/// Storage backend for zones and auth records.
///
/// Implementations only provide primitives; the [`PersistenceGateway`]
/// composes them into the upsert and verification flows.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Every zone document, in store order.
    async fn find_zones(&self) -> Result<Vec<Zone>, PersistenceError>;

    /// The zone named `name`, if any.
    async fn find_zone(&self, name: &str) -> Result<Option<Zone>, PersistenceError>;

    /// Overwrites data and timestamp of an existing zone.
    ///
    /// Returns `false` when no zone named `name` exists; nothing is written
    /// in that case.
    async fn update_zone(
        &self,
        name: &str,
        data: &Value,
        timestamp: DateTime<Utc>,
    ) -> Result<bool, PersistenceError>;

    /// Writes the zone, creating it with `id` if it does not exist.
    ///
    /// If another writer created the zone first, its id is kept and only the
    /// data and timestamp are overwritten.
    async fn insert_zone_if_absent(
        &self,
        name: &str,
        data: &Value,
        timestamp: DateTime<Utc>,
        id: i64,
    ) -> Result<(), PersistenceError>;

    /// Takes the next value of the zone id sequence.
    async fn next_zone_id(&self) -> Result<i64, PersistenceError>;

    /// The auth record for `user`, if any.
    async fn find_auth(&self, user: &str) -> Result<Option<AuthRecord>, PersistenceError>;

    /// Checks that the store is reachable.
    async fn ping(&self) -> Result<(), PersistenceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn zone_uses_legacy_field_names() {
        let at = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .expect("valid timestamp")
            .with_timezone(&Utc);
        let zone = Zone::new("town", json!({"tiles": [1]}), at, 3);
        let wire = serde_json::to_value(&zone).expect("serializes");

        assert_eq!(wire["zone"], "town");
        assert_eq!(wire["zdata"], json!({"tiles": [1]}));
        assert_eq!(wire["type"], "zone");
        assert_eq!(wire["id"], 3);
        assert!(wire.get("name").is_none());
    }

    #[test]
    fn auth_record_salt_is_optional() {
        let record: AuthRecord =
            serde_json::from_value(json!({"user": "bob", "passwordHash": "ab"})).expect("parses");
        assert_eq!(record.salt, "");
    }
}
