//! Zone and auth operations on top of a [`DocumentStore`].

use super::auth;
use super::{DocumentStore, PersistenceError, Zone};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// The only path services use to reach durable storage.
///
/// Cloning is cheap; clones share the store.
#[derive(Clone)]
pub struct PersistenceGateway {
    store: Arc<dyn DocumentStore>,
    auth_secret: Arc<[u8]>,
}

impl PersistenceGateway {
    /// Creates a gateway over `store`, using `auth_secret` as the password
    /// digest key.
    pub fn new(store: Arc<dyn DocumentStore>, auth_secret: &str) -> Self {
        Self {
            store,
            auth_secret: Arc::from(auth_secret.as_bytes()),
        }
    }

    /// Returns every zone. An empty world is not an error.
    pub async fn list_zones(&self) -> Result<Vec<Zone>, PersistenceError> {
        self.store.find_zones().await
    }

    /// Looks up one zone by name.
    ///
    /// # Errors
    ///
    /// [`PersistenceError::NotFound`] if there is no such zone. The read path
    /// never creates zones.
    pub async fn get_zone(&self, name: &str) -> Result<Zone, PersistenceError> {
        self.store
            .find_zone(name)
            .await?
            .ok_or_else(|| PersistenceError::NotFound(format!("zone '{name}'")))
    }

    /// Writes `data` as zone `name`, creating the zone on first write.
    ///
    /// Existing zones keep their id. A new zone takes the next id from the
    /// zone sequence; if a concurrent writer creates it first, that writer's
    /// id is kept and the sequence value is simply skipped.
    pub async fn upsert_zone(&self, name: &str, data: &Value) -> Result<(), PersistenceError> {
        let now = Utc::now();
        if self.store.update_zone(name, data, now).await? {
            debug!(zone = name, "Updated existing zone");
            return Ok(());
        }

        let id = self.store.next_zone_id().await?;
        self.store.insert_zone_if_absent(name, data, now, id).await?;
        info!(zone = name, id, "🗺️ Created zone");
        Ok(())
    }

    /// Checks a password against the stored auth record.
    ///
    /// Returns `Ok(false)` only when the user exists and the password does
    /// not match.
    ///
    /// # Errors
    ///
    /// * [`PersistenceError::NotFound`] - no record for `user`
    /// * [`PersistenceError::Unavailable`] - the store could not be queried
    /// * [`PersistenceError::Malformed`] - the stored hash is unusable
    pub async fn verify_password(&self, user: &str, password: &str) -> Result<bool, PersistenceError> {
        let record = self
            .store
            .find_auth(user)
            .await?
            .ok_or_else(|| PersistenceError::NotFound(format!("user '{user}'")))?;

        auth::verify(&self.auth_secret, &record, password).map_err(PersistenceError::from)
    }

    /// Checks that the underlying store is reachable.
    pub async fn ping(&self) -> Result<(), PersistenceError> {
        self.store.ping().await
    }
}

impl std::fmt::Debug for PersistenceGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceGateway").finish_non_exhaustive()
    }
}
