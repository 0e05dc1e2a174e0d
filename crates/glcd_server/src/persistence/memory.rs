//! In-process document store.
//!
//! Used by tests and by `glcd --memory-store` for running without MongoDB.
//! Zones are returned ordered by id, which matches insertion order.

use super::{AuthRecord, DocumentStore, PersistenceError, Zone};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

#[derive(Debug, Default)]
pub struct MemoryStore {
    zones: DashMap<String, Zone>,
    auth: DashMap<String, AuthRecord>,
    zone_seq: AtomicI64,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an auth record.
    pub fn insert_auth(&self, record: AuthRecord) {
        self.auth.insert(record.user.clone(), record);
    }

    /// Makes every subsequent call fail with [`PersistenceError::Unavailable`]
    /// until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), PersistenceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(PersistenceError::Unavailable("memory store offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find_zones(&self) -> Result<Vec<Zone>, PersistenceError> {
        self.check()?;
        let mut zones: Vec<Zone> = self.zones.iter().map(|z| z.value().clone()).collect();
        zones.sort_by_key(|z| z.id);
        Ok(zones)
    }

    async fn find_zone(&self, name: &str) -> Result<Option<Zone>, PersistenceError> {
        self.check()?;
        Ok(self.zones.get(name).map(|z| z.value().clone()))
    }

    async fn update_zone(
        &self,
        name: &str,
        data: &Value,
        timestamp: DateTime<Utc>,
    ) -> Result<bool, PersistenceError> {
        self.check()?;
        match self.zones.get_mut(name) {
            Some(mut zone) => {
                zone.data = data.clone();
                zone.timestamp = timestamp;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_zone_if_absent(
        &self,
        name: &str,
        data: &Value,
        timestamp: DateTime<Utc>,
        id: i64,
    ) -> Result<(), PersistenceError> {
        self.check()?;
        match self.zones.entry(name.to_string()) {
            Entry::Occupied(mut existing) => {
                let zone = existing.get_mut();
                zone.data = data.clone();
                zone.timestamp = timestamp;
            }
            Entry::Vacant(slot) => {
                slot.insert(Zone::new(name, data.clone(), timestamp, id));
            }
        }
        Ok(())
    }

    async fn next_zone_id(&self) -> Result<i64, PersistenceError> {
        self.check()?;
        Ok(self.zone_seq.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn find_auth(&self, user: &str) -> Result<Option<AuthRecord>, PersistenceError> {
        self.check()?;
        Ok(self.auth.get(user).map(|r| r.value().clone()))
    }

    async fn ping(&self) -> Result<(), PersistenceError> {
        self.check()
    }
}
