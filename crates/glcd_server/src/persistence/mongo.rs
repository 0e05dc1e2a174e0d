//! MongoDB document store.
//!
//! Collections:
//!
//! * `zones` - one document per zone, unique on `zone`
//! * `auth` - one document per user
//! * `counters` - `{_id: "zones", seq}` backing the zone id sequence

use super::{AuthRecord, DocumentStore, PersistenceError, Zone, ZONE_DOCUMENT_TYPE};
use async_trait::async_trait;
use bson::{doc, Document};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{
    FindOneAndUpdateOptions, IndexOptions, ReturnDocument, UpdateOptions,
};
use mongodb::{Client, Collection, Database, IndexModel};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

const ZONES: &str = "zones";
const AUTH: &str = "auth";
const COUNTERS: &str = "counters";
const DUPLICATE_KEY: i32 = 11000;

/// Zone as laid out in the `zones` collection, with a native BSON date.
#[derive(Debug, Serialize, Deserialize)]
struct ZoneDocument {
    zone: String,
    zdata: Value,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    timestamp: DateTime<Utc>,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    id: i64,
}

impl From<ZoneDocument> for Zone {
    fn from(doc: ZoneDocument) -> Self {
        Zone::new(doc.zone, doc.zdata, doc.timestamp, doc.id)
    }
}

#[derive(Debug, Deserialize)]
struct Counter {
    seq: i64,
}

/// Document store backed by a MongoDB database.
#[derive(Debug, Clone)]
pub struct MongoStore {
    db: Database,
    zones: Collection<ZoneDocument>,
    auth: Collection<AuthRecord>,
    counters: Collection<Document>,
}

impl MongoStore {
    /// Connects to `uri` and prepares the collections.
    ///
    /// The driver connects lazily; call [`DocumentStore::ping`] to find out
    /// whether the server is actually reachable.
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self, PersistenceError> {
        let client = Client::with_uri_str(uri).await.map_err(unavailable)?;
        let db = client.database(db_name);
        info!("🗄️ Using MongoDB database '{}'", db_name);

        Ok(Self {
            zones: db.collection(ZONES),
            auth: db.collection(AUTH),
            counters: db.collection(COUNTERS),
            db,
        })
    }

    /// Creates the unique index on zone names.
    ///
    /// Without it two first-writes of one zone racing each other could both
    /// insert.
    pub async fn ensure_indexes(&self) -> Result<(), PersistenceError> {
        let index = IndexModel::builder()
            .keys(doc! { "zone": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.zones.create_index(index, None).await.map_err(unavailable)?;
        debug!("Ensured unique index on {}.zone", ZONES);
        Ok(())
    }

    fn zone_update(data: &Value, timestamp: DateTime<Utc>) -> Result<Document, PersistenceError> {
        let zdata = bson::to_bson(data)
            .map_err(|e| PersistenceError::Malformed(format!("zone data: {e}")))?;
        Ok(doc! {
            "zdata": zdata,
            "timestamp": bson::DateTime::from_chrono(timestamp),
            "type": ZONE_DOCUMENT_TYPE,
        })
    }
}

fn unavailable(err: mongodb::error::Error) -> PersistenceError {
    PersistenceError::Unavailable(err.to_string())
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY
    )
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn find_zones(&self) -> Result<Vec<Zone>, PersistenceError> {
        let cursor = self
            .zones
            .find(doc! { "type": ZONE_DOCUMENT_TYPE }, None)
            .await
            .map_err(unavailable)?;
        let docs: Vec<ZoneDocument> = cursor.try_collect().await.map_err(unavailable)?;
        Ok(docs.into_iter().map(Zone::from).collect())
    }

    async fn find_zone(&self, name: &str) -> Result<Option<Zone>, PersistenceError> {
        let found = self
            .zones
            .find_one(doc! { "zone": name }, None)
            .await
            .map_err(unavailable)?;
        Ok(found.map(Zone::from))
    }

    async fn update_zone(
        &self,
        name: &str,
        data: &Value,
        timestamp: DateTime<Utc>,
    ) -> Result<bool, PersistenceError> {
        let set = Self::zone_update(data, timestamp)?;
        let result = self
            .zones
            .update_one(doc! { "zone": name }, doc! { "$set": set }, None)
            .await
            .map_err(unavailable)?;
        Ok(result.matched_count > 0)
    }

    async fn insert_zone_if_absent(
        &self,
        name: &str,
        data: &Value,
        timestamp: DateTime<Utc>,
        id: i64,
    ) -> Result<(), PersistenceError> {
        let set = Self::zone_update(data, timestamp)?;
        let update = doc! { "$set": set, "$setOnInsert": { "id": id } };
        let options = UpdateOptions::builder().upsert(true).build();

        match self
            .zones
            .update_one(doc! { "zone": name }, update, options)
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_duplicate_key(&err) => {
                // Lost the insert race; the winner's id stands.
                warn!(zone = name, "Concurrent zone insert, retrying as update");
                self.update_zone(name, data, timestamp).await.map(|_| ())
            }
            Err(err) => Err(unavailable(err)),
        }
    }

    async fn next_zone_id(&self) -> Result<i64, PersistenceError> {
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();
        let counter = self
            .counters
            .find_one_and_update(doc! { "_id": ZONES }, doc! { "$inc": { "seq": 1_i64 } }, options)
            .await
            .map_err(unavailable)?
            .ok_or_else(|| PersistenceError::Malformed("zone counter missing after upsert".into()))?;

        let counter: Counter = bson::from_document(counter)
            .map_err(|e| PersistenceError::Malformed(format!("zone counter: {e}")))?;
        Ok(counter.seq)
    }

    async fn find_auth(&self, user: &str) -> Result<Option<AuthRecord>, PersistenceError> {
        self.auth
            .find_one(doc! { "user": user }, None)
            .await
            .map_err(unavailable)
    }

    async fn ping(&self) -> Result<(), PersistenceError> {
        self.db
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map(|_| ())
            .map_err(unavailable)
    }
}
