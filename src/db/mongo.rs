//! MongoDB record store
//!
//! All logical collections share one `records` collection. Each stored
//! record is `{ _id: "<collection>/<id>", collection, version, data }`.
//! Commits run inside a MongoDB multi-document transaction (replica set
//! required) and re-check every read version before writing.

use async_trait::async_trait;
use bson::{doc, DateTime};
use futures::TryStreamExt;
use mongodb::{
    error::{Error as MongoError, TRANSIENT_TRANSACTION_ERROR},
    Client, ClientSession, Collection as MongoCollection, IndexModel,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::store::{
    merge_fields, Collection, CommitRequest, Document, RecordKey, RecordStore, Versioned, WriteOp,
};
use crate::types::{EngineError, Result};

/// Name of the backing MongoDB collection
pub const RECORDS_COLLECTION: &str = "records";

/// Shape of one record in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug)]
struct StoredRecord {
    #[serde(rename = "_id")]
    path: String,
    collection: String,
    version: i64,
    data: bson::Document,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime>,
}

impl StoredRecord {
    fn into_versioned(self) -> Result<Versioned> {
        let doc: Document = bson::from_document(self.data)
            .map_err(|e| EngineError::Store(format!("Failed to decode {}: {}", self.path, e)))?;
        Ok(Versioned {
            version: self.version.max(0) as u64,
            doc,
        })
    }
}

/// Record store backed by MongoDB
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    records: MongoCollection<StoredRecord>,
}

impl MongoStore {
    /// Connect, verify with a ping, and ensure indexes
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self> {
        info!("Connecting to MongoDB at {}", uri);

        // Use serverSelectionTimeoutMS to avoid hanging on unreachable MongoDB
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| EngineError::Store(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| EngineError::Store(format!("MongoDB ping failed: {}", e)))?;

        let records = client
            .database(db_name)
            .collection::<StoredRecord>(RECORDS_COLLECTION);

        records
            .create_index(IndexModel::builder().keys(doc! { "collection": 1 }).build())
            .await
            .map_err(|e| EngineError::Store(format!("Failed to create indexes: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self { client, records })
    }

    async fn read_in_session(
        &self,
        key: &RecordKey,
        session: &mut ClientSession,
    ) -> Result<Option<StoredRecord>> {
        self.records
            .find_one(doc! { "_id": key.path() })
            .session(session)
            .await
            .map_err(map_mongo_error)
    }

    async fn apply_in_session(
        &self,
        request: CommitRequest,
        session: &mut ClientSession,
    ) -> Result<()> {
        for (key, expected) in &request.reads {
            let actual = self
                .read_in_session(key, session)
                .await?
                .map(|r| r.version.max(0) as u64)
                .unwrap_or(0);
            if actual != *expected {
                return Err(CommitRequest::stale(key, *expected, actual));
            }
        }

        for (key, op) in request.writes {
            let current = self.read_in_session(&key, session).await?;
            let version = current.as_ref().map(|r| r.version).unwrap_or(0) + 1;

            let doc = match op {
                WriteOp::Set(doc) => doc,
                WriteOp::Update(fields) => {
                    let current = current
                        .ok_or_else(|| EngineError::NotFound(format!("{} (update target)", key)))?;
                    let mut doc = current.into_versioned()?.doc;
                    merge_fields(&mut doc, &fields);
                    doc
                }
            };

            let data = bson::to_document(&doc)
                .map_err(|e| EngineError::Store(format!("Failed to encode {}: {}", key, e)))?;

            let record = StoredRecord {
                path: key.path(),
                collection: key.collection.as_str().to_string(),
                version,
                data,
                updated_at: Some(DateTime::from_chrono(chrono::Utc::now())),
            };

            self.records
                .replace_one(doc! { "_id": key.path() }, record)
                .upsert(true)
                .session(&mut *session)
                .await
                .map_err(map_mongo_error)?;
        }

        Ok(())
    }
}

/// Transient transaction errors (write conflicts) are optimistic conflicts
fn map_mongo_error(e: MongoError) -> EngineError {
    if e.contains_label(TRANSIENT_TRANSACTION_ERROR) {
        EngineError::Conflict(format!("MongoDB transaction conflict: {}", e))
    } else {
        EngineError::Store(format!("MongoDB error: {}", e))
    }
}

#[async_trait]
impl RecordStore for MongoStore {
    fn backend(&self) -> &'static str {
        "mongo"
    }

    async fn get(&self, key: &RecordKey) -> Result<Option<Versioned>> {
        let found = self
            .records
            .find_one(doc! { "_id": key.path() })
            .await
            .map_err(map_mongo_error)?;

        found.map(StoredRecord::into_versioned).transpose()
    }

    async fn find_by_field(
        &self,
        collection: Collection,
        field: &str,
        value: &Value,
    ) -> Result<Vec<(String, Versioned)>> {
        let bson_value = bson::to_bson(value)
            .map_err(|e| EngineError::Store(format!("Failed to encode filter value: {}", e)))?;

        let mut filter = doc! { "collection": collection.as_str() };
        filter.insert(format!("data.{}", field), bson_value);

        let cursor = self.records.find(filter).await.map_err(map_mongo_error)?;
        let stored: Vec<StoredRecord> = cursor.try_collect().await.map_err(map_mongo_error)?;

        let prefix = format!("{}/", collection.as_str());
        let mut found = Vec::with_capacity(stored.len());
        for record in stored {
            let id = record
                .path
                .strip_prefix(&prefix)
                .unwrap_or(&record.path)
                .to_string();
            found.push((id, record.into_versioned()?));
        }
        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found)
    }

    async fn commit(&self, request: CommitRequest) -> Result<()> {
        let write_count = request.writes.len();

        let mut session = self.client.start_session().await.map_err(map_mongo_error)?;
        session.start_transaction().await.map_err(map_mongo_error)?;

        match self.apply_in_session(request, &mut session).await {
            Ok(()) => {
                session.commit_transaction().await.map_err(map_mongo_error)?;
                debug!(writes = write_count, "MongoDB commit applied");
                Ok(())
            }
            Err(e) => {
                if let Err(abort_err) = session.abort_transaction().await {
                    warn!("Failed to abort MongoDB transaction: {}", abort_err);
                }
                Err(e)
            }
        }
    }

    async fn shutdown(&self) -> Result<()> {
        info!("Closing MongoDB client");
        self.client.clone().shutdown().await;
        Ok(())
    }
}
