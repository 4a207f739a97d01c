use crate::error::RollupError;
use crate::models::{FoundController, GitLabel, RawUsageRecord};
use crate::services::store::{ControllerStore, LabelSource, RecordStream, UsageStore};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use mongodb::{
    bson::{doc, Document},
    error::{ErrorKind, WriteFailure},
    options::{FindOptions, IndexOptions, ReplaceOptions},
    Client as MongoClient, Collection, Database, IndexModel,
};
use std::collections::HashMap;

const DUPLICATE_KEY: i32 = 11000;

#[derive(Clone)]
pub struct MongoDb {
    client: MongoClient,
    db: Database,
}

impl MongoDb {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, RollupError> {
        tracing::info!(database = %database, "Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB: {}", e);
            RollupError::from(e)
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub async fn initialize_indexes(&self) -> Result<(), RollupError> {
        tracing::info!("Creating MongoDB indexes for rollup-service");

        // Export and stats read controllers newest first
        let recency_index = IndexModel::builder()
            .keys(doc! { "timestamp": -1 })
            .options(
                IndexOptions::builder()
                    .name("controller_recency".to_string())
                    .build(),
            )
            .build();

        self.controllers()
            .create_index(recency_index, None)
            .await
            .map_err(|e| {
                tracing::error!(
                    "Failed to create recency index on found_controllers collection: {}",
                    e
                );
                RollupError::from(e)
            })?;
        tracing::info!("Created index on found_controllers.timestamp");

        let label_index = IndexModel::builder()
            .keys(doc! { "hash": 1 })
            .options(IndexOptions::builder().name("label_hash".to_string()).build())
            .build();

        self.labels()
            .create_index(label_index, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create hash index on git_labels collection: {}", e);
                RollupError::from(e)
            })?;
        tracing::info!("Created index on git_labels.hash");

        Ok(())
    }

    pub fn usage_stats(&self) -> Collection<RawUsageRecord> {
        self.db.collection("usage_stats")
    }

    pub fn controllers(&self) -> Collection<FoundController> {
        self.db.collection("found_controllers")
    }

    pub fn labels(&self) -> Collection<GitLabel> {
        self.db.collection("git_labels")
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    async fn put_versioned(&self, row: FoundController) -> Result<bool, RollupError> {
        let expected = row.version;
        let filter = version_filter(&row.uuid, expected);
        let options = ReplaceOptions::builder().upsert(expected == 0).build();
        let replacement = FoundController {
            version: expected + 1,
            ..row
        };

        match self
            .controllers()
            .replace_one(filter, &replacement, options)
            .await
        {
            // An upsert that matched nothing inserted the row.
            Ok(result) => Ok(result.matched_count == 1 || result.upserted_id.is_some()),
            // Upsert raced with another writer that created the row first.
            Err(e) if is_duplicate_key(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Rows written before versioning existed have no `version` field and
/// count as version 0.
fn version_filter(uuid: &str, expected: i64) -> Document {
    if expected == 0 {
        doc! {
            "_id": uuid,
            "$or": [ { "version": 0_i64 }, { "version": { "$exists": false } } ],
        }
    } else {
        doc! { "_id": uuid, "version": expected }
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(e)) if e.code == DUPLICATE_KEY
    )
}

#[async_trait]
impl UsageStore for MongoDb {
    async fn insert(&self, record: RawUsageRecord) -> Result<(), RollupError> {
        self.usage_stats().insert_one(record, None).await?;
        Ok(())
    }

    async fn scan(&self) -> Result<RecordStream<RawUsageRecord>, RollupError> {
        let cursor = self.usage_stats().find(doc! {}, None).await?;
        Ok(cursor.map_err(RollupError::from).boxed())
    }
}

#[async_trait]
impl ControllerStore for MongoDb {
    async fn get_multi(
        &self,
        uuids: &[String],
    ) -> Result<HashMap<String, FoundController>, RollupError> {
        if uuids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut cursor = self
            .controllers()
            .find(doc! { "_id": { "$in": uuids.to_vec() } }, None)
            .await?;

        let mut found = HashMap::with_capacity(uuids.len());
        while let Some(row) = cursor.try_next().await? {
            found.insert(row.uuid.clone(), row);
        }
        Ok(found)
    }

    async fn put_multi(&self, rows: Vec<FoundController>) -> Result<Vec<String>, RollupError> {
        let mut lost = Vec::new();
        for row in rows {
            let uuid = row.uuid.clone();
            if !self.put_versioned(row).await? {
                lost.push(uuid);
            }
        }
        Ok(lost)
    }

    async fn list_by_recency(&self) -> Result<RecordStream<FoundController>, RollupError> {
        let options = FindOptions::builder().sort(doc! { "timestamp": -1 }).build();
        let cursor = self.controllers().find(doc! {}, options).await?;
        Ok(cursor.map_err(RollupError::from).boxed())
    }

    async fn health_check(&self) -> Result<(), RollupError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB health check failed: {}", e);
                RollupError::from(e)
            })?;
        Ok(())
    }
}

#[async_trait]
impl LabelSource for MongoDb {
    async fn load_labels(&self) -> Result<Vec<GitLabel>, RollupError> {
        let cursor = self.labels().find(doc! {}, None).await?;
        Ok(cursor.try_collect().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_filter_for_new_rows_accepts_legacy_documents() {
        let filter = version_filter("abc", 0);
        assert_eq!(filter.get_str("_id").unwrap(), "abc");
        assert!(filter.get_array("$or").is_ok());
    }

    #[test]
    fn test_version_filter_pins_expected_version() {
        let filter = version_filter("abc", 7);
        assert_eq!(filter.get_i64("version").unwrap(), 7);
        assert!(filter.get("$or").is_none());
    }

    #[tokio::test]
    #[ignore] // Requires running MongoDB
    async fn test_versioned_put_detects_lost_race() {
        let db = MongoDb::connect("mongodb://localhost:27017", "rollup_test_versioned")
            .await
            .unwrap();
        let now = chrono::Utc::now();
        let row = FoundController::new("race".to_string(), now);

        assert!(db.put_multi(vec![row.clone()]).await.unwrap().is_empty());
        // Second writer still believes the row is new.
        assert_eq!(db.put_multi(vec![row]).await.unwrap(), vec!["race".to_string()]);

        db.database().drop(None).await.ok();
    }
}
