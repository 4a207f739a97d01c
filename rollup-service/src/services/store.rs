//! Storage seams for the rollup. Handlers and the pipeline only see these
//! traits; MongoDB and the in-memory store implement them.

use crate::error::RollupError;
use crate::models::{FoundController, GitLabel, RawUsageRecord};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;

pub type RecordStream<T> = BoxStream<'static, Result<T, RollupError>>;

#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn insert(&self, record: RawUsageRecord) -> Result<(), RollupError>;

    /// Every raw usage record, unfiltered and unordered.
    async fn scan(&self) -> Result<RecordStream<RawUsageRecord>, RollupError>;
}

#[async_trait]
pub trait ControllerStore: Send + Sync {
    /// Rows for the given identities. Missing identities are simply absent.
    async fn get_multi(
        &self,
        uuids: &[String],
    ) -> Result<HashMap<String, FoundController>, RollupError>;

    /// Write each row only if the stored version still equals `row.version`
    /// (for `version == 0`: only if the row does not exist yet). The stored
    /// version is bumped on success.
    ///
    /// Returns the identities whose write lost a race. Any other failure
    /// aborts the batch with an error.
    async fn put_multi(&self, rows: Vec<FoundController>) -> Result<Vec<String>, RollupError>;

    /// All rows, most recently seen first.
    async fn list_by_recency(&self) -> Result<RecordStream<FoundController>, RollupError>;

    async fn health_check(&self) -> Result<(), RollupError> {
        Ok(())
    }
}

#[async_trait]
pub trait LabelSource: Send + Sync {
    async fn load_labels(&self) -> Result<Vec<GitLabel>, RollupError>;
}
