use service_core::error::AppError;
use thiserror::Error;

/// Failure modes of the rollup pipeline.
///
/// Sightings without any usable identity are not represented here; they are
/// skipped and counted by the merge engine.
#[derive(Error, Debug)]
pub enum RollupError {
    /// Malformed compressed or JSON data. Redelivery cannot fix it.
    #[error("Corrupt payload: {0}")]
    CorruptPayload(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(anyhow::Error),

    #[error("Dispatch failure: {0}")]
    DispatchFailure(anyhow::Error),

    /// Optimistic writes kept losing to concurrent rollups of the same rows.
    #[error("Write conflict on controller {0}")]
    WriteConflict(String),

    #[error("Cache error: {0}")]
    Cache(anyhow::Error),

    #[error("Export error: {0}")]
    Export(anyhow::Error),
}

impl RollupError {
    pub fn corrupt(context: &str, err: impl std::fmt::Display) -> Self {
        RollupError::CorruptPayload(format!("{}: {}", context, err))
    }

    /// Whether a redelivery of the same payload could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RollupError::CorruptPayload(_))
    }
}

impl From<mongodb::error::Error> for RollupError {
    fn from(err: mongodb::error::Error) -> Self {
        RollupError::StoreUnavailable(anyhow::Error::new(err))
    }
}

impl From<redis::RedisError> for RollupError {
    fn from(err: redis::RedisError) -> Self {
        RollupError::Cache(anyhow::Error::new(err))
    }
}

impl From<csv::Error> for RollupError {
    fn from(err: csv::Error) -> Self {
        RollupError::Export(anyhow::Error::new(err))
    }
}

impl From<RollupError> for AppError {
    fn from(err: RollupError) -> Self {
        match err {
            RollupError::CorruptPayload(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            RollupError::StoreUnavailable(e) => AppError::DatabaseError(e),
            RollupError::DispatchFailure(e) => AppError::QueueError(e),
            RollupError::WriteConflict(id) => {
                AppError::DatabaseError(anyhow::anyhow!("write conflict on controller {}", id))
            }
            RollupError::Cache(e) => AppError::CacheError(e),
            RollupError::Export(e) => AppError::InternalError(e),
        }
    }
}
