//! Process-local store used by tests and local runs without MongoDB.

use crate::error::RollupError;
use crate::models::{FoundController, GitLabel, RawUsageRecord};
use crate::services::store::{ControllerStore, LabelSource, RecordStream, UsageStore};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
pub struct InMemoryStore {
    usage: Mutex<Vec<RawUsageRecord>>,
    controllers: Mutex<HashMap<String, FoundController>>,
    labels: Mutex<Vec<GitLabel>>,
    fail_writes: AtomicBool,
    fail_labels: AtomicBool,
    forced_conflicts: AtomicU32,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_labels(labels: Vec<GitLabel>) -> Self {
        Self {
            labels: Mutex::new(labels),
            ..Self::default()
        }
    }

    /// Make every following write fail as if the store were down.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make label lookups fail as if the label collection were unreadable.
    pub fn set_fail_labels(&self, fail: bool) {
        self.fail_labels.store(fail, Ordering::SeqCst);
    }

    /// Report the next `n` batched writes as lost races without applying
    /// them, as a concurrent rollup of the same rows would.
    pub fn force_conflicts(&self, n: u32) {
        self.forced_conflicts.store(n, Ordering::SeqCst);
    }

    pub fn controller(&self, uuid: &str) -> Option<FoundController> {
        lock(&self.controllers).ok()?.get(uuid).cloned()
    }

    pub fn controller_count(&self) -> usize {
        lock(&self.controllers).map(|c| c.len()).unwrap_or(0)
    }

    pub fn usage_count(&self) -> usize {
        lock(&self.usage).map(|u| u.len()).unwrap_or(0)
    }

    fn check_writable(&self) -> Result<(), RollupError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RollupError::StoreUnavailable(anyhow::anyhow!(
                "in-memory store rejecting writes"
            )));
        }
        Ok(())
    }

    fn take_forced_conflict(&self) -> bool {
        self.forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, RollupError> {
    mutex
        .lock()
        .map_err(|e| RollupError::StoreUnavailable(anyhow::anyhow!("store mutex poisoned: {}", e)))
}

#[async_trait]
impl UsageStore for InMemoryStore {
    async fn insert(&self, record: RawUsageRecord) -> Result<(), RollupError> {
        self.check_writable()?;
        lock(&self.usage)?.push(record);
        Ok(())
    }

    async fn scan(&self) -> Result<RecordStream<RawUsageRecord>, RollupError> {
        let records = lock(&self.usage)?.clone();
        Ok(futures::stream::iter(records.into_iter().map(Ok)).boxed())
    }
}

#[async_trait]
impl ControllerStore for InMemoryStore {
    async fn get_multi(
        &self,
        uuids: &[String],
    ) -> Result<HashMap<String, FoundController>, RollupError> {
        let controllers = lock(&self.controllers)?;
        Ok(uuids
            .iter()
            .filter_map(|id| controllers.get(id).map(|row| (id.clone(), row.clone())))
            .collect())
    }

    async fn put_multi(&self, rows: Vec<FoundController>) -> Result<Vec<String>, RollupError> {
        self.check_writable()?;
        if self.take_forced_conflict() {
            return Ok(rows.into_iter().map(|row| row.uuid).collect());
        }

        let mut controllers = lock(&self.controllers)?;
        let mut lost = Vec::new();
        for row in rows {
            let stored_version = controllers.get(&row.uuid).map(|r| r.version);
            let wins = match stored_version {
                None => row.version == 0,
                Some(v) => v == row.version,
            };
            if wins {
                let next = FoundController {
                    version: row.version + 1,
                    ..row
                };
                controllers.insert(next.uuid.clone(), next);
            } else {
                lost.push(row.uuid);
            }
        }
        Ok(lost)
    }

    async fn list_by_recency(&self) -> Result<RecordStream<FoundController>, RollupError> {
        let mut rows: Vec<FoundController> = lock(&self.controllers)?.values().cloned().collect();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.uuid.cmp(&b.uuid)));
        Ok(futures::stream::iter(rows.into_iter().map(Ok)).boxed())
    }
}

#[async_trait]
impl LabelSource for InMemoryStore {
    async fn load_labels(&self) -> Result<Vec<GitLabel>, RollupError> {
        if self.fail_labels.load(Ordering::SeqCst) {
            return Err(RollupError::StoreUnavailable(anyhow::anyhow!(
                "in-memory label source unavailable"
            )));
        }
        Ok(lock(&self.labels)?.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_put_multi_rejects_stale_versions() {
        let store = InMemoryStore::new();
        let row = FoundController::new("a".to_string(), Utc::now());

        assert!(store.put_multi(vec![row.clone()]).await.unwrap().is_empty());
        assert_eq!(store.controller("a").unwrap().version, 1);

        // Same expected version again: someone else already wrote.
        let lost = store.put_multi(vec![row]).await.unwrap();
        assert_eq!(lost, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_forced_conflicts_are_consumed() {
        let store = InMemoryStore::new();
        store.force_conflicts(1);
        let row = FoundController::new("a".to_string(), Utc::now());

        assert_eq!(store.put_multi(vec![row.clone()]).await.unwrap().len(), 1);
        assert!(store.put_multi(vec![row]).await.unwrap().is_empty());
    }
}
