//! Stage one of the rollup: turn every stored usage record into a queued
//! work item.

use crate::error::RollupError;
use crate::models::{RawUsageRecord, RolloutWorkItem};
use crate::queue::{Task, TaskQueue};
use crate::rollup::codec;
use crate::services::UsageStore;
use futures::TryStreamExt;
use serde_json::value::RawValue;
use std::sync::Arc;

pub const ROLLUP_QUEUE: &str = "asyncUsageRollup";
pub const ROLLUP_TASK_PATH: &str = "/asyncRollup";
pub const FANOUT_BATCH_SIZE: usize = 100;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanOutSummary {
    pub scanned: usize,
    pub queued: usize,
    pub skipped: usize,
    pub batches: usize,
}

pub struct FanOut {
    usage: Arc<dyn UsageStore>,
    queue: Arc<dyn TaskQueue>,
}

impl FanOut {
    pub fn new(usage: Arc<dyn UsageStore>, queue: Arc<dyn TaskQueue>) -> Self {
        Self { usage, queue }
    }

    /// Scan the whole usage table and queue one work item per record.
    ///
    /// Unreadable records are skipped. A failed enqueue or a failure to
    /// compress a work item aborts the scan; batches sent before it stay
    /// queued, so a rerun duplicates them.
    pub async fn run(&self) -> Result<FanOutSummary, RollupError> {
        let mut summary = FanOutSummary::default();
        let mut tasks = Vec::with_capacity(FANOUT_BATCH_SIZE);
        let mut records = self.usage.scan().await?;

        while let Some(record) = records.try_next().await? {
            summary.scanned += 1;

            match build_task(&record) {
                Ok(task) => tasks.push(task),
                Err(e) if skips_record(&e) => {
                    tracing::warn!(record_id = %record.id, error = %e, "Failed to repackage usage record");
                    summary.skipped += 1;
                    continue;
                }
                Err(e) => {
                    tracing::error!(record_id = %record.id, error = %e, "Error building work item");
                    return Err(e);
                }
            }

            if tasks.len() == FANOUT_BATCH_SIZE {
                self.dispatch(&mut tasks, &mut summary).await?;
            }
        }

        if !tasks.is_empty() {
            self.dispatch(&mut tasks, &mut summary).await?;
        }

        tracing::info!(
            scanned = summary.scanned,
            queued = summary.queued,
            skipped = summary.skipped,
            batches = summary.batches,
            "Fan-out complete"
        );
        Ok(summary)
    }

    async fn dispatch(
        &self,
        tasks: &mut Vec<Task>,
        summary: &mut FanOutSummary,
    ) -> Result<(), RollupError> {
        let batch = std::mem::replace(tasks, Vec::with_capacity(FANOUT_BATCH_SIZE));
        let size = batch.len();

        self.queue.add_multi(ROLLUP_QUEUE, batch).await.map_err(|e| {
            tracing::error!(error = %e, "Error queueing work items");
            e
        })?;

        summary.queued += size;
        summary.batches += 1;
        metrics::counter!("fanout_items_total").increment(size as u64);
        metrics::counter!("fanout_batches_total").increment(1);
        Ok(())
    }
}

/// Only a record whose own bytes are unreadable is skipped. Any other
/// failure is the service's and aborts the fan-out.
fn skips_record(err: &RollupError) -> bool {
    matches!(err, RollupError::CorruptPayload(_))
}

/// Re-wrap a stored record as a compressed work item. A stored body that is
/// not gzip or not JSON is `CorruptPayload`; failing to compress the new
/// item is a `DispatchFailure`.
pub fn build_task(record: &RawUsageRecord) -> Result<Task, RollupError> {
    let body = codec::decompress(&record.data)?;
    let body = String::from_utf8(body).map_err(|e| RollupError::corrupt("report is not utf-8", e))?;
    let raw_data =
        RawValue::from_string(body).map_err(|e| RollupError::corrupt("report is not json", e))?;

    let item = RolloutWorkItem {
        ip: record.addr.clone(),
        country: record.country.clone(),
        region: record.region.clone(),
        city: record.city.clone(),
        lat: record.lat,
        lon: record.lon,
        timestamp: record.timestamp,
        raw_data,
    };

    let json = serde_json::to_vec(&item)
        .map_err(|e| RollupError::corrupt("error marshaling work item", e))?;
    let payload = codec::compress(&json)
        .map_err(|e| RollupError::DispatchFailure(anyhow::anyhow!("error compressing work item: {}", e)))?;

    Ok(Task::new(ROLLUP_TASK_PATH, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::RecordingQueue;
    use crate::services::InMemoryStore;
    use chrono::{TimeZone, Utc};

    fn record(i: usize) -> RawUsageRecord {
        let body = format!(r#"{{"BoardsSeen":[{{"CPU":"cpu-{}"}}],"CurrentOS":"Arch Linux"}}"#, i);
        let mut rec = RawUsageRecord::new(
            codec::compress(body.as_bytes()).unwrap(),
            Utc.with_ymd_and_hms(2016, 1, 20, 12, 0, 0).unwrap(),
        );
        rec.addr = "192.0.2.7".to_string();
        rec.country = "US".to_string();
        rec.city = "Denver".to_string();
        rec.lat = 39.7;
        rec.lon = -104.9;
        rec
    }

    async fn store_with(n: usize) -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        for i in 0..n {
            store.insert(record(i)).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_batches_of_one_hundred_plus_remainder() {
        let store = store_with(250).await;
        let queue = Arc::new(RecordingQueue::new());

        let summary = FanOut::new(store, queue.clone()).run().await.unwrap();

        assert_eq!(queue.batch_sizes(), vec![100, 100, 50]);
        assert_eq!(summary.queued, 250);
        assert_eq!(summary.batches, 3);
    }

    #[tokio::test]
    async fn test_exact_multiple_has_no_empty_flush() {
        let store = store_with(200).await;
        let queue = Arc::new(RecordingQueue::new());

        FanOut::new(store, queue.clone()).run().await.unwrap();

        assert_eq!(queue.batch_sizes(), vec![100, 100]);
    }

    #[tokio::test]
    async fn test_empty_table_queues_nothing() {
        let queue = Arc::new(RecordingQueue::new());

        let summary = FanOut::new(Arc::new(InMemoryStore::new()), queue.clone())
            .run()
            .await
            .unwrap();

        assert!(queue.batch_sizes().is_empty());
        assert_eq!(summary, FanOutSummary::default());
    }

    #[tokio::test]
    async fn test_work_item_carries_record_fields_and_raw_body() {
        let store = store_with(1).await;
        let queue = Arc::new(RecordingQueue::new());

        FanOut::new(store, queue.clone()).run().await.unwrap();

        let tasks = queue.tasks();
        assert_eq!(tasks[0].path, ROLLUP_TASK_PATH);
        let json = codec::decompress(&tasks[0].payload).unwrap();
        let item: RolloutWorkItem = serde_json::from_slice(&json).unwrap();
        assert_eq!(item.ip, "192.0.2.7");
        assert_eq!(item.city, "Denver");
        assert_eq!(item.lat, 39.7);
        assert_eq!(item.timestamp, Utc.with_ymd_and_hms(2016, 1, 20, 12, 0, 0).unwrap());
        assert_eq!(
            item.raw_data.get(),
            r#"{"BoardsSeen":[{"CPU":"cpu-0"}],"CurrentOS":"Arch Linux"}"#
        );
    }

    #[tokio::test]
    async fn test_corrupt_records_are_skipped() {
        let store = store_with(3).await;
        let mut bad = record(99);
        bad.data = b"not gzip at all".to_vec();
        store.insert(bad).await.unwrap();
        let mut not_json = record(100);
        not_json.data = codec::compress(b"<xml/>").unwrap();
        store.insert(not_json).await.unwrap();
        let queue = Arc::new(RecordingQueue::new());

        let summary = FanOut::new(store, queue.clone()).run().await.unwrap();

        assert_eq!(summary.scanned, 5);
        assert_eq!(summary.skipped, 2);
        assert_eq!(queue.tasks().len(), 3);
    }

    #[tokio::test]
    async fn test_dispatch_failure_aborts_scan() {
        let store = store_with(250).await;
        let queue = Arc::new(RecordingQueue::failing_after(1));

        let err = FanOut::new(store, queue.clone()).run().await.unwrap_err();

        assert!(matches!(err, RollupError::DispatchFailure(_)));
        // The first batch stays queued.
        assert_eq!(queue.batch_sizes(), vec![100]);
    }

    #[test]
    fn test_only_corrupt_records_are_skippable() {
        assert!(skips_record(&RollupError::CorruptPayload("error ungzipping".into())));
        assert!(!skips_record(&RollupError::DispatchFailure(anyhow::anyhow!(
            "error compressing work item"
        ))));
        assert!(!skips_record(&RollupError::StoreUnavailable(anyhow::anyhow!(
            "scan cursor lost"
        ))));
    }
}
