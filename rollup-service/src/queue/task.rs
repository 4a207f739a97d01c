use crate::error::RollupError;
use async_trait::async_trait;
use std::sync::Mutex;

/// One unit of work: an opaque payload POSTed to `path` on delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub path: String,
    pub payload: Vec<u8>,
}

impl Task {
    pub fn new(path: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            payload,
        }
    }
}

/// At-least-once work queue. A task whose handler fails is delivered again.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue a batch. On error some tasks of the batch may already be
    /// queued.
    async fn add_multi(&self, queue: &str, tasks: Vec<Task>) -> Result<(), RollupError>;
}

/// Queue that only records what was added. Optionally fails starting at a
/// given batch.
#[derive(Default)]
pub struct RecordingQueue {
    pub batches: Mutex<Vec<(String, Vec<Task>)>>,
    fail_from_batch: Option<usize>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `n` batches, then reject every following one.
    pub fn failing_after(n: usize) -> Self {
        Self {
            fail_from_batch: Some(n),
            ..Self::default()
        }
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches
            .lock()
            .map(|b| b.iter().map(|(_, tasks)| tasks.len()).collect())
            .unwrap_or_default()
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.batches
            .lock()
            .map(|b| b.iter().flat_map(|(_, tasks)| tasks.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TaskQueue for RecordingQueue {
    async fn add_multi(&self, queue: &str, tasks: Vec<Task>) -> Result<(), RollupError> {
        let mut batches = self.batches.lock().map_err(|e| {
            RollupError::DispatchFailure(anyhow::anyhow!("Recording queue mutex poisoned: {}", e))
        })?;
        if self.fail_from_batch.is_some_and(|n| batches.len() >= n) {
            return Err(RollupError::DispatchFailure(anyhow::anyhow!(
                "queue {} rejected batch",
                queue
            )));
        }
        batches.push((queue.to_string(), tasks));
        Ok(())
    }
}
