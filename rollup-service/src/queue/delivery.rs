use crate::config::QueueConfig;
use crate::error::RollupError;
use crate::queue::task::{Task, TaskQueue};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

pub const QUEUE_NAME_HEADER: &str = "x-queue-name";

#[derive(Debug)]
struct QueuedTask {
    queue: String,
    task: Task,
}

/// In-process queue that delivers each task by POSTing its payload to the
/// handler base URL. Failed deliveries are retried with exponential backoff;
/// 4xx answers mean the handler rejected the payload for good.
#[derive(Clone)]
pub struct DeliveryQueue {
    tx: mpsc::Sender<QueuedTask>,
    shutdown_token: CancellationToken,
}

pub struct DeliveryWorkers {
    config: QueueConfig,
    rx: mpsc::Receiver<QueuedTask>,
    client: reqwest::Client,
    shutdown_token: CancellationToken,
}

impl DeliveryQueue {
    pub fn new(config: QueueConfig) -> (Self, DeliveryWorkers) {
        let (tx, rx) = mpsc::channel(config.queue_size.max(1));
        let shutdown_token = CancellationToken::new();

        let queue = Self {
            tx,
            shutdown_token: shutdown_token.clone(),
        };
        let workers = DeliveryWorkers {
            config,
            rx,
            client: reqwest::Client::new(),
            shutdown_token,
        };

        (queue, workers)
    }

    pub fn shutdown(&self) {
        tracing::info!("Initiating delivery queue shutdown");
        self.shutdown_token.cancel();
    }
}

#[async_trait]
impl TaskQueue for DeliveryQueue {
    async fn add_multi(&self, queue: &str, tasks: Vec<Task>) -> Result<(), RollupError> {
        let count = tasks.len();
        for task in tasks {
            self.tx
                .send(QueuedTask {
                    queue: queue.to_string(),
                    task,
                })
                .await
                .map_err(|_| {
                    RollupError::DispatchFailure(anyhow::anyhow!(
                        "delivery queue {} is not accepting tasks",
                        queue
                    ))
                })?;
        }
        tracing::debug!(queue = %queue, count, "Queued tasks");
        Ok(())
    }
}

impl DeliveryWorkers {
    pub async fn start(self) {
        if !self.config.enabled {
            tracing::info!("Task delivery disabled by configuration");
            return;
        }

        tracing::info!(
            worker_count = self.config.worker_count,
            base_url = %self.config.handler_base_url,
            "Starting delivery workers"
        );

        let rx = Arc::new(Mutex::new(self.rx));
        for worker_id in 0..self.config.worker_count.max(1) {
            let worker = Worker {
                id: worker_id,
                rx: rx.clone(),
                client: self.client.clone(),
                config: self.config.clone(),
                shutdown: self.shutdown_token.clone(),
            };
            tokio::spawn(worker.run());
        }
    }
}

struct Worker {
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<QueuedTask>>>,
    client: reqwest::Client,
    config: QueueConfig,
    shutdown: CancellationToken,
}

impl Worker {
    async fn run(self) {
        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => None,
                job = async { self.rx.lock().await.recv().await } => job,
            };
            match next {
                Some(job) => self.deliver(job).await,
                None => {
                    tracing::info!(worker_id = self.id, "Delivery worker exiting");
                    break;
                }
            }
        }
    }

    async fn deliver(&self, job: QueuedTask) {
        let start = Instant::now();
        let url = format!(
            "{}{}",
            self.config.handler_base_url.trim_end_matches('/'),
            job.task.path
        );

        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.config.max_retry_elapsed()),
            ..Default::default()
        };

        let result = retry(backoff, || async {
            let response = self
                .client
                .post(&url)
                .header(QUEUE_NAME_HEADER, job.queue.as_str())
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(job.task.payload.clone())
                .send()
                .await
                .map_err(|e| backoff::Error::transient(anyhow::anyhow!(e)))?;

            let status = response.status();
            if status.is_success() {
                Ok(())
            } else if status.is_client_error() {
                let body = response.text().await.unwrap_or_default();
                Err(backoff::Error::permanent(anyhow::anyhow!(
                    "handler rejected task: {} {}",
                    status,
                    body
                )))
            } else {
                tracing::warn!(worker_id = self.id, url = %url, status = %status, "Delivery failed, will retry");
                Err(backoff::Error::transient(anyhow::anyhow!(
                    "handler failed: {}",
                    status
                )))
            }
        })
        .await;

        match result {
            Ok(()) => {
                metrics::counter!("queue_deliveries_total", "outcome" => "delivered").increment(1);
                tracing::debug!(
                    worker_id = self.id,
                    queue = %job.queue,
                    duration_ms = start.elapsed().as_millis(),
                    "Task delivered"
                );
            }
            Err(e) => {
                metrics::counter!("queue_deliveries_total", "outcome" => "dropped").increment(1);
                tracing::error!(
                    worker_id = self.id,
                    queue = %job.queue,
                    url = %url,
                    error = %e,
                    "Dropping task after failed delivery"
                );
            }
        }
    }
}
