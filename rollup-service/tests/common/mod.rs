#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use rollup_service::queue::{RecordingQueue, TaskQueue, QUEUE_NAME_HEADER};
use rollup_service::rollup::codec;
use rollup_service::services::{InMemoryStore, MockStatsCache};
use rollup_service::startup::{router, AppState};
use std::sync::Arc;
use tower::ServiceExt;

pub struct TestApp {
    pub router: Router,
    pub store: Arc<InMemoryStore>,
    pub cache: Arc<MockStatsCache>,
    pub queue: Arc<RecordingQueue>,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn text(&self) -> String {
        String::from_utf8(self.body.clone()).expect("response is not utf-8")
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("response is not json")
    }
}

impl TestApp {
    pub fn spawn() -> Self {
        Self::with_queue(RecordingQueue::new())
    }

    pub fn with_queue(queue: RecordingQueue) -> Self {
        Self::with_parts(InMemoryStore::new(), MockStatsCache::new(), queue)
    }

    pub fn with_store(store: InMemoryStore) -> Self {
        Self::with_parts(store, MockStatsCache::new(), RecordingQueue::new())
    }

    pub fn with_cache(cache: MockStatsCache) -> Self {
        Self::with_parts(InMemoryStore::new(), cache, RecordingQueue::new())
    }

    fn with_parts(store: InMemoryStore, cache: MockStatsCache, queue: RecordingQueue) -> Self {
        let store = Arc::new(store);
        let cache = Arc::new(cache);
        let queue = Arc::new(queue);
        let dyn_queue: Arc<dyn TaskQueue> = queue.clone();
        let state = AppState::in_memory(store.clone(), cache.clone(), dyn_queue);

        TestApp {
            router: router(state),
            store,
            cache,
            queue,
        }
    }

    pub async fn request(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to execute request");

        let status = response.status();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read body")
            .to_bytes()
            .to_vec();

        TestResponse {
            status,
            content_type,
            body,
        }
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.request(Request::get(path).body(Body::empty()).unwrap())
            .await
    }

    pub async fn post(&self, path: &str, body: Vec<u8>) -> TestResponse {
        self.request(Request::post(path).body(Body::from(body)).unwrap())
            .await
    }

    /// Submit a usage report the way the desktop application does.
    pub async fn submit_usage(&self, report: &serde_json::Value, addr: &str) -> TestResponse {
        self.request(
            Request::post("/usage")
                .header("content-type", "application/json")
                .header("x-forwarded-for", addr)
                .header("x-geo-country", "NZ")
                .header("x-geo-city", "Auckland")
                .header("x-geo-latlong", "-36.85,174.76")
                .body(Body::from(report.to_string()))
                .unwrap(),
        )
        .await
    }

    /// Play the queue: deliver every recorded task to its handler path,
    /// naming the queue it came from as the delivery workers do.
    pub async fn deliver_queued(&self) -> Vec<StatusCode> {
        let batches = self.queue.batches.lock().unwrap().clone();
        let mut statuses = Vec::new();
        for (queue, tasks) in batches {
            for task in tasks {
                statuses.push(self.deliver(&queue, &task.path, task.payload).await.status);
            }
        }
        statuses
    }

    pub async fn deliver(&self, queue: &str, path: &str, payload: Vec<u8>) -> TestResponse {
        self.request(
            Request::post(path)
                .header(QUEUE_NAME_HEADER, queue)
                .body(Body::from(payload))
                .unwrap(),
        )
        .await
    }
}

/// Compressed work item as the fan-out would produce it.
pub fn work_item(timestamp: &str, ip: &str, raw: serde_json::Value) -> Vec<u8> {
    let item = serde_json::json!({
        "IP": ip,
        "Country": "US",
        "Region": "CO",
        "City": "Denver",
        "Lat": 39.7,
        "Lon": -104.9,
        "Timestamp": timestamp,
        "RawData": raw,
    });
    codec::compress(item.to_string().as_bytes()).expect("compress work item")
}
