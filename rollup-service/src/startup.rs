use crate::config::RollupConfig;
use crate::handlers;
use crate::queue::{DeliveryQueue, TaskQueue};
use crate::rollup::{RollupEngine, ROLLUP_TASK_PATH};
use crate::services::{
    ControllerStore, InMemoryStore, LabelSource, MongoDb, RedisStatsCache, StatsCache, UsageStore,
};
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{metrics_middleware, request_id_middleware};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Largest accepted usage report or work item.
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;
const DEFAULT_STATS_TTL_SECS: u64 = 300;
const DEFAULT_CONFLICT_RETRIES: u32 = 3;

#[derive(Clone)]
pub struct AppState {
    pub usage: Arc<dyn UsageStore>,
    pub controllers: Arc<dyn ControllerStore>,
    pub labels: Arc<dyn LabelSource>,
    pub cache: Arc<dyn StatsCache>,
    pub queue: Arc<dyn TaskQueue>,
    pub engine: RollupEngine,
    pub stats_ttl_secs: u64,
}

impl AppState {
    /// State backed entirely by one in-memory store.
    pub fn in_memory(
        store: Arc<InMemoryStore>,
        cache: Arc<dyn StatsCache>,
        queue: Arc<dyn TaskQueue>,
    ) -> Self {
        let engine = RollupEngine::new(store.clone(), cache.clone(), DEFAULT_CONFLICT_RETRIES);
        Self {
            usage: store.clone(),
            controllers: store.clone(),
            labels: store,
            cache,
            queue,
            engine,
            stats_ttl_secs: DEFAULT_STATS_TTL_SECS,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route("/usage", post(handlers::ingest_usage))
        .route("/admin/updateControllers", post(handlers::update_controllers))
        .route(ROLLUP_TASK_PATH, post(handlers::async_rollup))
        .route("/admin/exportBoards", get(handlers::export_boards))
        .route("/stats/controllers", get(handlers::controller_stats))
        .route_layer(middleware::from_fn(metrics_middleware))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

pub struct Application {
    port: u16,
    server: Box<dyn std::future::Future<Output = std::io::Result<()>> + Send + Unpin>,
    queue: DeliveryQueue,
}

impl Application {
    pub async fn build(config: RollupConfig) -> Result<Self, AppError> {
        let db = MongoDb::connect(&config.mongodb.uri, &config.mongodb.database)
            .await
            .map_err(AppError::from)?;
        db.initialize_indexes().await.map_err(|e| {
            tracing::error!("Failed to initialize database indexes: {}", e);
            AppError::from(e)
        })?;

        let cache = RedisStatsCache::new(&config.redis)
            .await
            .map_err(AppError::from)?;
        let cache: Arc<dyn StatsCache> = Arc::new(cache);

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        let mut queue_config = config.queue.clone();
        if config.common.port == 0 {
            // Ephemeral port: deliver to wherever we actually bound.
            queue_config.handler_base_url = format!("http://127.0.0.1:{}", port);
        }
        let (queue, workers) = DeliveryQueue::new(queue_config);
        tokio::spawn(workers.start());

        let db = Arc::new(db);
        let state = AppState {
            usage: db.clone(),
            controllers: db.clone(),
            labels: db.clone(),
            cache: cache.clone(),
            queue: Arc::new(queue.clone()),
            engine: RollupEngine::new(db, cache, config.rollup.max_conflict_retries),
            stats_ttl_secs: config.redis.stats_ttl_secs,
        };

        tracing::info!("Listening on {}", port);

        let server = axum::serve(listener, router(state))
            .with_graceful_shutdown(shutdown_signal());

        Ok(Self {
            port,
            server: Box::new(server.into_future()),
            queue,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let result = self.server.await;
        self.queue.shutdown();
        result
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
