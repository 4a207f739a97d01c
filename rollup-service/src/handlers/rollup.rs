use crate::queue::QUEUE_NAME_HEADER;
use crate::rollup::{FanOut, ROLLUP_QUEUE};
use crate::startup::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use service_core::error::AppError;

/// Queue a rollup work item for every stored usage record.
pub async fn update_controllers(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    let fanout = FanOut::new(state.usage.clone(), state.queue.clone());
    fanout.run().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Queue delivery endpoint: one gzip-compressed JSON work item per request.
///
/// Deliveries name their queue in `x-queue-name`; anything routed here from
/// another queue is refused without retry. A request without the header is
/// treated as a manual replay.
pub async fn async_rollup(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    if let Some(queue) = headers.get(QUEUE_NAME_HEADER) {
        if queue.as_bytes() != ROLLUP_QUEUE.as_bytes() {
            tracing::warn!(queue = ?queue, "Rejecting task from unexpected queue");
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "tasks for {} are not accepted from other queues",
                ROLLUP_QUEUE
            )));
        }
    }

    let outcome = state.engine.handle_payload(&body).await.map_err(|e| {
        if e.is_retryable() {
            tracing::error!(error = %e, "Rollup failed, leaving item for redelivery");
        } else {
            tracing::warn!(error = %e, "Rejecting malformed rollup item");
            metrics::counter!("rollup_items_total", "outcome" => "rejected").increment(1);
        }
        AppError::from(e)
    })?;

    tracing::debug!(
        sightings = outcome.sightings,
        skipped = outcome.skipped,
        controllers = outcome.controllers,
        "Rollup item applied"
    );
    Ok(StatusCode::NO_CONTENT)
}
