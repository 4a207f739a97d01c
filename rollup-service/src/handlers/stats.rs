use crate::models::StatsSummary;
use crate::rollup::stats::cached_summary;
use crate::startup::AppState;
use axum::{extract::State, Json};
use service_core::error::AppError;

pub async fn controller_stats(
    State(state): State<AppState>,
) -> Result<Json<StatsSummary>, AppError> {
    let summary = cached_summary(
        state.controllers.as_ref(),
        state.cache.as_ref(),
        state.stats_ttl_secs,
    )
    .await?;
    Ok(Json(summary))
}
