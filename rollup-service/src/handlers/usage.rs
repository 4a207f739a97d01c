use crate::middleware::ClientOrigin;
use crate::models::RawUsageRecord;
use crate::rollup::codec;
use crate::startup::AppState;
use axum::{body::Bytes, extract::State, http::StatusCode};
use chrono::Utc;
use serde::de::IgnoredAny;
use service_core::error::AppError;

/// Store one application usage report for the next rollup.
pub async fn ingest_usage(
    State(state): State<AppState>,
    origin: ClientOrigin,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    serde_json::from_slice::<IgnoredAny>(&body)
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("error decoding json: {}", e)))?;

    let data = codec::compress(&body)?;

    let mut record = RawUsageRecord::new(data, Utc::now());
    record.addr = origin.addr;
    record.country = origin.country;
    record.region = origin.region;
    record.city = origin.city;
    record.lat = origin.lat;
    record.lon = origin.lon;

    let record_id = record.id.clone();
    state.usage.insert(record).await.map_err(|e| {
        tracing::error!(error = %e, "Error storing usage record");
        AppError::from(e)
    })?;

    metrics::counter!("usage_records_ingested_total").increment(1);
    tracing::info!(record_id = %record_id, size = body.len(), "Stored usage record");

    Ok(StatusCode::NO_CONTENT)
}
