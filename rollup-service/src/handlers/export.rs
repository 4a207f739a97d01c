use crate::rollup::export::{self, GitLabels};
use crate::startup::AppState;
use axum::{extract::State, http::header, response::IntoResponse};
use service_core::error::AppError;

pub async fn export_boards(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let labels = match state.labels.load_labels().await {
        Ok(labels) => GitLabels::new(labels),
        Err(e) => {
            tracing::warn!(error = %e, "Couldn't resolve git labels");
            GitLabels::default()
        }
    };

    let body = export::export_boards(state.controllers.as_ref(), &labels).await?;

    Ok(([(header::CONTENT_TYPE, "text/plain")], body))
}
