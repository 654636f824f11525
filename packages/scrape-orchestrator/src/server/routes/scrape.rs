use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::error::{OrchestratorError, StatusError};
use crate::server::app::AppState;
use crate::types::JobId;

/// POST /scrape/start
///
/// Creates a job over the whole corpus and returns as soon as the job
/// record exists; crawling continues in the background.
pub async fn start_scrape_handler(Extension(state): Extension<AppState>) -> Response {
    match state.orchestrator.start_job().await {
        Ok(job) => (StatusCode::OK, Json(job.started())).into_response(),
        Err(OrchestratorError::EmptyCorpus) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "URLs are required" })),
        )
            .into_response(),
        Err(OrchestratorError::SourceUnavailable(e)) => {
            error!(error = %e, "cannot start scrape job");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "Domain store unavailable" })),
            )
                .into_response()
        }
        Err(e) => {
            error!(error = %e, "failed to start scrape job");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to start scrape job" })),
            )
                .into_response()
        }
    }
}

/// GET /scrape/status/:job_id
pub async fn scrape_status_handler(
    Extension(state): Extension<AppState>,
    Path(job_id): Path<String>,
) -> Response {
    let Ok(job_id) = job_id.parse::<JobId>() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid job id" })),
        )
            .into_response();
    };

    match state.orchestrator.get_status(job_id).await {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(StatusError::NotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "message": "Job not found." })),
        )
            .into_response(),
        Err(e) => {
            error!(job_id = %job_id, error = %e, "failed to load job status");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to load job status" })),
            )
                .into_response()
        }
    }
}
