use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use common::storage::types::{render_job::RenderJob, user::User};
use render_pipeline::RenderRequest;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct PromptRequest {
    pub prompt: String,
}

/// Submit a new animation. The job is polled in the background; its result
/// lands in `/videos/{job_id}`.
pub async fn start_generation(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Json(request): Json<PromptRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .launcher
        .launch(RenderRequest::generate(request.prompt, Some(user.id.clone())))
        .await?;
    info!(job_id = %job.id, user_id = %user.id, "generation started");

    Ok((StatusCode::ACCEPTED, Json(job)))
}

pub async fn start_edit(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
    Json(request): Json<PromptRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .launcher
        .launch(RenderRequest::edit(request.prompt, user.id.clone(), id.clone()))
        .await?;
    info!(job_id = %job.id, source_id = %id, user_id = %user.id, "edit started");

    Ok((StatusCode::ACCEPTED, Json(job)))
}

pub async fn get_generation(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(RenderJob::find_owned(&job_id, &user.id, &state.db).await?))
}

/// Stop polling a job. Jobs nobody is polling in this process are marked
/// cancelled directly.
pub async fn cancel_generation(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = RenderJob::find_owned(&job_id, &user.id, &state.db).await?;

    if job.state.is_terminal() {
        return Err(ApiError::ValidationError(format!(
            "Render job {} already finished",
            job.id
        )));
    }
    if !state.launcher.cancel(&job.id) {
        job.mark_cancelled(job.ticks, &state.db).await?;
    }
    info!(%job_id, user_id = %user.id, "generation cancelled");

    Ok((StatusCode::ACCEPTED, Json(json!({ "success": true }))))
}
