use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Extension, Json,
};
use common::storage::types::{artifact::ArtifactPatch, user::User};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct SaveVideoRequest {
    pub id: String,
    #[serde(default, alias = "userId")]
    pub user_id: Option<String>,
    #[serde(flatten)]
    pub patch: ArtifactPatch,
}

/// Fields a client may change on an existing video.
#[derive(Debug, Deserialize)]
pub struct UpdateVideoRequest {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub previous_video_url: Option<Option<String>>,
    #[serde(default)]
    pub code: Option<String>,
}

fn explicit_null<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

impl From<UpdateVideoRequest> for ArtifactPatch {
    fn from(request: UpdateVideoRequest) -> Self {
        ArtifactPatch {
            title: request.title,
            description: request.description,
            video_url: request.video_url,
            previous_video_url: request.previous_video_url,
            code: request.code,
            ..ArtifactPatch::default()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct VideoIdQuery {
    pub id: Option<String>,
}

pub async fn save_video(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Json(request): Json<SaveVideoRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.id.trim().is_empty() {
        return Err(ApiError::ValidationError("Video id is required".into()));
    }
    if request.patch.status.is_none() {
        return Err(ApiError::ValidationError("Video status is required".into()));
    }
    if request
        .user_id
        .as_deref()
        .is_some_and(|claimed| claimed != user.id)
    {
        return Err(ApiError::Forbidden(
            "Cannot save videos for another user".into(),
        ));
    }

    let video = state
        .versions
        .upsert(&request.id, Some(&user.id), request.patch)
        .await?;

    Ok(Json(video))
}

pub async fn update_video(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Json(request): Json<UpdateVideoRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = request.id.clone();
    let video = state
        .versions
        .update(&id, &user.id, ArtifactPatch::from(request))
        .await?;

    Ok(Json(video))
}

pub async fn list_videos(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
) -> Result<impl IntoResponse, ApiError> {
    let videos = state.versions.list_for_owner(&user.id).await?;

    Ok(Json(videos))
}

pub async fn delete_video(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Query(query): Query<VideoIdQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let id = query
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::ValidationError("Video id is required".into()))?;

    state.versions.delete(&id, &user.id).await?;
    info!(video_id = %id, user_id = %user.id, "video deleted by owner");

    Ok(Json(json!({ "success": true })))
}

pub async fn get_video(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.versions.get(&id, &user.id).await?))
}

pub async fn video_history(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.versions.history(&id, &user.id).await?))
}

pub async fn video_lineage(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.versions.lineage(&id, &user.id).await?))
}

pub async fn revert_video(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.versions.revert(&id, &user.id).await?))
}
