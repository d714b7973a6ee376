use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Extension, Json,
};
use common::{
    storage::types::{
        artifact::{PublicArtifact, PublicCursor},
        user::User,
    },
    utils::pagination::{offset_for, Pagination},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::{api_state::ApiState, error::ApiError};

const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct PublicListQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub all: bool,
    pub cursor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PublicPage {
    pub videos: Vec<PublicArtifact>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
pub struct PublicCursorPage {
    pub videos: Vec<PublicArtifact>,
    pub next_cursor: Option<String>,
}

/// Completed videos, newest first. `all=true` returns the whole catalog,
/// `cursor` switches to keyset paging, otherwise `page`/`limit` apply.
pub async fn list_public_videos(
    State(state): State<ApiState>,
    Query(query): Query<PublicListQuery>,
) -> Result<axum::response::Response, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).max(1);

    if query.all {
        let videos = state.versions.public_page(0, None).await?;
        let pagination = Pagination::everything(videos.len());
        return Ok(Json(PublicPage { videos, pagination }).into_response());
    }

    if let Some(raw) = query.cursor.as_deref() {
        let cursor = match raw.trim() {
            "" => None,
            raw => Some(PublicCursor::decode(raw)?),
        };
        let videos = state.versions.list_public(cursor.as_ref(), limit).await?;
        let next_cursor = (videos.len() == limit)
            .then(|| videos.last().map(|last| PublicCursor::after(last).encode()))
            .flatten();
        return Ok(Json(PublicCursorPage {
            videos,
            next_cursor,
        })
        .into_response());
    }

    let page = query.page.unwrap_or(1).max(1);
    let total = state.versions.count_public().await?;
    let videos = state
        .versions
        .public_page(offset_for(page, limit), Some(limit))
        .await?;
    let pagination = Pagination::new(page, limit, total, videos.len());

    Ok(Json(PublicPage { videos, pagination }).into_response())
}

pub async fn get_public_video(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.versions.get_public(&id).await?))
}

#[derive(Debug, Deserialize)]
pub struct PublicDeleteQuery {
    pub id: Option<String>,
}

pub async fn delete_public_video(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Query(query): Query<PublicDeleteQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.config.is_admin_email(&user.email) {
        return Err(ApiError::Forbidden(
            "Only the administrator can remove public videos".into(),
        ));
    }
    let id = query
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::ValidationError("Video id is required".into()))?;

    state.versions.delete_public(&id).await?;
    info!(video_id = %id, admin = %user.email, "public video deleted");

    Ok(Json(json!({ "success": true })))
}
