use api_state::ApiState;
use axum::{
    extract::FromRef,
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Router,
};
use middleware_api_auth::api_auth;
use routes::{
    generations::{cancel_generation, get_generation, start_edit, start_generation},
    liveness::live,
    public::{delete_public_video, get_public_video, list_public_videos},
    readiness::ready,
    videos::{
        delete_video, get_video, list_videos, revert_video, save_video, update_video,
        video_history, video_lineage,
    },
};

pub mod api_state;
pub mod error;
mod middleware_api_auth;
mod routes;

/// Router for API functionality, version 1
pub fn api_routes_v1<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Public, unauthenticated endpoints (probes and the gallery)
    let public = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live))
        .route("/videos/public", get(list_public_videos))
        .route("/videos/public/{id}", get(get_public_video));

    // Protected API endpoints (require auth)
    let protected = Router::new()
        .route(
            "/videos",
            post(save_video)
                .patch(update_video)
                .get(list_videos)
                .delete(delete_video),
        )
        .route("/videos/public", delete(delete_public_video))
        .route("/videos/{id}", get(get_video))
        .route("/videos/{id}/history", get(video_history))
        .route("/videos/{id}/lineage", get(video_lineage))
        .route("/videos/{id}/revert", post(revert_video))
        .route("/videos/{id}/edits", post(start_edit))
        .route("/generations", post(start_generation))
        .route(
            "/generations/{job_id}",
            get(get_generation).delete(cancel_generation),
        )
        .route_layer(from_fn_with_state(app_state.clone(), api_auth));

    public.merge(protected)
}
