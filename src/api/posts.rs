//! Post API endpoints.

use axum::{
    extract::{Path, State},
    Json,
};

use super::{success, ApiResult};
use crate::auth::CurrentUser;
use crate::forum::validation;
use crate::models::{Post, PostView, UpdatePostRequest};
use crate::AppState;

/// GET /api/posts/:id - Get a single post.
pub async fn get_post(
    State(state): State<AppState>,
    caller: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<PostView> {
    match state.repo.get_post(&id, &caller.viewer).await {
        Ok(post) => success(post),
        Err(e) => Err(e),
    }
}

/// PUT /api/posts/:id - Replace the text of the caller's own post.
pub async fn update_post(
    State(state): State<AppState>,
    caller: CurrentUser,
    Path(id): Path<String>,
    Json(request): Json<UpdatePostRequest>,
) -> ApiResult<Post> {
    let body = validation::post_body(&request.body)?;
    success(state.repo.update_post(&id, &caller.viewer, &body).await?)
}
