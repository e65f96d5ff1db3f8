//! Thread API endpoints.

use axum::{
    extract::{Path, State},
    Json,
};

use super::{success, ApiResult};
use crate::auth::CurrentUser;
use crate::db::NewThread;
use crate::errors::AppError;
use crate::forum::validation;
use crate::models::{
    CreatePostRequest, CreateThreadRequest, Post, ThreadSummary, ThreadView, UpdateThreadRequest,
};
use crate::AppState;

/// GET /api/threads - Public threads, most recently active first.
pub async fn list_threads(State(state): State<AppState>) -> ApiResult<Vec<ThreadSummary>> {
    match state.repo.list_public_threads().await {
        Ok(threads) => success(threads),
        Err(e) => Err(e),
    }
}

/// POST /api/threads - Start a thread, optionally with its opening post.
pub async fn create_thread(
    State(state): State<AppState>,
    caller: CurrentUser,
    Json(request): Json<CreateThreadRequest>,
) -> ApiResult<ThreadView> {
    // The title is checked by the thread itself so an untitled opener
    // reports INVALID_FIRST_POST rather than a generic validation error.
    let title = match request.title {
        Some(t) if !t.trim().is_empty() => Some(validation::title(&t)?),
        other => other,
    };
    let body = request
        .body
        .as_deref()
        .map(validation::post_body)
        .transpose()?;
    if title.is_some() && body.is_none() {
        return Err(AppError::Validation("An opening post needs a body".to_string()));
    }
    let topic = request
        .topic
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .map(validation::topic_name)
        .transpose()?;

    let new_thread = NewThread {
        title,
        body,
        topic,
        group_id: request.group_id.filter(|g| !g.trim().is_empty()),
    };

    success(state.repo.create_thread(&caller.viewer, new_thread).await?)
}

/// GET /api/threads/:id - Full thread with posts and subscribers.
pub async fn get_thread(
    State(state): State<AppState>,
    caller: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<ThreadView> {
    match state.repo.get_thread(&id, &caller.viewer).await {
        Ok(thread) => success(thread),
        Err(e) => Err(e),
    }
}

/// PUT /api/threads/:id - Edit title, topic, or opening text.
pub async fn update_thread(
    State(state): State<AppState>,
    caller: CurrentUser,
    Path(id): Path<String>,
    Json(request): Json<UpdateThreadRequest>,
) -> ApiResult<ThreadView> {
    if request.title.is_none() && request.topic.is_none() && request.body.is_none() {
        return Err(AppError::Validation("Nothing to update".to_string()));
    }

    let title = match request.title {
        Some(t) if !t.trim().is_empty() => Some(validation::title(&t)?),
        other => other,
    };
    let body = request
        .body
        .as_deref()
        .map(validation::post_body)
        .transpose()?;
    let topic = match request.topic {
        Some(t) if !t.trim().is_empty() => Some(validation::topic_name(&t)?),
        other => other,
    };

    success(
        state
            .repo
            .update_thread(&id, &caller.viewer, title, topic, body, request.expected_version)
            .await?,
    )
}

/// POST /api/threads/:id/posts - Reply to a thread (or open an empty one).
pub async fn create_post(
    State(state): State<AppState>,
    caller: CurrentUser,
    Path(id): Path<String>,
    Json(request): Json<CreatePostRequest>,
) -> ApiResult<Post> {
    let body = validation::post_body(&request.body)?;
    let title = match request.title {
        Some(t) if !t.trim().is_empty() => Some(validation::title(&t)?),
        _ => None,
    };

    success(state.repo.add_post(&id, &caller.viewer, title, &body).await?)
}
