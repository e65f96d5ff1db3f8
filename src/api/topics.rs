//! Topic API endpoints.

use axum::{
    extract::{Path, State},
    Json,
};

use super::{success, ApiResult};
use crate::auth::CurrentUser;
use crate::errors::AppError;
use crate::forum::validation;
use crate::models::{CreateTopicRequest, ThreadSummary, Topic, TopicSummary};
use crate::AppState;

/// GET /api/topics - List all topics.
pub async fn list_topics(State(state): State<AppState>) -> ApiResult<Vec<TopicSummary>> {
    match state.repo.list_topics().await {
        Ok(topics) => success(topics),
        Err(e) => Err(e),
    }
}

/// POST /api/topics - Create a topic; the name must be unused.
pub async fn create_topic(
    State(state): State<AppState>,
    _caller: CurrentUser,
    Json(request): Json<CreateTopicRequest>,
) -> ApiResult<Topic> {
    let name = validation::topic_name(&request.name)?;
    match state.repo.create_topic(&name).await {
        Ok(topic) => success(topic),
        Err(e) => Err(e),
    }
}

/// PUT /api/topics/:name - Get the topic, creating it if it does not exist.
pub async fn ensure_topic(
    State(state): State<AppState>,
    _caller: CurrentUser,
    Path(name): Path<String>,
) -> ApiResult<Topic> {
    let name = validation::topic_name(&name)?;
    success(state.repo.get_or_create_topic(&name).await?)
}

/// GET /api/topics/:name - Get a single topic.
pub async fn get_topic(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Topic> {
    let name = validation::topic_name(&name)?;
    match state.repo.get_topic_by_name(&name).await {
        Ok(Some(topic)) => success(topic),
        Ok(None) => Err(AppError::NotFound(format!("Topic '{}' not found", name))),
        Err(e) => Err(e),
    }
}

/// GET /api/topics/:name/threads - Threads under a topic the caller may see.
pub async fn list_topic_threads(
    State(state): State<AppState>,
    caller: CurrentUser,
    Path(name): Path<String>,
) -> ApiResult<Vec<ThreadSummary>> {
    let name = validation::topic_name(&name)?;
    success(state.repo.list_topic_threads(&name, &caller.viewer).await?)
}
