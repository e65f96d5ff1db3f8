//! Subscription and notification endpoints.
//!
//! Subscribing and unsubscribing are idempotent; `changed` reports whether
//! the call did anything.

use axum::extract::{Path, State};

use super::{success, ApiResult};
use crate::auth::CurrentUser;
use crate::forum::validation;
use crate::models::{Notifications, SubscriptionChange, SubscriptionKind, Subscriptions};
use crate::AppState;

fn change(kind: SubscriptionKind, target_id: String, subscribed: bool, changed: bool) -> SubscriptionChange {
    SubscriptionChange {
        kind,
        target_id,
        subscribed,
        changed,
    }
}

/// POST /api/threads/:id/subscription
pub async fn subscribe_thread(
    State(state): State<AppState>,
    caller: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<SubscriptionChange> {
    let changed = state.repo.subscribe_thread(&id, &caller.viewer).await?;
    success(change(SubscriptionKind::Thread, id, true, changed))
}

/// DELETE /api/threads/:id/subscription
pub async fn unsubscribe_thread(
    State(state): State<AppState>,
    caller: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<SubscriptionChange> {
    let changed = state.repo.unsubscribe_thread(&id, &caller.viewer).await?;
    success(change(SubscriptionKind::Thread, id, false, changed))
}

/// POST /api/threads/:id/seen - Clear the caller's unseen flag on a thread.
pub async fn mark_thread_seen(
    State(state): State<AppState>,
    caller: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<bool> {
    success(state.repo.mark_thread_seen(&id, &caller.viewer).await?)
}

/// POST /api/topics/:name/subscription
pub async fn subscribe_topic(
    State(state): State<AppState>,
    caller: CurrentUser,
    Path(name): Path<String>,
) -> ApiResult<SubscriptionChange> {
    let name = validation::topic_name(&name)?;
    let changed = state.repo.subscribe_topic(&name, caller.id()).await?;
    success(change(SubscriptionKind::Topic, name, true, changed))
}

/// DELETE /api/topics/:name/subscription
pub async fn unsubscribe_topic(
    State(state): State<AppState>,
    caller: CurrentUser,
    Path(name): Path<String>,
) -> ApiResult<SubscriptionChange> {
    let name = validation::topic_name(&name)?;
    let changed = state.repo.unsubscribe_topic(&name, caller.id()).await?;
    success(change(SubscriptionKind::Topic, name, false, changed))
}

/// POST /api/topics/:name/seen
pub async fn mark_topic_seen(
    State(state): State<AppState>,
    caller: CurrentUser,
    Path(name): Path<String>,
) -> ApiResult<bool> {
    let name = validation::topic_name(&name)?;
    success(state.repo.mark_topic_seen(&name, caller.id()).await?)
}

/// GET /api/me/notifications - Unseen threads and topics.
pub async fn get_notifications(
    State(state): State<AppState>,
    caller: CurrentUser,
) -> ApiResult<Notifications> {
    match state.repo.notifications(caller.id()).await {
        Ok(notifications) => success(notifications),
        Err(e) => Err(e),
    }
}

/// GET /api/me/subscriptions - Everything the caller follows.
pub async fn get_subscriptions(
    State(state): State<AppState>,
    caller: CurrentUser,
) -> ApiResult<Subscriptions> {
    success(state.repo.subscriptions(caller.id()).await?)
}
