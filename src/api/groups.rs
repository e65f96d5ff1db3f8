//! Group API endpoints.
//!
//! Groups are invisible to non-members; every lookup by a non-member is a 404.

use axum::{
    extract::{Path, State},
    Json,
};

use super::{success, ApiResult};
use crate::auth::CurrentUser;
use crate::errors::AppError;
use crate::forum::validation;
use crate::models::{AddMemberRequest, CreateGroupRequest, Group, GroupMember, GroupView};
use crate::AppState;

/// GET /api/groups - Groups the caller belongs to.
pub async fn list_groups(
    State(state): State<AppState>,
    caller: CurrentUser,
) -> ApiResult<Vec<Group>> {
    match state.repo.list_groups_for(caller.id()).await {
        Ok(groups) => success(groups),
        Err(e) => Err(e),
    }
}

/// POST /api/groups - Create a group with the caller as first member.
pub async fn create_group(
    State(state): State<AppState>,
    caller: CurrentUser,
    Json(request): Json<CreateGroupRequest>,
) -> ApiResult<Group> {
    let name = validation::group_name(&request.name)?;
    let description = validation::group_description(&request.description)?;
    success(state.repo.create_group(caller.id(), &name, &description).await?)
}

/// GET /api/groups/:id - Group page with members and threads.
pub async fn get_group(
    State(state): State<AppState>,
    caller: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<GroupView> {
    match state.repo.get_group(&id, &caller.viewer).await {
        Ok(group) => success(group),
        Err(e) => Err(e),
    }
}

/// POST /api/groups/:id/members - Add a user by username.
pub async fn add_group_member(
    State(state): State<AppState>,
    caller: CurrentUser,
    Path(id): Path<String>,
    Json(request): Json<AddMemberRequest>,
) -> ApiResult<GroupMember> {
    let username = request.username.trim();
    if username.is_empty() {
        return Err(AppError::Validation("Username is required".to_string()));
    }
    success(
        state
            .repo
            .add_group_member(&id, &caller.viewer, username)
            .await?,
    )
}

/// DELETE /api/groups/:id/membership - Leave a group.
pub async fn leave_group(
    State(state): State<AppState>,
    caller: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<()> {
    if !state.repo.leave_group(&id, caller.id()).await? {
        return Err(AppError::NotFound(format!("Group {} not found", id)));
    }
    success(())
}
