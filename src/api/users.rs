//! User API endpoints.

use axum::{
    extract::{Path, State},
    Json,
};

use super::{success, ApiResult};
use crate::auth::CurrentUser;
use crate::errors::AppError;
use crate::forum::validation;
use crate::models::{
    ChangePasswordRequest, CreateUserRequest, PostView, UpdateProfileRequest, User, UserProfile,
};
use crate::AppState;

const AVATAR_SIZE: u32 = 128;

/// POST /api/users - Register a new user.
pub async fn create_user(
    State(state): State<AppState>,
    Json(request): Json<CreateUserRequest>,
) -> ApiResult<User> {
    let username = validation::username(&request.username)?;
    let email = validation::email(&request.email)?;
    let password_hash = validation::password_hash(&request.password_hash)?;
    let about_me = request
        .about_me
        .as_deref()
        .map(validation::about_me)
        .transpose()?;

    match state
        .repo
        .create_user(&username, &email, &password_hash, about_me.as_deref())
        .await
    {
        Ok(user) => success(user),
        Err(e) => Err(e),
    }
}

/// GET /api/users/:username - Public profile.
pub async fn get_user_profile(
    State(state): State<AppState>,
    _caller: CurrentUser,
    Path(username): Path<String>,
) -> ApiResult<UserProfile> {
    let user = state
        .repo
        .get_user_by_username(&username)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User '{}' not found", username)))?;
    let post_count = state.repo.count_user_posts(&user.id).await?;

    success(UserProfile {
        avatar_url: user.avatar_url(&state.config.avatar_base_url, AVATAR_SIZE),
        id: user.id,
        username: user.username,
        about_me: user.about_me,
        post_count,
        created_at: user.created_at,
    })
}

/// GET /api/users/:username/posts - A user's posts the caller may see.
pub async fn list_user_posts(
    State(state): State<AppState>,
    caller: CurrentUser,
    Path(username): Path<String>,
) -> ApiResult<Vec<PostView>> {
    let user = state
        .repo
        .get_user_by_username(&username)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User '{}' not found", username)))?;

    match state.repo.list_user_posts(&user.id, &caller.viewer).await {
        Ok(posts) => success(posts),
        Err(e) => Err(e),
    }
}

/// PUT /api/me - Edit the caller's username and biography.
pub async fn update_profile(
    State(state): State<AppState>,
    caller: CurrentUser,
    Json(request): Json<UpdateProfileRequest>,
) -> ApiResult<User> {
    let username = request
        .username
        .as_deref()
        .map(validation::username)
        .transpose()?;
    let about_me = request
        .about_me
        .as_deref()
        .map(validation::about_me)
        .transpose()?;

    if username.is_none() && about_me.is_none() {
        return Err(AppError::Validation("Nothing to update".to_string()));
    }

    let user = state
        .repo
        .update_profile(caller.id(), username.as_deref(), about_me.as_deref())
        .await?;
    tracing::info!(user_id = %user.id, "Profile updated");
    success(user)
}

/// PUT /api/me/password - Replace the caller's credential.
pub async fn change_password(
    State(state): State<AppState>,
    caller: CurrentUser,
    Json(request): Json<ChangePasswordRequest>,
) -> ApiResult<()> {
    let password_hash = validation::password_hash(&request.password_hash)?;
    state.repo.update_password(caller.id(), &password_hash).await?;
    success(())
}
