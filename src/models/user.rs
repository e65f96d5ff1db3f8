//! User account model.

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

/// A registered forum account.
///
/// The credential is an opaque string hashed by the session layer; it is
/// never serialized back out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub about_me: Option<String>,
    pub created_at: String,
}

impl User {
    /// Identicon avatar URL keyed on the MD5 of the lower-cased email.
    pub fn avatar_url(&self, base_url: &str, size: u32) -> String {
        let digest = Md5::digest(self.email.to_lowercase().as_bytes());
        format!(
            "{}/{:x}?d=identicon&s={}",
            base_url.trim_end_matches('/'),
            digest,
            size
        )
    }
}

/// Public profile view of a user.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub about_me: Option<String>,
    pub avatar_url: String,
    pub post_count: i64,
    pub created_at: String,
}

/// Request body for registering a new user.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    /// Already hashed by the session layer
    pub password_hash: String,
    #[serde(default)]
    pub about_me: Option<String>,
}

/// Request body for editing the caller's own profile.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub about_me: Option<String>,
}

/// Request body for replacing the caller's credential.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub password_hash: String,
}
