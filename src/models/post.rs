//! Post model.

use serde::{Deserialize, Serialize};

/// A single authored message.
///
/// `title` only matters for the post that opens a thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub author_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Zero-based slot within the thread
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub body: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<String>,
}

impl Post {
    /// A detached post; it gets a thread and position when appended.
    pub fn new(author_id: &str, title: Option<String>, body: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            author_id: author_id.to_string(),
            thread_id: None,
            position: None,
            title,
            body: body.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            edited_at: None,
        }
    }

    /// The title, if it has any non-whitespace content.
    pub fn usable_title(&self) -> Option<&str> {
        self.title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// Post joined with its author's username, as shown in thread views.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    #[serde(flatten)]
    pub post: Post,
    pub author: String,
}

/// Request body for replying to a thread.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePostRequest {
    #[serde(default)]
    pub title: Option<String>,
    pub body: String,
}

/// Request body for editing a post's text.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePostRequest {
    pub body: String,
}
