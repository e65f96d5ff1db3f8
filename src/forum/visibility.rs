use std::collections::HashSet;

use crate::errors::AppError;
use crate::models::Thread;

/// The current user as far as access checks are concerned.
#[derive(Debug, Clone, Default)]
pub struct Viewer {
    pub user_id: String,
    pub group_ids: HashSet<String>,
}

impl Viewer {
    pub fn new(user_id: &str, group_ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            user_id: user_id.to_string(),
            group_ids: group_ids.into_iter().collect(),
        }
    }

    pub fn is_member(&self, group_id: &str) -> bool {
        self.group_ids.contains(group_id)
    }
}

/// Public threads are visible to everyone; group threads only to members.
pub fn is_visible(thread: &Thread, viewer: &Viewer) -> bool {
    is_group_visible(thread.group_id.as_deref(), viewer)
}

/// The same rule for rows that only carry the owning group id.
pub fn is_group_visible(group_id: Option<&str>, viewer: &Viewer) -> bool {
    match group_id {
        None => true,
        Some(group_id) => viewer.is_member(group_id),
    }
}

/// Hidden threads are reported as missing rather than forbidden.
pub fn ensure_visible(thread: &Thread, viewer: &Viewer) -> Result<(), AppError> {
    if is_visible(thread, viewer) {
        Ok(())
    } else {
        tracing::debug!(thread_id = %thread.id, user_id = %viewer.user_id, "Thread hidden from non-member");
        Err(AppError::NotFound(format!("Thread {} not found", thread.id)))
    }
}
