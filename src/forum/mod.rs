//! Forum domain rules.
//!
//! Nothing in here touches the database. Operations mutate in-memory
//! aggregates and record what they did into a [`UnitOfWork`], which the
//! repository commits in a single transaction.

mod subscription;
mod thread;
mod unit_of_work;
pub mod validation;
mod visibility;

pub use subscription::*;
pub use thread::*;
pub use unit_of_work::*;
pub use visibility::*;

/// Who gets their unseen flag raised when a post lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationPolicy {
    /// Flag the poster's own existing subscription too
    pub notify_author: bool,
    /// Flag subscribers of the thread's topic as well as the thread's
    pub topic_fanout: bool,
}

impl NotificationPolicy {
    /// The user to leave untouched when fanning out a post by `author_id`.
    pub fn exempt<'a>(&self, author_id: &'a str) -> Option<&'a str> {
        if self.notify_author {
            None
        } else {
            Some(author_id)
        }
    }
}

impl Default for NotificationPolicy {
    fn default() -> Self {
        Self {
            notify_author: true,
            topic_fanout: true,
        }
    }
}
