use crate::models::{Post, Subscription, SubscriptionKind, Thread};

/// A single storage mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    InsertThread(Thread),
    /// Guard: fails the whole unit when the stored version moved on
    BumpThreadVersion {
        thread_id: String,
        expected: i64,
        updated_at: String,
    },
    SetThreadName {
        thread_id: String,
        name: String,
    },
    SetThreadTopic {
        thread_id: String,
        topic_id: Option<String>,
    },
    InsertPost(Post),
    UpdatePost {
        post_id: String,
        title: Option<String>,
        body: String,
        edited_at: String,
    },
    InsertSubscription(Subscription),
    DeleteSubscription {
        kind: SubscriptionKind,
        target_id: String,
        user_id: String,
    },
    SetUnseen {
        kind: SubscriptionKind,
        target_id: String,
        user_id: String,
        unseen: bool,
    },
    /// Fan-out: raise the flag on every link of the target, limited to
    /// members of `members_of` when set
    MarkAllUnseen {
        kind: SubscriptionKind,
        target_id: String,
        except_user: Option<String>,
        members_of: Option<String>,
    },
}

/// Ordered changes produced by domain operations, committed atomically.
#[derive(Debug, Default)]
pub struct UnitOfWork {
    changes: Vec<Change>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, change: Change) {
        self.changes.push(change);
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}
