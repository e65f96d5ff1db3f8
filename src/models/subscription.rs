//! Subscription link models.

use serde::{Deserialize, Serialize};

/// What a subscription link points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionKind {
    Thread,
    Topic,
}

impl SubscriptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionKind::Thread => "thread",
            SubscriptionKind::Topic => "topic",
        }
    }
}

/// One (user, thread) or (user, topic) link with its unseen flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub kind: SubscriptionKind,
    pub target_id: String,
    pub user_id: String,
    pub unseen: bool,
    pub created_at: String,
}

impl Subscription {
    pub fn new(kind: SubscriptionKind, target_id: &str, user_id: &str) -> Self {
        Self {
            kind,
            target_id: target_id.to_string(),
            user_id: user_id.to_string(),
            unseen: false,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// A subscription as listed for its owner, with the target's display name.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionEntry {
    pub kind: SubscriptionKind,
    pub target_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub unseen: bool,
}

/// The caller's subscriptions page.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscriptions {
    pub threads: Vec<SubscriptionEntry>,
    pub topics: Vec<SubscriptionEntry>,
}

/// The caller's alerts: whether anything is unseen, and where.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notifications {
    pub has_unseen: bool,
    pub threads: Vec<SubscriptionEntry>,
    pub topics: Vec<SubscriptionEntry>,
}

/// Result of a subscribe/unsubscribe/seen request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionChange {
    pub kind: SubscriptionKind,
    pub target_id: String,
    pub subscribed: bool,
    /// False when the request was a no-op
    pub changed: bool,
}
