//! Topic model.

use serde::{Deserialize, Serialize};

/// A uniquely named tag grouping threads for subscription purposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    pub id: String,
    pub name: String,
    pub created_at: String,
}

/// Topic listing entry with activity counts.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicSummary {
    #[serde(flatten)]
    pub topic: Topic,
    pub thread_count: i64,
    pub subscriber_count: i64,
}

/// Request body for strict topic creation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTopicRequest {
    pub name: String,
}
