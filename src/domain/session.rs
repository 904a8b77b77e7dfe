//! Session/message entities: the ordered conversation that produced one step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::market::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// A single turn in a session's transcript. `tool_call_id`/`tool_name` are
/// set for assistant tool invocations and their matching tool replies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub seq: i64,
    pub role: Role,
    pub content: String,
    pub tool_call_id: Option<String>,
    pub tool_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The container for one timestamp's conversation. Created lazily when the
/// first message for `(agent, timestamp)` arrives.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: i64,
    pub agent: String,
    pub timestamp: Timestamp,
}
