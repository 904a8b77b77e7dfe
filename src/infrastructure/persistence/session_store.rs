//! Session/message persistence (§6.1 `sessions`/`messages`, §9 "Session identity").

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::domain::errors::CoreError;
use crate::domain::market::Timestamp;
use crate::domain::repositories::SessionStore;
use crate::domain::session::{Message, Role};

#[derive(Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn messages_for_session(&self, session_id: i64) -> Result<Vec<Message>, CoreError> {
        let rows = sqlx::query(
            "SELECT seq, role, content, tool_call_id, tool_name, ts FROM messages \
             WHERE session_ref = ? ORDER BY seq",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                let role: String = row.try_get("role")?;
                let ts: String = row.try_get("ts")?;
                Ok(Message {
                    seq: row.try_get("seq")?,
                    role: match role.as_str() {
                        "user" => Role::User,
                        "assistant" => Role::Assistant,
                        "tool" => Role::Tool,
                        other => return Err(CoreError::Unavailable(format!("corrupt role: {other}"))),
                    },
                    content: row.try_get("content")?,
                    tool_call_id: row.try_get("tool_call_id")?,
                    tool_name: row.try_get("tool_name")?,
                    created_at: DateTime::parse_from_rfc3339(&ts)
                        .map_err(|e| CoreError::Unavailable(format!("corrupt timestamp: {e}")))?
                        .with_timezone(&Utc),
                })
            })
            .collect()
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn ensure_session(&self, agent: &str, timestamp: &Timestamp) -> Result<i64, CoreError> {
        let key = timestamp.to_string();
        sqlx::query("INSERT OR IGNORE INTO sessions (agent, timestamp) VALUES (?, ?)")
            .bind(agent)
            .bind(&key)
            .execute(&self.pool)
            .await?;
        let row = sqlx::query("SELECT id FROM sessions WHERE agent = ? AND timestamp = ?")
            .bind(agent)
            .bind(&key)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("id")?)
    }

    async fn append_message(&self, session_id: i64, message: Message) -> Result<(), CoreError> {
        let next_seq: Option<i64> = sqlx::query("SELECT MAX(seq) as m FROM messages WHERE session_ref = ?")
            .bind(session_id)
            .fetch_one(&self.pool)
            .await?
            .try_get("m")?;
        let seq = next_seq.map(|s| s + 1).unwrap_or(0);
        let role = match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        sqlx::query(
            "INSERT INTO messages (session_ref, seq, role, content, tool_call_id, tool_name, ts) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(seq)
        .bind(role)
        .bind(&message.content)
        .bind(&message.tool_call_id)
        .bind(&message.tool_name)
        .bind(message.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_messages(&self, agent: &str, before: &Timestamp, limit: usize) -> Result<Vec<Message>, CoreError> {
        let key = before.to_string();
        let rows = sqlx::query(
            "SELECT id, timestamp FROM sessions WHERE agent = ? AND timestamp < ? ORDER BY timestamp DESC",
        )
        .bind(agent)
        .bind(&key)
        .fetch_all(&self.pool)
        .await?;

        let mut collected: Vec<Message> = Vec::new();
        for row in rows {
            if collected.len() >= limit {
                break;
            }
            let session_id: i64 = row.try_get("id")?;
            let mut msgs = self.messages_for_session(session_id).await?;
            msgs.reverse();
            collected.extend(msgs);
        }
        collected.truncate(limit);
        collected.reverse();
        Ok(collected)
    }
}
