// ABOUTME: Immutable message log - one row per streamed event plus the user's turns.
// ABOUTME: Supports replay (newest N, oldest first) and history for stateless backends.

use super::{now, Store};
use anyhow::{Context, Result};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

impl FromStr for MessageRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            _ => anyhow::bail!("Unknown message role: {}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Chat,
    ToolUse,
    SessionComplete,
    Stopped,
    Error,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Chat => "chat",
            MessageType::ToolUse => "tool_use",
            MessageType::SessionComplete => "session_complete",
            MessageType::Stopped => "stopped",
            MessageType::Error => "error",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(MessageType::Chat),
            "tool_use" => Ok(MessageType::ToolUse),
            "session_complete" => Ok(MessageType::SessionComplete),
            "stopped" => Ok(MessageType::Stopped),
            "error" => Ok(MessageType::Error),
            _ => anyhow::bail!("Unknown message type: {}", s),
        }
    }
}

/// A persisted message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: String,
    pub project_id: String,
    pub request_id: String,
    pub role: MessageRole,
    pub message_type: MessageType,
    pub content: String,
    pub metadata: Value,
    pub model_id: Option<String>,
    pub provider_id: Option<String>,
    pub created_at: String,
}

/// A message about to be written; id and timestamp are assigned by the caller
/// so the same values can be sent to clients before the write lands
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: String,
    pub project_id: String,
    pub request_id: String,
    pub role: MessageRole,
    pub message_type: MessageType,
    pub content: String,
    pub metadata: Value,
    pub model_id: Option<String>,
    pub provider_id: Option<String>,
    pub created_at: String,
}

impl NewMessage {
    pub fn new(
        project_id: &str,
        request_id: &str,
        role: MessageRole,
        message_type: MessageType,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            request_id: request_id.to_string(),
            role,
            message_type,
            content: content.into(),
            metadata: Value::Object(Default::default()),
            model_id: None,
            provider_id: None,
            created_at: now(),
        }
    }
}

const MESSAGE_COLUMNS: &str = "id, project_id, request_id, role, message_type, content, metadata_json, model_id, provider_id, created_at";

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let role: String = row.get(3)?;
    let message_type: String = row.get(4)?;
    let metadata: String = row.get(6)?;
    let invalid = |idx: usize, e: anyhow::Error| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    };

    Ok(Message {
        id: row.get(0)?,
        project_id: row.get(1)?,
        request_id: row.get(2)?,
        role: role.parse().map_err(|e| invalid(3, e))?,
        message_type: message_type.parse().map_err(|e| invalid(4, e))?,
        content: row.get(5)?,
        metadata: serde_json::from_str(&metadata).unwrap_or(Value::Null),
        model_id: row.get(7)?,
        provider_id: row.get(8)?,
        created_at: row.get(9)?,
    })
}

impl Store {
    pub fn insert_message(&self, message: &NewMessage) -> Result<()> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO messages (id, project_id, request_id, role, message_type, content, metadata_json, model_id, provider_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                message.id,
                message.project_id,
                message.request_id,
                message.role.as_str(),
                message.message_type.as_str(),
                message.content,
                message.metadata.to_string(),
                message.model_id,
                message.provider_id,
                message.created_at
            ],
        )
        .context("Failed to insert message")?;
        Ok(())
    }

    /// The newest `limit` messages of a project, oldest first
    pub fn recent_messages(&self, project_id: &str, limit: usize) -> Result<Vec<Message>> {
        let db = self.conn()?;
        let sql = format!(
            "SELECT {} FROM messages WHERE project_id = ?1 ORDER BY rowid DESC LIMIT ?2",
            MESSAGE_COLUMNS
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(params![project_id, limit as i64], message_from_row)?;
        let mut messages = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }

    /// User and assistant chat rows of the last `turns` requests, oldest first
    pub fn conversation_rows(&self, project_id: &str, turns: usize) -> Result<Vec<Message>> {
        let db = self.conn()?;
        let sql = format!(
            "SELECT {} FROM messages
             WHERE project_id = ?1
               AND message_type = 'chat'
               AND role IN ('user', 'assistant')
               AND request_id IN (
                   SELECT request_id FROM messages
                   WHERE project_id = ?1 AND role = 'user' AND message_type = 'chat'
                   ORDER BY rowid DESC LIMIT ?2
               )
             ORDER BY rowid",
            MESSAGE_COLUMNS
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(params![project_id, turns as i64], message_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::Vault;

    fn insert(store: &Store, request: &str, role: MessageRole, kind: MessageType, content: &str) {
        store
            .insert_message(&NewMessage::new("p1", request, role, kind, content))
            .unwrap();
    }

    #[test]
    fn test_recent_messages_oldest_first() {
        let store = Store::open_in_memory(Vault::passthrough()).unwrap();
        for i in 0..5 {
            insert(&store, "r1", MessageRole::Assistant, MessageType::Chat, &i.to_string());
        }
        let recent = store.recent_messages("p1", 3).unwrap();
        let contents: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["2", "3", "4"]);
        assert!(store.recent_messages("other", 10).unwrap().is_empty());
    }

    #[test]
    fn test_conversation_rows_skip_tools_and_old_turns() {
        let store = Store::open_in_memory(Vault::passthrough()).unwrap();
        insert(&store, "r1", MessageRole::User, MessageType::Chat, "first");
        insert(&store, "r1", MessageRole::Assistant, MessageType::Chat, "one");
        insert(&store, "r2", MessageRole::User, MessageType::Chat, "second");
        insert(&store, "r2", MessageRole::Assistant, MessageType::ToolUse, "**Read** `a`");
        insert(&store, "r2", MessageRole::Assistant, MessageType::Chat, "two");
        insert(&store, "r2", MessageRole::System, MessageType::SessionComplete, "done");

        let rows = store.conversation_rows("p1", 1).unwrap();
        let contents: Vec<&str> = rows.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["second", "two"]);
    }

    #[test]
    fn test_metadata_round_trips() {
        let store = Store::open_in_memory(Vault::passthrough()).unwrap();
        let mut message = NewMessage::new("p1", "r1", MessageRole::System, MessageType::Error, "boom");
        message.metadata = serde_json::json!({"error_code": "auth_failed"});
        message.provider_id = Some("prov".to_string());
        store.insert_message(&message).unwrap();

        let stored = &store.recent_messages("p1", 1).unwrap()[0];
        assert_eq!(stored.metadata["error_code"], "auth_failed");
        assert_eq!(stored.provider_id.as_deref(), Some("prov"));
        assert_eq!(stored.message_type, MessageType::Error);
    }
}
