// ABOUTME: JSON frames exchanged with chat clients over the WebSocket.
// ABOUTME: Inbound turns and stop requests; outbound messages mirror stored rows.

use crate::store::{Message, MessageRole, MessageType, NewMessage};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Stop,
}

/// A new conversational turn
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChatRequest {
    pub content: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub provider_id: Option<String>,
}

/// Anything a client may send
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum InboundMessage {
    Control { action: ControlAction },
    Chat(ChatRequest),
}

impl InboundMessage {
    /// Parse one text frame. Unparseable frames and empty turns yield None.
    pub fn parse(text: &str) -> Option<Self> {
        match serde_json::from_str::<InboundMessage>(text) {
            Ok(InboundMessage::Chat(req)) if req.content.trim().is_empty() => {
                tracing::debug!("Ignoring chat frame with empty content");
                None
            }
            Ok(msg) => Some(msg),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unparseable client frame");
                None
            }
        }
    }
}

/// A message as clients see it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub metadata: Value,
    pub created_at: String,
}

impl OutboundMessage {
    /// Rejection sent when a project already has a request in flight. Never stored.
    pub fn busy() -> Self {
        OutboundMessage {
            id: uuid::Uuid::new_v4().to_string(),
            role: MessageRole::System,
            content: crate::error::ChatError::Busy.to_string(),
            message_type: MessageType::Error,
            metadata: json!({ "error_code": "busy" }),
            created_at: crate::store::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.message_type,
            MessageType::SessionComplete | MessageType::Stopped | MessageType::Error
        )
    }
}

impl From<&NewMessage> for OutboundMessage {
    fn from(m: &NewMessage) -> Self {
        OutboundMessage {
            id: m.id.clone(),
            role: m.role,
            content: m.content.clone(),
            message_type: m.message_type,
            metadata: m.metadata.clone(),
            created_at: m.created_at.clone(),
        }
    }
}

impl From<Message> for OutboundMessage {
    fn from(m: Message) -> Self {
        OutboundMessage {
            id: m.id,
            role: m.role,
            content: m.content,
            message_type: m.message_type,
            metadata: m.metadata,
            created_at: m.created_at,
        }
    }
}
