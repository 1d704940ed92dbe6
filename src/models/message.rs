//! Chat message model assembled from streamed agent output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::permission::PermissionAsk;
use super::tool_call::ToolCall;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    /// Message typed by the human operator (or echoed back by the agent).
    User,
    /// Message produced by the agent.
    Assistant,
    /// Out-of-band system notice.
    System,
}

/// One renderable segment of a [`ChatMessage`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    /// Plain text; consecutive chunks merge into one part.
    Text {
        /// Accumulated text.
        content: String,
    },
    /// Fenced code block.
    Code {
        /// Source text.
        content: String,
        /// Optional language hint.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
    /// Agent reasoning; at most one per message.
    Thought {
        /// Accumulated reasoning text.
        content: String,
    },
    /// Inline tool invocation.
    ToolCall(ToolCall),
    /// Inline request for operator approval.
    PermissionAsk(PermissionAsk),
}

impl MessagePart {
    /// Tool-call id when this part is a tool call.
    #[must_use]
    pub fn tool_call_id(&self) -> Option<&str> {
        match self {
            Self::ToolCall(call) => Some(call.id.as_str()),
            _ => None,
        }
    }
}

/// A chat message; mutable while in progress, a snapshot once finalized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Unique identifier within a connection.
    pub id: String,
    /// Author role.
    pub role: ChatRole,
    /// Concatenation of every text chunk received for this message.
    pub content: String,
    /// Ordered renderable parts.
    pub parts: Vec<MessagePart>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Start an empty message with a generated identifier.
    #[must_use]
    pub fn new(role: ChatRole) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: String::new(),
            parts: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Start a message holding a single text part.
    #[must_use]
    pub fn with_text(role: ChatRole, text: &str) -> Self {
        let mut message = Self::new(role);
        message.content.push_str(text);
        message.parts.push(MessagePart::Text {
            content: text.to_owned(),
        });
        message
    }

    /// Append a text chunk, merging into the trailing text part when there is one.
    pub fn push_text(&mut self, text: &str) {
        self.content.push_str(text);
        if let Some(MessagePart::Text { content }) = self.parts.last_mut() {
            content.push_str(text);
        } else {
            self.parts.push(MessagePart::Text {
                content: text.to_owned(),
            });
        }
    }

    /// Append a reasoning chunk to the message's single thought part.
    pub fn push_thought(&mut self, text: &str) {
        let existing = self.parts.iter_mut().find_map(|part| match part {
            MessagePart::Thought { content } => Some(content),
            _ => None,
        });
        match existing {
            Some(content) => content.push_str(text),
            None => self.parts.push(MessagePart::Thought {
                content: text.to_owned(),
            }),
        }
    }

    /// Replace the tool-call part carrying `updated.id`, if present.
    ///
    /// Returns `true` when a part was replaced.
    pub fn replace_tool_call(&mut self, updated: &ToolCall) -> bool {
        for part in &mut self.parts {
            if part.tool_call_id() == Some(updated.id.as_str()) {
                *part = MessagePart::ToolCall(updated.clone());
                return true;
            }
        }
        false
    }

    /// Overwrite the stored snapshot of a permission ask embedded in this message.
    pub fn replace_permission_ask(&mut self, updated: &PermissionAsk) {
        for part in &mut self.parts {
            if let MessagePart::PermissionAsk(ask) = part {
                if ask.id == updated.id {
                    *ask = updated.clone();
                }
            }
        }
    }
}
