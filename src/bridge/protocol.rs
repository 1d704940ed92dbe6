//! Messages exchanged with a connected client.
//!
//! Every frame is a JSON object discriminated by its `type` field.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::acp::jsonrpc::JsonRpcError;
use crate::models::{ChatMessage, ConfigOption, PermissionAsk, ToolCall};
use crate::transport::SpawnRequest;

/// Client → server frame.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Launch an agent, replacing any running one.
    Spawn(SpawnRequest),
    /// Raw text for the agent's stdin.
    Stdin {
        /// Text to write, normally one or more NDJSON lines.
        data: String,
    },
    /// Signal the agent.
    Kill {
        /// Signal name; `SIGTERM` when omitted.
        #[serde(default)]
        signal: Option<String>,
    },
    /// Answer a pending permission ask.
    #[serde(rename_all = "camelCase")]
    PermissionResponse {
        /// Ask being answered.
        permission_id: String,
        /// Selected option value.
        option_id: String,
    },
}

const CLIENT_MESSAGE_TYPES: &[&str] = &["spawn", "stdin", "kill", "permission_response"];

/// Server → client frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// The agent process started.
    #[serde(rename = "spawned")]
    Spawned {
        /// OS pid; `null` for containerized agents.
        pid: Option<u32>,
    },
    /// The agent process exited.
    #[serde(rename = "exit")]
    Exit {
        /// Exit code.
        code: Option<i32>,
        /// Terminating signal.
        signal: Option<String>,
    },
    /// Something went wrong; the connection stays usable.
    #[serde(rename = "error")]
    Error {
        /// Human-readable description.
        message: String,
    },
    /// Snapshot of a message that changed.
    #[serde(rename = "acp:message_chunk")]
    MessageChunk {
        /// The message.
        message: ChatMessage,
    },
    /// Snapshot of a tool call.
    #[serde(rename = "acp:tool_call", rename_all = "camelCase")]
    ToolCall {
        /// The tool call.
        tool_call: ToolCall,
    },
    /// Snapshot of a pending permission ask.
    #[serde(rename = "acp:permission_request", rename_all = "camelCase")]
    PermissionRequest {
        /// The ask.
        permission_ask: PermissionAsk,
    },
    /// A JSON-RPC response from the agent.
    #[serde(rename = "acp:response")]
    Response {
        /// Correlation id.
        id: Value,
        /// Success payload.
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        /// Failure payload.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<JsonRpcError>,
    },
    /// The agent's configuration options changed.
    #[serde(rename = "acp:config_update")]
    ConfigUpdate {
        /// Full option set.
        options: Vec<ConfigOption>,
    },
    /// A turn ended; carries its last message.
    #[serde(rename = "acp:finalized")]
    Finalized {
        /// Last message of the turn, if any.
        message: Option<ChatMessage>,
    },
}

impl ServerMessage {
    /// Shorthand for [`ServerMessage::Error`].
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Decode a text frame, producing the client-facing error text on failure.
///
/// # Errors
///
/// Returns the message to send back in an `error` frame.
pub fn decode_client_message(text: &str) -> std::result::Result<ClientMessage, String> {
    let value: Value = serde_json::from_str(text).map_err(|_| "Invalid JSON".to_owned())?;

    let kind = match value.get("type") {
        Some(Value::String(kind)) => kind.clone(),
        Some(other) => return Err(format!("Unknown message type: {other}")),
        None => return Err("Missing \"type\" field".to_owned()),
    };
    if !CLIENT_MESSAGE_TYPES.contains(&kind.as_str()) {
        return Err(format!("Unknown message type: {kind}"));
    }

    let message = serde_json::from_value::<ClientMessage>(value).map_err(|err| {
        if kind == "spawn" {
            "Missing or invalid \"command\"".to_owned()
        } else {
            format!("Invalid {kind} message: {err}")
        }
    })?;

    match &message {
        ClientMessage::Spawn(request) if request.command.trim().is_empty() => {
            Err("Missing or invalid \"command\"".to_owned())
        }
        _ => Ok(message),
    }
}
