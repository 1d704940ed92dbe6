//! JSON-RPC 2.0 wire types exchanged with ACP agents.
//!
//! Only the subset the bridge needs is modelled: responses (correlated by id),
//! agent-initiated requests (`session/request_permission`) and
//! `session/update` notifications. Session updates are decoded into the
//! [`SessionUpdate`] enum keyed on the `sessionUpdate` discriminator.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::models::{ConfigOption, PermissionOption, ToolCallStatus};

/// JSON-RPC protocol version tag written on every outbound document.
pub const JSONRPC_VERSION: &str = "2.0";

/// Notification method carrying streamed session updates.
pub const METHOD_SESSION_UPDATE: &str = "session/update";

/// Agent → client request asking the operator to approve a tool call.
pub const METHOD_REQUEST_PERMISSION: &str = "session/request_permission";

/// Notification answering a notification-style `permission_ask`.
pub const METHOD_PERMISSION_RESPONSE: &str = "permission/response";

/// JSON-RPC error code for "method not found".
pub const METHOD_NOT_FOUND: i64 = -32601;

// ── Documents ────────────────────────────────────────────────────────────────

/// Error object carried by a failed response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
    /// Optional structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A response to a request previously written to the agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    /// Correlation id, echoed from the request.
    pub id: Value,
    /// Success payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// The id as an unsigned integer, when it is one.
    #[must_use]
    pub fn numeric_id(&self) -> Option<u64> {
        self.id.as_u64()
    }
}

/// A request initiated by the agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    /// Id the result must be correlated with.
    pub id: Value,
    /// Method name.
    pub method: String,
    /// Parameters, `null` when absent.
    #[serde(default)]
    pub params: Value,
}

/// Parameters of a `session/update` notification.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionNotification {
    /// Session the update belongs to.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Raw update payload; decode with [`SessionNotification::decode`].
    pub update: Value,
}

impl SessionNotification {
    /// Decode the update payload.
    ///
    /// # Errors
    ///
    /// Returns the deserialization error when the payload does not match any
    /// known shape.
    pub fn decode(&self) -> serde_json::Result<SessionUpdate> {
        SessionUpdate::deserialize(&self.update)
    }
}

/// One classified line from the agent's output stream.
#[derive(Debug, Clone)]
pub enum Document {
    /// Has `id` and no `method`.
    Response(JsonRpcResponse),
    /// Has both `id` and `method`.
    Request(JsonRpcRequest),
    /// A `session/update` notification.
    Notification(SessionNotification),
}

impl Document {
    /// Classify a parsed JSON value.
    ///
    /// Returns `Ok(None)` for documents the bridge does not handle (other
    /// notifications, non-objects).
    ///
    /// # Errors
    ///
    /// Returns the deserialization error when a document matches a class but
    /// its fields are malformed.
    pub fn classify(value: Value) -> serde_json::Result<Option<Self>> {
        let Some(object) = value.as_object() else {
            return Ok(None);
        };
        let has_id = object.get("id").is_some_and(|id| !id.is_null());
        let method = object.get("method").and_then(Value::as_str);

        match (has_id, method) {
            (true, None) => Ok(Some(Self::Response(serde_json::from_value(value)?))),
            (true, Some(_)) => Ok(Some(Self::Request(serde_json::from_value(value)?))),
            (false, Some(METHOD_SESSION_UPDATE)) => {
                let params = object.get("params").cloned().unwrap_or(Value::Null);
                Ok(Some(Self::Notification(serde_json::from_value(params)?)))
            }
            _ => Ok(None),
        }
    }
}

// ── Session updates ─────────────────────────────────────────────────────────

/// Decoded `session/update` payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "sessionUpdate", rename_all = "snake_case")]
pub enum SessionUpdate {
    /// Echo of operator input.
    UserMessageChunk {
        /// Content block.
        content: Value,
    },
    /// Streamed assistant text.
    AgentMessageChunk {
        /// Content block.
        content: Value,
    },
    /// Streamed assistant reasoning.
    AgentThoughtChunk {
        /// Content block.
        content: Value,
    },
    /// A tool call was announced.
    ToolCall(ToolCallReport),
    /// A tool call changed.
    ToolCallUpdate(ToolCallReport),
    /// Notification-style permission ask.
    PermissionAsk {
        /// The ask.
        #[serde(rename = "permissionAsk")]
        permission_ask: RawPermissionAsk,
    },
    /// Replacement set of configuration options.
    ConfigOptionsUpdate {
        /// New options.
        #[serde(
            rename = "configOptions",
            deserialize_with = "crate::models::config_option::deserialize_config_options"
        )]
        config_options: Vec<ConfigOption>,
    },
    /// `plan`, `usage_update`, `available_commands_update`, ….
    #[serde(other)]
    Other,
}

/// Tool-call fields as reported by an agent.
///
/// Agents either nest the record under `toolCall` or flatten its fields
/// into the update; [`ToolCallReport::normalize`] folds both shapes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallReport {
    /// Nested form.
    #[serde(default)]
    pub tool_call: Option<Box<ToolCallReport>>,
    /// Tool-call id.
    #[serde(default)]
    pub tool_call_id: Option<String>,
    /// Title.
    #[serde(default)]
    pub title: Option<String>,
    /// Kind.
    #[serde(default)]
    pub kind: Option<String>,
    /// Status.
    #[serde(default)]
    pub status: Option<ToolCallStatus>,
    /// Content block or list of blocks.
    #[serde(default)]
    pub content: Option<Value>,
    /// Touched locations.
    #[serde(default)]
    pub locations: Option<Vec<Value>>,
    /// Raw input arguments.
    #[serde(default)]
    pub raw_input: Option<Value>,
    /// Raw output.
    #[serde(default)]
    pub raw_output: Option<Value>,
}

impl ToolCallReport {
    /// Resolve the nested form, returning `None` when no id is present.
    #[must_use]
    pub fn normalize(mut self) -> Option<Self> {
        if let Some(nested) = self.tool_call.take() {
            if nested.tool_call_id.is_some() {
                return Some(*nested);
            }
        }
        self.tool_call_id.is_some().then_some(self)
    }
}

/// Permission ask in the agent's notification shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPermissionAsk {
    /// Identifier.
    pub permission_id: String,
    /// Question text.
    #[serde(default)]
    pub question: String,
    /// Options.
    #[serde(default)]
    pub options: Vec<PermissionOption>,
    /// Preselected option value.
    #[serde(default)]
    pub default_option: Option<String>,
}

/// Parameters of `session/request_permission`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequestParams {
    /// Session id.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Offered options.
    #[serde(default)]
    pub options: Vec<PermissionRequestOption>,
    /// The tool call awaiting approval.
    #[serde(default)]
    pub tool_call: PermissionToolCall,
}

/// One option of `session/request_permission`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequestOption {
    /// Value to answer with.
    pub option_id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// `allow_once`, `reject_always`, ….
    #[serde(default)]
    pub kind: Option<String>,
}

/// Tool-call summary attached to a permission request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionToolCall {
    /// Tool-call id.
    #[serde(default)]
    pub tool_call_id: Option<String>,
    /// Title, used as the question.
    #[serde(default)]
    pub title: Option<String>,
}

// ── Content helpers ──────────────────────────────────────────────────────────

/// Text of a single content block; empty for non-text blocks.
///
/// A bare string is taken as its own text.
#[must_use]
pub fn block_text(block: &Value) -> &str {
    let block = unwrap_content_envelope(block);
    if let Value::String(text) = block {
        return text;
    }
    if block.get("type").and_then(Value::as_str) == Some("text") {
        block.get("text").and_then(Value::as_str).unwrap_or_default()
    } else {
        ""
    }
}

/// Concatenated text of a content field holding one block or a list of blocks.
#[must_use]
pub fn content_text(content: &Value) -> String {
    match content {
        Value::Array(blocks) => blocks.iter().map(block_text).collect(),
        other => block_text(other).to_owned(),
    }
}

/// Strip one `{type:"content", content:{…}}` envelope.
fn unwrap_content_envelope(block: &Value) -> &Value {
    match block.get("content") {
        Some(inner)
            if inner.is_object() && block.get("type").and_then(Value::as_str) == Some("content") =>
        {
            inner
        }
        _ => block,
    }
}

/// Render a raw input/output value for display.
///
/// Strings are returned verbatim, `null` and `{}` render empty, anything
/// else is pretty-printed JSON.
#[must_use]
pub fn stringify_raw(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(Value::Object(map)) if map.is_empty() => String::new(),
        Some(other) => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

// ── Outbound lines ───────────────────────────────────────────────────────────

/// Serialize a request as one NDJSON line (newline included).
#[must_use]
pub fn request_line(id: u64, method: &str, params: &Value) -> String {
    let document = json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "method": method,
        "params": params,
    });
    format!("{document}\n")
}

/// Serialize a successful result for an agent-initiated request.
#[must_use]
pub fn result_line(id: &Value, result: &Value) -> String {
    let document = json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "result": result,
    });
    format!("{document}\n")
}

/// Result line selecting `option_id` for a `session/request_permission`.
#[must_use]
pub fn permission_response_line(request_id: &Value, option_id: &str) -> String {
    result_line(
        request_id,
        &json!({ "outcome": { "outcome": "selected", "optionId": option_id } }),
    )
}

/// Notification answering a notification-style permission ask.
#[must_use]
pub fn permission_notification_line(permission_id: &str, response: &str) -> String {
    let document = json!({
        "jsonrpc": JSONRPC_VERSION,
        "method": METHOD_PERMISSION_RESPONSE,
        "params": { "permissionId": permission_id, "response": response },
    });
    format!("{document}\n")
}
