//! Per-connection protocol session state.
//!
//! [`ProtocolState`] folds the agent's classified output into chat messages,
//! tool-call records and pending permission asks. Anything the state does not
//! own itself (responses, permission requests, configuration updates) is
//! handed back to the caller as a [`ProtocolEvent`].

use serde_json::Value;
use tracing::{debug, warn};

use super::jsonrpc::{
    block_text, content_text, stringify_raw, Document, JsonRpcRequest, JsonRpcResponse,
    PermissionRequestParams, SessionNotification, SessionUpdate, ToolCallReport,
    METHOD_REQUEST_PERMISSION,
};
use super::parser::StreamParser;
use crate::models::{
    ChatMessage, ChatRole, ConfigOption, MessagePart, PermissionAsk, PermissionOption, ToolCall,
};

/// Something the state's owner has to act on.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    /// A response to a request the owner wrote; forwarded untouched.
    Response(JsonRpcResponse),
    /// The agent asked for approval through `session/request_permission`.
    PermissionRequested {
        /// Raw JSON-RPC id the answer must echo.
        request_id: Value,
        /// The ask as recorded in the state.
        ask: PermissionAsk,
    },
    /// The agent replaced its configuration options.
    ConfigOptions(Vec<ConfigOption>),
}

/// Accumulated chat state for one agent process.
#[derive(Debug, Default)]
pub struct ProtocolState {
    parser: StreamParser,
    finalized: Vec<ChatMessage>,
    current: Option<ChatMessage>,
    tool_calls: Vec<ToolCall>,
    permission_asks: Vec<PermissionAsk>,
    tool_call_revision: u64,
    permission_revision: u64,
}

impl ProtocolState {
    /// Create empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a raw output chunk, folding every completed document.
    pub fn process(&mut self, chunk: &[u8]) -> Vec<ProtocolEvent> {
        self.parser
            .feed(chunk)
            .into_iter()
            .filter_map(|document| self.apply(document))
            .collect()
    }

    /// Fold one classified document.
    pub fn apply(&mut self, document: Document) -> Option<ProtocolEvent> {
        match document {
            Document::Response(response) => Some(ProtocolEvent::Response(response)),
            Document::Request(request) => self.handle_request(request),
            Document::Notification(notification) => self.handle_notification(&notification),
        }
    }

    /// The in-progress message, if any.
    #[must_use]
    pub fn current_message(&self) -> Option<&ChatMessage> {
        self.current.as_ref()
    }

    /// Finalized messages followed by the in-progress one.
    pub fn messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.finalized.iter().chain(self.current.iter())
    }

    /// Number of messages [`ProtocolState::messages`] yields.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.finalized.len() + usize::from(self.current.is_some())
    }

    /// Tool calls in the order they were first reported.
    #[must_use]
    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.tool_calls
    }

    /// Permission asks still awaiting an answer.
    #[must_use]
    pub fn permission_asks(&self) -> &[PermissionAsk] {
        &self.permission_asks
    }

    /// Counter bumped whenever a tool call is created or replaced.
    #[must_use]
    pub fn tool_call_revision(&self) -> u64 {
        self.tool_call_revision
    }

    /// Counter bumped whenever the pending permission set changes.
    #[must_use]
    pub fn permission_revision(&self) -> u64 {
        self.permission_revision
    }

    /// Move the in-progress message into the finalized list.
    pub fn finalize_current_message(&mut self) {
        if let Some(message) = self.current.take() {
            self.finalized.push(message);
        }
    }

    /// Close the turn: finalize, drop all messages and return the last one.
    pub fn finalize(&mut self) -> Option<ChatMessage> {
        self.finalize_current_message();
        std::mem::take(&mut self.finalized).pop()
    }

    /// Forget everything, including any buffered partial line.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Record `value` as the answer to the pending ask `permission_id`.
    ///
    /// Returns the answered ask, or `None` when no such ask is pending.
    pub fn respond_to_permission(
        &mut self,
        permission_id: &str,
        value: &str,
    ) -> Option<PermissionAsk> {
        let index = self
            .permission_asks
            .iter()
            .position(|ask| ask.id == permission_id)?;
        let mut ask = self.permission_asks.remove(index);
        ask.response = Some(value.to_owned());
        if let Some(current) = self.current.as_mut() {
            current.replace_permission_ask(&ask);
        }
        self.permission_revision += 1;
        Some(ask)
    }

    /// Drop the pending ask `permission_id` without answering it.
    ///
    /// Returns `false` when no such ask is pending.
    pub fn withdraw_permission(&mut self, permission_id: &str) -> bool {
        let before = self.permission_asks.len();
        self.permission_asks.retain(|ask| ask.id != permission_id);
        let withdrawn = self.permission_asks.len() != before;
        if withdrawn {
            self.permission_revision += 1;
        }
        withdrawn
    }

    // ── Requests ─────────────────────────────────────────────────────────────

    fn handle_request(&mut self, request: JsonRpcRequest) -> Option<ProtocolEvent> {
        if request.method != METHOD_REQUEST_PERMISSION {
            debug!(method = %request.method, "ignoring agent request");
            return None;
        }

        let params: PermissionRequestParams = match serde_json::from_value(request.params) {
            Ok(params) => params,
            Err(err) => {
                warn!(%err, "malformed permission request");
                return None;
            }
        };

        let ask = PermissionAsk {
            id: id_string(&request.id),
            question: params.tool_call.title.unwrap_or_default(),
            options: params
                .options
                .into_iter()
                .map(|option| PermissionOption {
                    label: option.name,
                    value: option.option_id,
                })
                .collect(),
            default_option: None,
            response: None,
        };
        self.record_permission_ask(ask.clone());

        Some(ProtocolEvent::PermissionRequested {
            request_id: request.id,
            ask,
        })
    }

    // ── Notifications ────────────────────────────────────────────────────────

    fn handle_notification(&mut self, notification: &SessionNotification) -> Option<ProtocolEvent> {
        let update = match notification.decode() {
            Ok(update) => update,
            Err(err) => {
                warn!(%err, "malformed session update");
                return None;
            }
        };

        match update {
            SessionUpdate::UserMessageChunk { content } => {
                self.push_chunk(ChatRole::User, block_text(&content));
            }
            SessionUpdate::AgentMessageChunk { content } => {
                self.push_chunk(ChatRole::Assistant, block_text(&content));
            }
            SessionUpdate::AgentThoughtChunk { content } => {
                let text = block_text(&content);
                if !text.is_empty() {
                    self.ensure_assistant_message().push_thought(text);
                }
            }
            SessionUpdate::ToolCall(report) => match report.normalize() {
                Some(report) => self.create_tool_call(report),
                None => warn!("tool call missing both toolCall and toolCallId, skipping"),
            },
            SessionUpdate::ToolCallUpdate(report) => match report.normalize() {
                Some(report) => self.update_tool_call(report),
                None => warn!("tool call update missing both toolCall and toolCallId, skipping"),
            },
            SessionUpdate::PermissionAsk { permission_ask } => {
                self.record_permission_ask(PermissionAsk {
                    id: permission_ask.permission_id,
                    question: permission_ask.question,
                    options: permission_ask.options,
                    default_option: permission_ask.default_option,
                    response: None,
                });
            }
            SessionUpdate::ConfigOptionsUpdate { config_options } => {
                return Some(ProtocolEvent::ConfigOptions(config_options));
            }
            SessionUpdate::Other => debug!("ignoring session update"),
        }
        None
    }

    fn push_chunk(&mut self, role: ChatRole, text: &str) {
        if text.is_empty() {
            return;
        }
        match self.current.as_mut() {
            Some(current) if current.role == role => current.push_text(text),
            _ => {
                self.finalize_current_message();
                self.current = Some(ChatMessage::with_text(role, text));
            }
        }
    }

    fn ensure_assistant_message(&mut self) -> &mut ChatMessage {
        if self
            .current
            .as_ref()
            .is_some_and(|current| current.role != ChatRole::Assistant)
        {
            self.finalize_current_message();
        }
        self.current
            .get_or_insert_with(|| ChatMessage::new(ChatRole::Assistant))
    }

    fn record_permission_ask(&mut self, ask: PermissionAsk) {
        self.permission_asks.retain(|pending| pending.id != ask.id);
        self.permission_asks.push(ask.clone());
        self.ensure_assistant_message()
            .parts
            .push(MessagePart::PermissionAsk(ask));
        self.permission_revision += 1;
    }

    // ── Tool calls ───────────────────────────────────────────────────────────

    fn tool_call_index(&self, id: &str) -> Option<usize> {
        self.tool_calls.iter().position(|call| call.id == id)
    }

    fn create_tool_call(&mut self, report: ToolCallReport) {
        let id = report.tool_call_id.clone().unwrap_or_default();
        if self.tool_call_index(&id).is_some() {
            self.update_tool_call(report);
            return;
        }

        let content = report
            .content
            .as_ref()
            .map(content_text)
            .unwrap_or_default();
        let raw_input = stringify_raw(report.raw_input.as_ref());
        let raw_output = stringify_raw(report.raw_output.as_ref());
        let input = if !raw_input.is_empty() {
            Some(raw_input)
        } else if !content.is_empty() {
            Some(content.clone())
        } else {
            None
        };

        let call = ToolCall {
            id,
            title: report.title.unwrap_or_default(),
            kind: report.kind.unwrap_or_else(|| "other".to_owned()),
            status: report.status.unwrap_or_default(),
            locations: report.locations,
            input,
            output: (!raw_output.is_empty()).then_some(raw_output),
            content,
        };
        self.tool_calls.push(call.clone());
        self.ensure_assistant_message()
            .parts
            .push(MessagePart::ToolCall(call));
        self.tool_call_revision += 1;
    }

    fn update_tool_call(&mut self, report: ToolCallReport) {
        let id = report.tool_call_id.as_deref().unwrap_or_default();
        let Some(index) = self.tool_call_index(id) else {
            self.create_tool_call(report);
            return;
        };

        let mut updated = self.tool_calls[index].clone();
        if let Some(status) = report.status {
            if updated.status.can_transition_to(status) {
                updated.status = status;
            } else {
                debug!(tool_call_id = %updated.id, from = ?updated.status, to = ?status, "ignoring status regression");
            }
        }
        if let Some(title) = report.title {
            updated.title = title;
        }
        if let Some(kind) = report.kind {
            updated.kind = kind;
        }
        if report.locations.is_some() {
            updated.locations = report.locations;
        }

        let raw_input = stringify_raw(report.raw_input.as_ref());
        if !raw_input.is_empty() {
            updated.input = Some(raw_input);
        }
        let raw_output = stringify_raw(report.raw_output.as_ref());
        if !raw_output.is_empty() {
            updated.output = Some(raw_output);
        }

        if let Some(content) = report.content.as_ref() {
            let text = content_text(content);
            if !text.is_empty() {
                // Terminal updates reuse `content` for the tool's output.
                let terminal = report.status.is_some_and(|status| status.is_terminal());
                if terminal && updated.output.is_none() {
                    updated.output = Some(text.clone());
                }
                updated.content = text;
            }
        }

        if let Some(current) = self.current.as_mut() {
            current.replace_tool_call(&updated);
        }
        self.tool_calls[index] = updated;
        self.tool_call_revision += 1;
    }
}

/// Stringify a JSON-RPC id the way it appears in permission ids.
fn id_string(id: &Value) -> String {
    match id {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
