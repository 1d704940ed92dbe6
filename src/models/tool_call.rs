//! Tool-call records reported by the agent.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle status of a tool call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    /// Announced but not started.
    #[default]
    Pending,
    /// Currently executing.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl ToolCallStatus {
    /// Whether the status is final.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Determine whether a lifecycle transition is permitted.
    ///
    /// Re-reporting the current status is allowed; leaving a terminal status is not.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        self == next
            || matches!(
                (self, next),
                (
                    Self::Pending,
                    Self::InProgress | Self::Completed | Self::Failed
                ) | (Self::InProgress, Self::Completed | Self::Failed)
            )
    }
}

/// Snapshot of one tool invocation.
///
/// Updates never mutate a stored record in place; a fresh value replaces the
/// old one under the same [`ToolCall::id`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Unique identifier within a session.
    #[serde(rename = "toolCallId")]
    pub id: String,
    /// Human-readable title.
    #[serde(rename = "toolCallTitle")]
    pub title: String,
    /// Agent-defined kind (`read`, `edit`, `execute`, …).
    #[serde(rename = "toolCallKind")]
    pub kind: String,
    /// Current lifecycle status.
    #[serde(rename = "toolCallStatus")]
    pub status: ToolCallStatus,
    /// Files or regions the call touches, as reported by the agent.
    #[serde(
        rename = "toolCallLocations",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub locations: Option<Vec<Value>>,
    /// Best available rendering of the call's input.
    #[serde(
        rename = "toolCallInput",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub input: Option<String>,
    /// Best available rendering of the call's output.
    #[serde(
        rename = "toolCallOutput",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub output: Option<String>,
    /// Latest text extracted from the `content` field.
    pub content: String,
}
