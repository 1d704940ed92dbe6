//! Permission asks raised by the agent before running a tool.

use serde::{Deserialize, Serialize};

/// One selectable answer to a [`PermissionAsk`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionOption {
    /// Text shown to the operator.
    pub label: String,
    /// Opaque value echoed back to the agent (the ACP `optionId`).
    pub value: String,
}

/// An agent-initiated request for operator approval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionAsk {
    /// Identifier; the stringified JSON-RPC request id for protocol requests.
    #[serde(rename = "permissionId")]
    pub id: String,
    /// Question text.
    #[serde(rename = "permissionQuestion")]
    pub question: String,
    /// Ordered options.
    #[serde(rename = "permissionOptions")]
    pub options: Vec<PermissionOption>,
    /// Option value preselected by the agent.
    #[serde(
        rename = "permissionDefaultOption",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub default_option: Option<String>,
    /// Recorded answer once the operator (or auto-approval) responded.
    #[serde(
        rename = "permissionResponse",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub response: Option<String>,
}

impl PermissionAsk {
    /// Pick the option an unattended peer should answer with.
    ///
    /// Prefers the first option whose value mentions `allow`, falling back to
    /// the first option offered. Returns `None` when there are no options.
    #[must_use]
    pub fn auto_approve_choice(&self) -> Option<&PermissionOption> {
        self.options
            .iter()
            .find(|option| option.value.contains("allow"))
            .or_else(|| self.options.first())
    }
}
