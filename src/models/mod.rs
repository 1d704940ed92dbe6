//! Domain model module declarations.

pub mod config_option;
pub mod message;
pub mod permission;
pub mod tool_call;

pub use config_option::{ConfigOption, ConfigOptionValue};
pub use message::{ChatMessage, ChatRole, MessagePart};
pub use permission::{PermissionAsk, PermissionOption};
pub use tool_call::{ToolCall, ToolCallStatus};
