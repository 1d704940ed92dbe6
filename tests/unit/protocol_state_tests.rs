//! Unit tests for folding session updates into chat state.

use serde_json::{json, Value};

use acp_bridge::acp::state::{ProtocolEvent, ProtocolState};
use acp_bridge::models::{ChatRole, MessagePart, ToolCallStatus};

fn update(update: Value) -> Vec<u8> {
    let doc = json!({
        "jsonrpc": "2.0",
        "method": "session/update",
        "params": { "sessionId": "sess-1", "update": update },
    });
    format!("{doc}\n").into_bytes()
}

fn agent_text(text: &str) -> Vec<u8> {
    update(json!({
        "sessionUpdate": "agent_message_chunk",
        "content": { "type": "text", "text": text },
    }))
}

fn user_text(text: &str) -> Vec<u8> {
    update(json!({
        "sessionUpdate": "user_message_chunk",
        "content": { "type": "text", "text": text },
    }))
}

// ── Messages ────────────────────────────────────────────────────────────────

#[test]
fn consecutive_agent_chunks_merge_into_one_message() {
    let mut state = ProtocolState::new();
    state.process(&agent_text("Hel"));
    state.process(&agent_text("lo"));

    assert_eq!(state.message_count(), 1);
    let message = state.current_message().expect("current");
    assert_eq!(message.role, ChatRole::Assistant);
    assert_eq!(message.content, "Hello");
    assert_eq!(
        message.parts,
        vec![MessagePart::Text {
            content: "Hello".into()
        }]
    );
}

#[test]
fn role_change_finalizes_previous_message() {
    let mut state = ProtocolState::new();
    state.process(&user_text("question"));
    state.process(&agent_text("answer"));

    let roles: Vec<_> = state.messages().map(|m| m.role).collect();
    assert_eq!(roles, vec![ChatRole::User, ChatRole::Assistant]);
    assert_eq!(state.current_message().map(|m| m.content.as_str()), Some("answer"));
}

#[test]
fn empty_chunks_and_non_text_blocks_create_nothing() {
    let mut state = ProtocolState::new();
    state.process(&agent_text(""));
    state.process(&update(json!({
        "sessionUpdate": "agent_message_chunk",
        "content": { "type": "image", "data": "AAAA" },
    })));

    assert_eq!(state.message_count(), 0);
}

#[test]
fn thought_chunks_accumulate_in_single_part() {
    let mut state = ProtocolState::new();
    for text in ["think", "ing"] {
        state.process(&update(json!({
            "sessionUpdate": "agent_thought_chunk",
            "content": { "type": "text", "text": text },
        })));
    }
    state.process(&agent_text("done"));

    let message = state.current_message().expect("current");
    assert_eq!(message.content, "done");
    assert_eq!(
        message.parts,
        vec![
            MessagePart::Thought {
                content: "thinking".into()
            },
            MessagePart::Text {
                content: "done".into()
            },
        ]
    );
}

#[test]
fn chunk_split_mid_document_is_applied_once_complete() {
    let mut state = ProtocolState::new();
    let bytes = agent_text("split");
    let (head, tail) = bytes.split_at(bytes.len() / 2);

    state.process(head);
    assert_eq!(state.message_count(), 0);
    state.process(tail);
    assert_eq!(state.current_message().map(|m| m.content.as_str()), Some("split"));
}

#[test]
fn finalize_returns_last_message_and_clears_messages() {
    let mut state = ProtocolState::new();
    state.process(&user_text("q"));
    state.process(&agent_text("a"));

    let last = state.finalize().expect("last message");

    assert_eq!(last.content, "a");
    assert_eq!(state.message_count(), 0);
    assert!(state.finalize().is_none());
}

// ── Tool calls ──────────────────────────────────────────────────────────────

#[test]
fn tool_call_lifecycle_replaces_record_by_id() {
    let mut state = ProtocolState::new();
    state.process(&update(json!({
        "sessionUpdate": "tool_call",
        "toolCallId": "t1",
        "title": "Read file",
        "kind": "read",
        "status": "pending",
        "rawInput": { "path": "src/lib.rs" },
    })));
    state.process(&update(json!({
        "sessionUpdate": "tool_call_update",
        "toolCallId": "t1",
        "status": "in_progress",
    })));
    state.process(&update(json!({
        "sessionUpdate": "tool_call_update",
        "toolCallId": "t1",
        "status": "completed",
        "content": [{ "type": "content", "content": { "type": "text", "text": "fn main() {}" } }],
    })));

    assert_eq!(state.tool_calls().len(), 1);
    let call = &state.tool_calls()[0];
    assert_eq!(call.status, ToolCallStatus::Completed);
    assert_eq!(call.title, "Read file");
    assert_eq!(call.kind, "read");
    assert!(call.input.as_deref().is_some_and(|input| input.contains("src/lib.rs")));
    assert_eq!(call.output.as_deref(), Some("fn main() {}"));

    let message = state.current_message().expect("assistant message");
    let parts: Vec<_> = message
        .parts
        .iter()
        .filter_map(|part| match part {
            MessagePart::ToolCall(call) => Some(call),
            _ => None,
        })
        .collect();
    assert_eq!(parts.len(), 1, "the part is replaced, not appended");
    assert_eq!(parts[0].status, ToolCallStatus::Completed);
}

#[test]
fn repeated_creates_keep_one_record_with_latest_fields() {
    let mut state = ProtocolState::new();
    for (title, status) in [("a", "pending"), ("b", "pending"), ("c", "in_progress")] {
        state.process(&update(json!({
            "sessionUpdate": "tool_call",
            "toolCallId": "t1",
            "title": title,
            "status": status,
        })));
    }

    assert_eq!(state.tool_calls().len(), 1);
    assert_eq!(state.tool_calls()[0].title, "c");
    assert_eq!(state.tool_calls()[0].status, ToolCallStatus::InProgress);

    let message = state.current_message().expect("assistant message");
    let parts = message
        .parts
        .iter()
        .filter(|part| matches!(part, MessagePart::ToolCall(_)))
        .count();
    assert_eq!(parts, 1);
}

#[test]
fn nested_tool_call_shape_is_accepted() {
    let mut state = ProtocolState::new();
    state.process(&update(json!({
        "sessionUpdate": "tool_call",
        "toolCall": { "toolCallId": "t9", "title": "Run tests" },
    })));

    let call = &state.tool_calls()[0];
    assert_eq!(call.id, "t9");
    assert_eq!(call.kind, "other");
    assert_eq!(call.status, ToolCallStatus::Pending);
}

#[test]
fn tool_call_without_id_is_skipped() {
    let mut state = ProtocolState::new();
    state.process(&update(json!({
        "sessionUpdate": "tool_call",
        "title": "orphan",
    })));

    assert!(state.tool_calls().is_empty());
}

#[test]
fn update_for_unknown_tool_call_creates_it() {
    let mut state = ProtocolState::new();
    state.process(&update(json!({
        "sessionUpdate": "tool_call_update",
        "toolCallId": "late",
        "status": "in_progress",
    })));

    assert_eq!(state.tool_calls()[0].status, ToolCallStatus::InProgress);
}

#[test]
fn terminal_status_does_not_regress() {
    let mut state = ProtocolState::new();
    state.process(&update(json!({
        "sessionUpdate": "tool_call",
        "toolCallId": "t1",
        "status": "failed",
    })));
    state.process(&update(json!({
        "sessionUpdate": "tool_call_update",
        "toolCallId": "t1",
        "status": "in_progress",
    })));

    assert_eq!(state.tool_calls()[0].status, ToolCallStatus::Failed);
}

#[test]
fn tool_call_revision_tracks_changes() {
    let mut state = ProtocolState::new();
    let before = state.tool_call_revision();
    state.process(&update(json!({
        "sessionUpdate": "tool_call",
        "toolCallId": "t1",
    })));

    assert!(state.tool_call_revision() > before);
}

// ── Permissions ─────────────────────────────────────────────────────────────

fn permission_request(id: Value) -> Vec<u8> {
    let doc = json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "session/request_permission",
        "params": {
            "sessionId": "sess-1",
            "toolCall": { "toolCallId": "t1", "title": "Write config.toml" },
            "options": [
                { "optionId": "reject_once", "name": "Reject", "kind": "reject_once" },
                { "optionId": "allow_once", "name": "Allow", "kind": "allow_once" },
            ],
        },
    });
    format!("{doc}\n").into_bytes()
}

#[test]
fn permission_request_records_ask_and_emits_event() {
    let mut state = ProtocolState::new();
    let events = state.process(&permission_request(json!(7)));

    assert_eq!(events.len(), 1);
    let ProtocolEvent::PermissionRequested { request_id, ask } = &events[0] else {
        panic!("expected permission event, got {events:?}");
    };
    assert_eq!(request_id, &json!(7));
    assert_eq!(ask.id, "7");
    assert_eq!(ask.question, "Write config.toml");
    assert_eq!(ask.options.len(), 2);
    assert_eq!(
        ask.auto_approve_choice().map(|o| o.value.as_str()),
        Some("allow_once")
    );
    assert_eq!(state.permission_asks().len(), 1);
}

#[test]
fn responding_removes_pending_ask_and_records_answer() {
    let mut state = ProtocolState::new();
    state.process(&permission_request(json!("req-1")));

    let answered = state
        .respond_to_permission("req-1", "allow_once")
        .expect("pending ask");

    assert_eq!(answered.response.as_deref(), Some("allow_once"));
    assert!(state.permission_asks().is_empty());
    assert!(state.respond_to_permission("req-1", "allow_once").is_none());

    let message = state.current_message().expect("message");
    assert!(message.parts.iter().any(|part| matches!(
        part,
        MessagePart::PermissionAsk(ask) if ask.response.as_deref() == Some("allow_once")
    )));
}

#[test]
fn withdrawn_ask_can_no_longer_be_answered() {
    let mut state = ProtocolState::new();
    state.process(&permission_request(json!(4)));
    let revision = state.permission_revision();

    assert!(state.withdraw_permission("4"));
    assert!(!state.withdraw_permission("4"));

    assert!(state.permission_asks().is_empty());
    assert_eq!(state.permission_revision(), revision + 1);
    assert!(state.respond_to_permission("4", "allow_once").is_none());
}

#[test]
fn notification_permission_ask_is_recorded() {
    let mut state = ProtocolState::new();
    let events = state.process(&update(json!({
        "sessionUpdate": "permission_ask",
        "permissionAsk": {
            "permissionId": "p-1",
            "question": "Delete build/?",
            "options": [{ "label": "Yes", "value": "yes" }],
            "defaultOption": "yes",
        },
    })));

    assert!(events.is_empty());
    let ask = &state.permission_asks()[0];
    assert_eq!(ask.id, "p-1");
    assert_eq!(ask.default_option.as_deref(), Some("yes"));
}

// ── Passthrough ─────────────────────────────────────────────────────────────

#[test]
fn responses_and_config_updates_are_surfaced() {
    let mut state = ProtocolState::new();
    let mut bytes = b"{\"jsonrpc\":\"2.0\",\"id\":3,\"result\":{\"stopReason\":\"end_turn\"}}\n".to_vec();
    bytes.extend(update(json!({
        "sessionUpdate": "config_options_update",
        "configOptions": [{
            "id": "model",
            "name": "Model",
            "category": "model",
            "currentValue": "fast",
            "options": [{ "value": "fast", "name": "Fast" }],
        }],
    })));

    let events = state.process(&bytes);

    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], ProtocolEvent::Response(r) if r.id == json!(3)));
    assert!(matches!(&events[1], ProtocolEvent::ConfigOptions(opts) if opts[0].current_value == "fast"));
}

#[test]
fn config_update_with_grouped_values_is_not_dropped() {
    let mut state = ProtocolState::new();

    let events = state.process(&update(json!({
        "sessionUpdate": "config_options_update",
        "configOptions": [
            {
                "id": "model",
                "name": "Model",
                "category": "model",
                "currentValue": "a",
                "options": [
                    { "group": "fast", "name": "Fast", "options": [{ "value": "a", "name": "A" }] },
                    { "group": "smart", "name": "Smart", "options": [{ "value": "b", "name": "B" }] },
                ],
            },
            { "id": "broken" },
            {
                "id": "mode",
                "name": "Mode",
                "currentValue": "code",
                "options": [{ "value": "code", "name": "Code" }],
            },
        ],
    })));

    assert_eq!(events.len(), 1);
    let ProtocolEvent::ConfigOptions(options) = &events[0] else {
        panic!("expected config options, got {events:?}");
    };
    let ids: Vec<_> = options.iter().map(|option| option.id.as_str()).collect();
    assert_eq!(ids, ["model", "mode"]);
    let values: Vec<_> = options[0].options.iter().map(|v| v.value.as_str()).collect();
    assert_eq!(values, ["a", "b"]);
}

#[test]
fn unknown_update_kinds_are_ignored() {
    let mut state = ProtocolState::new();
    let events = state.process(&update(json!({
        "sessionUpdate": "plan",
        "entries": [],
    })));

    assert!(events.is_empty());
    assert_eq!(state.message_count(), 0);
}

#[test]
fn reset_clears_everything() {
    let mut state = ProtocolState::new();
    state.process(&agent_text("hi"));
    state.process(&permission_request(json!(1)));
    state.reset();

    assert_eq!(state.message_count(), 0);
    assert!(state.permission_asks().is_empty());
    assert!(state.tool_calls().is_empty());
}

// ── Reference flows ─────────────────────────────────────────────────────────

#[test]
fn two_agent_chunks_finalize_into_hello() {
    let mut state = ProtocolState::new();
    state.process(&agent_text("Hel"));
    state.process(&agent_text("lo"));

    let message = state.finalize().expect("finalized message");

    assert_eq!(message.content, "Hello");
    assert_eq!(
        message.parts,
        vec![MessagePart::Text {
            content: "Hello".into()
        }]
    );
}

#[test]
fn plain_string_content_becomes_input_then_output() {
    let mut state = ProtocolState::new();
    state.process(&update(json!({
        "sessionUpdate": "tool_call",
        "toolCallId": "t1",
        "content": "input-data",
    })));
    state.process(&update(json!({
        "sessionUpdate": "tool_call_update",
        "toolCallId": "t1",
        "status": "completed",
        "content": "output-data",
    })));

    let call = &state.tool_calls()[0];
    assert_eq!(call.input.as_deref(), Some("input-data"));
    assert_eq!(call.output.as_deref(), Some("output-data"));

    let wire = serde_json::to_value(call).expect("serialize");
    assert_eq!(wire["toolCallInput"], "input-data");
    assert_eq!(wire["toolCallOutput"], "output-data");
}
