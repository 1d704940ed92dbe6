//! Unit tests for the session negotiation state machine.

use serde_json::{json, Value};

use acp_bridge::acp::jsonrpc::{JsonRpcError, JsonRpcResponse, METHOD_NOT_FOUND};
use acp_bridge::acp::negotiation::{
    Effect, ListPurpose, NegotiationPhase, Negotiator, OutboundRequest, RequestPurpose,
    SessionRequest,
};

fn ok(id: u64, result: Value) -> JsonRpcResponse {
    JsonRpcResponse {
        id: json!(id),
        result: Some(result),
        error: None,
    }
}

fn err(id: u64, code: i64, message: &str) -> JsonRpcResponse {
    JsonRpcResponse {
        id: json!(id),
        result: None,
        error: Some(JsonRpcError {
            code,
            message: message.into(),
            data: None,
        }),
    }
}

fn sends(effects: &[Effect]) -> Vec<&OutboundRequest> {
    effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::Send(request) => Some(request),
            _ => None,
        })
        .collect()
}

fn only_send(effects: &[Effect]) -> OutboundRequest {
    let requests = sends(effects);
    assert_eq!(requests.len(), 1, "expected one request in {effects:?}");
    requests[0].clone()
}

fn fresh(cwd: &str, resume: Option<&str>) -> (Negotiator, OutboundRequest) {
    let mut negotiator = Negotiator::new();
    let effects = negotiator.start(SessionRequest {
        cwd: cwd.into(),
        resume: resume.map(str::to_owned),
    });
    let init = only_send(&effects);
    (negotiator, init)
}

/// Drive a plain handshake to `Ready` with session `s1`.
fn ready() -> Negotiator {
    let (mut negotiator, init) = fresh("/work", None);
    let new = only_send(&negotiator.handle_response(&ok(init.id, json!({ "agentCapabilities": {} }))));
    negotiator.handle_response(&ok(new.id, json!({ "sessionId": "s1" })));
    negotiator
}

// ── Handshake ────────────────────────────────────────────────────────────────

#[test]
fn start_sends_initialize_with_protocol_version() {
    let (negotiator, init) = fresh("/work", None);

    assert_eq!(init.method, "initialize");
    assert_eq!(init.params["protocolVersion"], 1);
    assert_eq!(negotiator.phase(), &NegotiationPhase::Initializing);
    assert!(negotiator.pending().is_pending(RequestPurpose::Initialize));
}

#[test]
fn new_session_flow_reaches_ready() {
    let (mut negotiator, init) = fresh("/work", None);

    let effects = negotiator.handle_response(&ok(init.id, json!({ "agentCapabilities": {} })));
    let new = only_send(&effects);
    assert_eq!(new.method, "session/new");
    assert_eq!(new.params, json!({ "cwd": "/work", "mcpServers": [] }));

    let effects = negotiator.handle_response(&ok(new.id, json!({ "sessionId": "s1" })));
    assert!(effects.contains(&Effect::SessionReady {
        session_id: "s1".into(),
        resumed: false
    }));
    assert!(sends(&effects).is_empty(), "no list without the capability");
    assert_eq!(negotiator.session_id(), Some("s1"));
    assert_eq!(negotiator.phase(), &NegotiationPhase::Ready);
    assert!(!negotiator
        .pending()
        .is_pending(RequestPurpose::ListSessions(ListPurpose::ResumePreflight)));
    assert!(!negotiator.pending().is_pending(RequestPurpose::LoadSession));
}

#[test]
fn resume_lists_before_loading_and_uses_listed_cwd() {
    let (mut negotiator, init) = fresh("/caller", Some("s1"));

    let caps = json!({
        "agentCapabilities": { "loadSession": true, "sessionCapabilities": { "list": true } }
    });
    let list = only_send(&negotiator.handle_response(&ok(init.id, caps)));
    assert_eq!(list.method, "session/list");
    assert!(matches!(
        negotiator.phase(),
        NegotiationPhase::ResolvingResume { session_id } if session_id == "s1"
    ));

    let listing = json!({ "sessions": [
        { "sessionId": "other", "cwd": "/elsewhere" },
        { "sessionId": "s1", "cwd": "/proj" },
    ]});
    let load = only_send(&negotiator.handle_response(&ok(list.id, listing)));
    assert_eq!(load.method, "session/load");
    assert_eq!(
        load.params,
        json!({ "sessionId": "s1", "cwd": "/proj", "mcpServers": [] })
    );

    let effects = negotiator.handle_response(&ok(load.id, json!({})));
    assert!(effects.contains(&Effect::SessionReady {
        session_id: "s1".into(),
        resumed: true
    }));
    assert_eq!(negotiator.session().map(|s| s.cwd.as_str()), Some("/proj"));
}

#[test]
fn resume_without_list_support_loads_with_caller_cwd() {
    let (mut negotiator, init) = fresh("/caller", Some("s1"));

    let caps = json!({ "agentCapabilities": { "loadSession": true } });
    let load = only_send(&negotiator.handle_response(&ok(init.id, caps)));

    assert_eq!(load.method, "session/load");
    assert_eq!(load.params["cwd"], "/caller");
}

#[test]
fn list_capability_object_counts_as_supported() {
    let (mut negotiator, init) = fresh("/w", None);
    let caps = json!({ "agentCapabilities": { "sessionCapabilities": { "list": {} } } });
    negotiator.handle_response(&ok(init.id, caps));

    assert!(negotiator.capabilities().can_list_sessions);
    assert!(!negotiator.capabilities().can_load_session);
}

#[test]
fn resume_target_missing_from_list_falls_back_to_new_session() {
    let (mut negotiator, init) = fresh("/caller", Some("gone"));
    let caps = json!({
        "agentCapabilities": { "loadSession": true, "sessionCapabilities": { "list": true } }
    });
    let list = only_send(&negotiator.handle_response(&ok(init.id, caps)));

    let effects = negotiator.handle_response(&ok(list.id, json!({ "sessions": [] })));

    assert!(matches!(&effects[0], Effect::LoadFailed { session_id, .. } if session_id == "gone"));
    assert_eq!(only_send(&effects).method, "session/new");
    assert_eq!(negotiator.phase(), &NegotiationPhase::Creating);
}

#[test]
fn failed_load_reports_and_creates_new_session() {
    let (mut negotiator, init) = fresh("/caller", Some("s1"));
    let load = only_send(&negotiator.handle_response(&ok(
        init.id,
        json!({ "agentCapabilities": { "loadSession": true } }),
    )));

    let effects = negotiator.handle_response(&err(load.id, -32000, "no such session"));

    assert!(effects.contains(&Effect::LoadFailed {
        session_id: "s1".into(),
        message: "no such session".into()
    }));
    assert_eq!(only_send(&effects).method, "session/new");
    assert!(negotiator.session_id().is_none());
}

#[test]
fn resume_without_load_support_fails() {
    let (mut negotiator, init) = fresh("/caller", Some("s1"));

    let effects = negotiator.handle_response(&ok(init.id, json!({ "agentCapabilities": {} })));

    assert!(matches!(&effects[..], [Effect::LoadFailed { .. }]));
    assert_eq!(negotiator.phase(), &NegotiationPhase::Failed);
}

#[test]
fn preflight_list_error_still_loads() {
    let (mut negotiator, init) = fresh("/caller", Some("s1"));
    let caps = json!({
        "agentCapabilities": { "loadSession": true, "sessionCapabilities": { "list": true } }
    });
    let list = only_send(&negotiator.handle_response(&ok(init.id, caps)));

    let effects = negotiator.handle_response(&err(list.id, METHOD_NOT_FOUND, "nope"));

    assert_eq!(only_send(&effects).method, "session/load");
    assert!(!negotiator.capabilities().can_list_sessions);
}

#[test]
fn initialize_error_is_a_session_error() {
    let (mut negotiator, init) = fresh("/w", None);

    let effects = negotiator.handle_response(&err(init.id, -32603, "boom"));

    assert_eq!(
        effects,
        vec![Effect::SessionError {
            code: -32603,
            message: "boom".into()
        }]
    );
    assert_eq!(negotiator.phase(), &NegotiationPhase::Failed);
}

#[test]
fn uncorrelated_and_non_numeric_responses_are_ignored() {
    let (mut negotiator, _init) = fresh("/w", None);

    assert!(negotiator.handle_response(&ok(99, json!({}))).is_empty());
    let stringly = JsonRpcResponse {
        id: json!("abc"),
        result: Some(json!({})),
        error: None,
    };
    assert!(negotiator.handle_response(&stringly).is_empty());
    assert!(negotiator.pending().is_pending(RequestPurpose::Initialize));
}

// ── Prompts ──────────────────────────────────────────────────────────────────

#[test]
fn prompt_requires_session_and_allows_one_in_flight() {
    let mut idle = Negotiator::new();
    assert!(idle.send_prompt("hi").is_none());

    let mut negotiator = ready();
    assert!(negotiator.send_prompt("   ").is_none());

    let prompt = negotiator.send_prompt("hi").expect("prompt");
    assert_eq!(prompt.method, "session/prompt");
    assert_eq!(
        prompt.params,
        json!({ "sessionId": "s1", "prompt": [{ "type": "text", "text": "hi" }] })
    );
    assert!(negotiator.is_prompt_pending());
    assert!(negotiator.send_prompt("again").is_none());

    let effects = negotiator.handle_response(&ok(prompt.id, json!({ "stopReason": "end_turn" })));
    assert!(effects.contains(&Effect::TurnCompleted {
        stop_reason: Some("end_turn".into())
    }));
    assert!(!negotiator.is_prompt_pending());
}

#[test]
fn request_ids_increase_monotonically() {
    let mut negotiator = ready();
    let first = negotiator.send_prompt("one").expect("prompt");
    negotiator.handle_response(&ok(first.id, json!({})));
    let second = negotiator.send_prompt("two").expect("prompt");

    assert!(second.id > first.id);
}

#[test]
fn title_refresh_emits_changes_only() {
    let (mut negotiator, init) = fresh("/w", None);
    let caps = json!({ "agentCapabilities": { "sessionCapabilities": { "list": true } } });
    let new = only_send(&negotiator.handle_response(&ok(init.id, caps)));
    let list = only_send(&negotiator.handle_response(&ok(new.id, json!({ "sessionId": "s1" }))));
    assert_eq!(list.method, "session/list");

    let listing = json!({ "sessions": [{ "sessionId": "s1", "title": "  Fix the build  " }] });
    let effects = negotiator.handle_response(&ok(list.id, listing.clone()));
    assert_eq!(
        effects,
        vec![Effect::TitleChanged {
            session_id: "s1".into(),
            title: "Fix the build".into()
        }]
    );

    let prompt = negotiator.send_prompt("go").expect("prompt");
    let effects = negotiator.handle_response(&ok(prompt.id, json!({})));
    let relist = only_send(&effects);
    assert!(negotiator.handle_response(&ok(relist.id, listing)).is_empty());
}

// ── Configuration ────────────────────────────────────────────────────────────

fn ready_with_models() -> (Negotiator, Vec<Effect>) {
    let (mut negotiator, init) = fresh("/w", None);
    let new = only_send(&negotiator.handle_response(&ok(init.id, json!({ "agentCapabilities": {} }))));
    let effects = negotiator.handle_response(&ok(
        new.id,
        json!({
            "sessionId": "s1",
            "models": {
                "currentModelId": "fast",
                "availableModels": [
                    { "modelId": "fast", "name": "Fast" },
                    { "modelId": "smart" },
                ],
            },
            "modes": {
                "currentModeId": "code",
                "availableModes": [{ "id": "code", "name": "Code" }, { "id": "ask" }],
            },
        }),
    ));
    (negotiator, effects)
}

#[test]
fn models_and_modes_become_config_options() {
    let (negotiator, effects) = ready_with_models();

    let options = negotiator.config_options();
    assert_eq!(options.len(), 2);
    assert!(options[0].has_category("model"));
    assert_eq!(options[0].current_value, "fast");
    assert_eq!(options[0].options[1].name, "smart");
    assert!(options[1].has_category("mode"));
    assert!(effects.iter().any(|e| matches!(e, Effect::ConfigChanged(o) if o.len() == 2)));
}

#[test]
fn grouped_config_option_values_keep_the_session() {
    let (mut negotiator, init) = fresh("/w", None);
    let new = only_send(&negotiator.handle_response(&ok(init.id, json!({ "agentCapabilities": {} }))));

    let effects = negotiator.handle_response(&ok(
        new.id,
        json!({
            "sessionId": "s1",
            "configOptions": [{
                "id": "model",
                "name": "Model",
                "category": "model",
                "type": "select",
                "currentValue": "a",
                "options": [
                    { "group": "g", "name": "G", "options": [{ "value": "a", "name": "A" }] },
                    { "value": "b", "name": "B" },
                    { "unexpected": true },
                ],
            }],
        }),
    ));

    assert!(effects.contains(&Effect::SessionReady {
        session_id: "s1".into(),
        resumed: false
    }));
    assert_eq!(negotiator.session_id(), Some("s1"));
    let values: Vec<_> = negotiator.config_options()[0]
        .options
        .iter()
        .map(|value| value.value.as_str())
        .collect();
    assert_eq!(values, ["a", "b"]);
}

#[test]
fn malformed_result_fields_drop_only_themselves() {
    let (mut negotiator, init) = fresh("/w", None);
    let new = only_send(&negotiator.handle_response(&ok(init.id, json!({ "agentCapabilities": {} }))));

    let effects = negotiator.handle_response(&ok(
        new.id,
        json!({
            "sessionId": "s1",
            "configOptions": "not-a-list",
            "models": { "currentModelId": "fast", "availableModels": 7 },
            "modes": {
                "currentModeId": null,
                "availableModes": [{ "id": "code", "name": "Code" }],
            },
        }),
    ));

    assert_eq!(negotiator.session_id(), Some("s1"));
    assert_eq!(negotiator.phase(), &NegotiationPhase::Ready);
    assert!(!effects.iter().any(|e| matches!(e, Effect::SessionError { .. })));
    let options = negotiator.config_options();
    assert_eq!(options.len(), 1);
    assert!(options[0].has_category("mode"));
    assert_eq!(options[0].current_value, "");
}

#[test]
fn config_changes_route_by_category() {
    let (mut negotiator, _) = ready_with_models();

    let model = negotiator.set_config_option("model", "smart").expect("request");
    assert_eq!(model.method, "session/set_model");
    assert_eq!(model.params, json!({ "sessionId": "s1", "modelId": "smart" }));
    assert_eq!(negotiator.config_options()[0].current_value, "smart");

    let mode = negotiator.set_config_option("mode", "ask").expect("request");
    assert_eq!(mode.method, "session/set_mode");
    assert_eq!(mode.params["modeId"], "ask");

    let other = negotiator.set_config_option("effort", "high").expect("request");
    assert_eq!(other.method, "session/set_config_option");
    assert_eq!(
        other.params,
        json!({ "sessionId": "s1", "configId": "effort", "value": "high" })
    );

    assert!(negotiator.pending().is_pending(RequestPurpose::ConfigSet));
    negotiator.handle_response(&ok(model.id, json!({})));
    negotiator.handle_response(&ok(mode.id, json!({})));
    assert!(negotiator.pending().is_pending(RequestPurpose::ConfigSet));
    negotiator.handle_response(&ok(other.id, json!({})));
    assert!(!negotiator.pending().is_pending(RequestPurpose::ConfigSet));
}

#[test]
fn config_change_without_session_is_refused() {
    let mut negotiator = Negotiator::new();
    assert!(negotiator.set_config_option("model", "x").is_none());
}

// ── Exit ─────────────────────────────────────────────────────────────────────

#[test]
fn exit_clears_session_and_pending_requests() {
    let mut negotiator = ready();
    negotiator.send_prompt("hi").expect("prompt");

    negotiator.handle_exit();

    assert!(negotiator.session_id().is_none());
    assert!(!negotiator.is_prompt_pending());
    assert_eq!(negotiator.phase(), &NegotiationPhase::Closed);
}
