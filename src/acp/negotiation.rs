//! Session negotiation state machine.
//!
//! [`Negotiator`] performs no I/O. Each operation returns the [`Effect`]s the
//! caller must carry out: requests to write to the agent and session events
//! to surface. Responses are correlated to their purpose through
//! [`PendingRequests`], keyed by the numeric JSON-RPC id.
//!
//! ```text
//! Idle ─start─▶ Initializing ─┬─(resume, list)──▶ ResolvingResume ─▶ Loading ─┐
//!                             ├─(resume)─────────────────────────────▶ Loading ─┤
//!                             └─────────────────────────────────────▶ Creating ─┴─▶ Ready
//! ```

use std::collections::HashSet;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::jsonrpc::{request_line, JsonRpcError, JsonRpcResponse, METHOD_NOT_FOUND};
use crate::models::config_option::{decode_config_options, CATEGORY_MODE, CATEGORY_MODEL};
use crate::models::{ConfigOption, ConfigOptionValue};

/// ACP protocol version sent in `initialize`.
pub const PROTOCOL_VERSION: u64 = 1;

// ── Effects ──────────────────────────────────────────────────────────────────

/// A request to write to the agent.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    /// Correlation id.
    pub id: u64,
    /// Method name.
    pub method: &'static str,
    /// Parameters.
    pub params: Value,
}

impl OutboundRequest {
    /// Serialize as one NDJSON line.
    #[must_use]
    pub fn to_line(&self) -> String {
        request_line(self.id, self.method, &self.params)
    }
}

/// Outcome of a negotiation step.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Write this request to the agent.
    Send(OutboundRequest),
    /// A session is established and prompts may be sent.
    SessionReady {
        /// Agent-assigned session id.
        session_id: String,
        /// Whether an existing session was loaded.
        resumed: bool,
    },
    /// A resume attempt did not succeed.
    LoadFailed {
        /// The session that could not be loaded.
        session_id: String,
        /// Reason reported by the agent or the negotiator.
        message: String,
    },
    /// The outstanding prompt turn finished.
    TurnCompleted {
        /// Agent-reported stop reason.
        stop_reason: Option<String>,
    },
    /// The active session's title changed.
    TitleChanged {
        /// Session id.
        session_id: String,
        /// New, trimmed title.
        title: String,
    },
    /// The configuration option set changed.
    ConfigChanged(Vec<ConfigOption>),
    /// A request failed and no recovery applies.
    SessionError {
        /// JSON-RPC error code.
        code: i64,
        /// Error message.
        message: String,
    },
}

// ── Correlation table ────────────────────────────────────────────────────────

/// Why a `session/list` was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListPurpose {
    /// Resolve the cwd of a session about to be resumed.
    ResumePreflight,
    /// Pick up title changes of the active session.
    TitleRefresh,
}

/// What an outstanding request was for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPurpose {
    /// `initialize`.
    Initialize,
    /// `session/new`.
    NewSession,
    /// `session/load`.
    LoadSession,
    /// `session/list`.
    ListSessions(ListPurpose),
    /// `session/prompt`.
    Prompt,
    /// `session/set_model`, `session/set_mode` or `session/set_config_option`.
    ConfigSet,
}

/// Outstanding request ids by purpose.
///
/// One slot per purpose except configuration changes, which may overlap.
#[derive(Debug)]
pub struct PendingRequests {
    next_id: u64,
    initialize: Option<u64>,
    new_session: Option<u64>,
    load_session: Option<u64>,
    list_sessions: Option<(u64, ListPurpose)>,
    prompt: Option<u64>,
    config_set: HashSet<u64>,
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self {
            next_id: 1,
            initialize: None,
            new_session: None,
            load_session: None,
            list_sessions: None,
            prompt: None,
            config_set: HashSet::new(),
        }
    }
}

impl PendingRequests {
    /// Allocate an id and record its purpose.
    fn register(&mut self, purpose: RequestPurpose) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        match purpose {
            RequestPurpose::Initialize => self.initialize = Some(id),
            RequestPurpose::NewSession => self.new_session = Some(id),
            RequestPurpose::LoadSession => self.load_session = Some(id),
            RequestPurpose::ListSessions(list) => self.list_sessions = Some((id, list)),
            RequestPurpose::Prompt => self.prompt = Some(id),
            RequestPurpose::ConfigSet => {
                self.config_set.insert(id);
            }
        }
        id
    }

    /// Remove `id` from the table, returning its purpose.
    fn take(&mut self, id: u64) -> Option<RequestPurpose> {
        fn take_slot(slot: &mut Option<u64>, id: u64) -> bool {
            if *slot == Some(id) {
                *slot = None;
                true
            } else {
                false
            }
        }

        if take_slot(&mut self.initialize, id) {
            return Some(RequestPurpose::Initialize);
        }
        if take_slot(&mut self.new_session, id) {
            return Some(RequestPurpose::NewSession);
        }
        if take_slot(&mut self.load_session, id) {
            return Some(RequestPurpose::LoadSession);
        }
        if take_slot(&mut self.prompt, id) {
            return Some(RequestPurpose::Prompt);
        }
        if let Some((list_id, list)) = self.list_sessions {
            if list_id == id {
                self.list_sessions = None;
                return Some(RequestPurpose::ListSessions(list));
            }
        }
        self.config_set
            .remove(&id)
            .then_some(RequestPurpose::ConfigSet)
    }

    /// Whether a request of `purpose` is outstanding.
    ///
    /// For [`RequestPurpose::ListSessions`] any list matches regardless of
    /// its [`ListPurpose`].
    #[must_use]
    pub fn is_pending(&self, purpose: RequestPurpose) -> bool {
        match purpose {
            RequestPurpose::Initialize => self.initialize.is_some(),
            RequestPurpose::NewSession => self.new_session.is_some(),
            RequestPurpose::LoadSession => self.load_session.is_some(),
            RequestPurpose::ListSessions(_) => self.list_sessions.is_some(),
            RequestPurpose::Prompt => self.prompt.is_some(),
            RequestPurpose::ConfigSet => !self.config_set.is_empty(),
        }
    }

    /// Forget every outstanding request, keeping the id counter.
    fn clear(&mut self) {
        *self = Self {
            next_id: self.next_id,
            ..Self::default()
        };
    }
}

// ── Session model ───────────────────────────────────────────────────────────

/// What the caller wants from a freshly spawned agent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionRequest {
    /// Working directory for new sessions and the load fallback.
    pub cwd: String,
    /// Session to resume, if any.
    pub resume: Option<String>,
}

/// Capabilities learned from `initialize`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// `agentCapabilities.loadSession`.
    pub can_load_session: bool,
    /// `agentCapabilities.sessionCapabilities.list`.
    pub can_list_sessions: bool,
}

/// The active session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Agent-assigned id.
    pub id: String,
    /// Resolved working directory.
    pub cwd: String,
}

/// Where the handshake currently stands.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NegotiationPhase {
    /// Nothing started.
    #[default]
    Idle,
    /// Waiting for `initialize`.
    Initializing,
    /// Waiting for the preflight `session/list`.
    ResolvingResume {
        /// Session being resumed.
        session_id: String,
    },
    /// Waiting for `session/load`.
    Loading {
        /// Session being loaded.
        session_id: String,
    },
    /// Waiting for `session/new`.
    Creating,
    /// A session is active.
    Ready,
    /// Negotiation ended without a session.
    Failed,
    /// The agent process exited.
    Closed,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeResult {
    #[serde(default)]
    agent_capabilities: AgentCapabilities,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentCapabilities {
    #[serde(default)]
    load_session: bool,
    #[serde(default)]
    session_capabilities: Option<SessionCapabilities>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionCapabilities {
    #[serde(default)]
    list: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ListResult {
    #[serde(default)]
    sessions: Vec<ListedSession>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListedSession {
    session_id: String,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

/// Result of `session/new`, `session/load` and the `set_*` requests.
#[derive(Debug, Default)]
struct SessionResult {
    session_id: Option<String>,
    config_options: Option<Vec<ConfigOption>>,
    models: Option<ModelState>,
    modes: Option<ModeState>,
}

impl SessionResult {
    /// Each field decodes on its own; a malformed field is logged and left
    /// unset without affecting the others.
    fn decode(result: Option<&Value>) -> Self {
        let Some(object) = result.and_then(Value::as_object) else {
            return Self::default();
        };
        Self {
            session_id: decode_field(object, "sessionId"),
            config_options: object
                .get("configOptions")
                .filter(|value| !value.is_null())
                .and_then(|value| {
                    let options = decode_config_options(value);
                    if options.is_none() {
                        warn!("configOptions is not an array");
                    }
                    options
                }),
            models: decode_field(object, "models"),
            modes: decode_field(object, "modes"),
        }
    }
}

/// Decode `object[key]`; `None` when absent, null or malformed.
fn decode_field<T: DeserializeOwned>(object: &Map<String, Value>, key: &str) -> Option<T> {
    let value = object.get(key).filter(|value| !value.is_null())?;
    T::deserialize(value)
        .map_err(|err| warn!(%err, field = key, "ignoring malformed result field"))
        .ok()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelState {
    #[serde(default)]
    current_model_id: Option<String>,
    #[serde(default)]
    available_models: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelInfo {
    model_id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModeState {
    #[serde(default)]
    current_mode_id: Option<String>,
    #[serde(default)]
    available_modes: Vec<ModeInfo>,
}

#[derive(Debug, Deserialize)]
struct ModeInfo {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptResult {
    #[serde(default)]
    stop_reason: Option<String>,
}

/// Deserialize a result payload, falling back to defaults on a mismatch.
fn decode_result<T: DeserializeOwned + Default>(result: Option<&Value>) -> T {
    match result {
        Some(value) => T::deserialize(value).unwrap_or_else(|err| {
            warn!(%err, "unexpected result shape");
            T::default()
        }),
        None => T::default(),
    }
}

// ── Negotiator ───────────────────────────────────────────────────────────────

/// Drives one agent process from `initialize` through prompt turns.
#[derive(Debug, Default)]
pub struct Negotiator {
    pending: PendingRequests,
    phase: NegotiationPhase,
    capabilities: Capabilities,
    request: SessionRequest,
    session: Option<Session>,
    config_options: Vec<ConfigOption>,
    last_title: Option<String>,
}

impl Negotiator {
    /// Create an idle negotiator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> &NegotiationPhase {
        &self.phase
    }

    /// Capabilities learned from `initialize`.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// The active session, if one is established.
    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Active session id.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|session| session.id.as_str())
    }

    /// Known configuration options.
    #[must_use]
    pub fn config_options(&self) -> &[ConfigOption] {
        &self.config_options
    }

    /// Outstanding request table.
    #[must_use]
    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    /// Whether a prompt turn is in flight.
    #[must_use]
    pub fn is_prompt_pending(&self) -> bool {
        self.pending.is_pending(RequestPurpose::Prompt)
    }

    /// Begin negotiation with a freshly spawned agent.
    pub fn start(&mut self, request: SessionRequest) -> Vec<Effect> {
        *self = Self {
            request,
            ..Self::default()
        };
        self.phase = NegotiationPhase::Initializing;
        vec![self.send(
            RequestPurpose::Initialize,
            "initialize",
            json!({ "protocolVersion": PROTOCOL_VERSION, "clientCapabilities": {} }),
        )]
    }

    /// Correlate a response and advance the handshake.
    pub fn handle_response(&mut self, response: &JsonRpcResponse) -> Vec<Effect> {
        let Some(id) = response.numeric_id() else {
            debug!(id = %response.id, "ignoring response with non-numeric id");
            return Vec::new();
        };
        let Some(purpose) = self.pending.take(id) else {
            debug!(id, "ignoring uncorrelated response");
            return Vec::new();
        };

        if let Some(error) = &response.error {
            return self.handle_error(purpose, error);
        }

        let result = response.result.as_ref();
        match purpose {
            RequestPurpose::Initialize => self.on_initialized(result),
            RequestPurpose::ListSessions(ListPurpose::ResumePreflight) => {
                self.on_preflight_listed(result)
            }
            RequestPurpose::ListSessions(ListPurpose::TitleRefresh) => {
                self.on_title_listed(result)
            }
            RequestPurpose::NewSession => self.on_session_established(result, false),
            RequestPurpose::LoadSession => self.on_session_established(result, true),
            RequestPurpose::Prompt => {
                let outcome: PromptResult = decode_result(result);
                let mut effects = vec![Effect::TurnCompleted {
                    stop_reason: outcome.stop_reason,
                }];
                effects.extend(self.refresh_title());
                effects
            }
            RequestPurpose::ConfigSet => {
                let outcome = SessionResult::decode(result);
                self.merge_config(outcome).into_iter().collect()
            }
        }
    }

    /// Issue `session/prompt` for `text`.
    ///
    /// Returns `None` when no session is established, a prompt is already in
    /// flight, or the text is blank.
    pub fn send_prompt(&mut self, text: &str) -> Option<OutboundRequest> {
        let session_id = self.session_id()?.to_owned();
        if self.is_prompt_pending() || text.trim().is_empty() {
            return None;
        }
        let id = self.pending.register(RequestPurpose::Prompt);
        Some(OutboundRequest {
            id,
            method: "session/prompt",
            params: json!({
                "sessionId": session_id,
                "prompt": [{ "type": "text", "text": text }],
            }),
        })
    }

    /// Change a configuration option, updating the local copy optimistically.
    ///
    /// Returns `None` when no session is established.
    pub fn set_config_option(&mut self, config_id: &str, value: &str) -> Option<OutboundRequest> {
        let session_id = self.session_id()?.to_owned();

        let option = self
            .config_options
            .iter_mut()
            .find(|option| option.id == config_id);
        let (method, params) = match option.as_ref().and_then(|option| option.category.as_deref()) {
            Some(CATEGORY_MODEL) => (
                "session/set_model",
                json!({ "sessionId": session_id, "modelId": value }),
            ),
            Some(CATEGORY_MODE) => (
                "session/set_mode",
                json!({ "sessionId": session_id, "modeId": value }),
            ),
            _ => (
                "session/set_config_option",
                json!({ "sessionId": session_id, "configId": config_id, "value": value }),
            ),
        };
        if let Some(option) = option {
            option.current_value = value.to_owned();
        }

        let id = self.pending.register(RequestPurpose::ConfigSet);
        Some(OutboundRequest { id, method, params })
    }

    /// Replace the option set after a `config_options_update` notification.
    pub fn apply_config_update(&mut self, options: Vec<ConfigOption>) {
        self.config_options = options;
    }

    /// The agent process exited.
    pub fn handle_exit(&mut self) {
        self.session = None;
        self.pending.clear();
        self.phase = NegotiationPhase::Closed;
    }

    // ── Response handlers ────────────────────────────────────────────────────

    fn on_initialized(&mut self, result: Option<&Value>) -> Vec<Effect> {
        let init: InitializeResult = decode_result(result);
        let caps = init.agent_capabilities;
        self.capabilities = Capabilities {
            can_load_session: caps.load_session,
            can_list_sessions: caps
                .session_capabilities
                .and_then(|session| session.list)
                .is_some_and(|list| list == Value::Bool(true) || list.is_object()),
        };
        info!(
            can_load_session = self.capabilities.can_load_session,
            can_list_sessions = self.capabilities.can_list_sessions,
            "agent initialized"
        );

        match self.request.resume.clone() {
            Some(session_id) if self.capabilities.can_load_session => {
                if self.capabilities.can_list_sessions {
                    self.phase = NegotiationPhase::ResolvingResume { session_id };
                    vec![self.send(
                        RequestPurpose::ListSessions(ListPurpose::ResumePreflight),
                        "session/list",
                        json!({}),
                    )]
                } else {
                    let cwd = self.request.cwd.clone();
                    vec![self.load(session_id, cwd)]
                }
            }
            Some(session_id) => {
                self.phase = NegotiationPhase::Failed;
                vec![Effect::LoadFailed {
                    session_id,
                    message: "agent does not support session/load".to_owned(),
                }]
            }
            None => vec![self.create()],
        }
    }

    fn on_preflight_listed(&mut self, result: Option<&Value>) -> Vec<Effect> {
        let NegotiationPhase::ResolvingResume { session_id } = self.phase.clone() else {
            return Vec::new();
        };
        let listed: ListResult = decode_result(result);
        match listed
            .sessions
            .into_iter()
            .find(|entry| entry.session_id == session_id)
        {
            Some(entry) => {
                let cwd = entry.cwd.unwrap_or_else(|| self.request.cwd.clone());
                vec![self.load(session_id, cwd)]
            }
            None => {
                warn!(%session_id, "resume target not listed by agent, creating a new session");
                vec![
                    Effect::LoadFailed {
                        message: format!("session {session_id} not found"),
                        session_id,
                    },
                    self.create(),
                ]
            }
        }
    }

    fn on_title_listed(&mut self, result: Option<&Value>) -> Vec<Effect> {
        let Some(session_id) = self.session_id().map(str::to_owned) else {
            return Vec::new();
        };
        let listed: ListResult = decode_result(result);
        let title = listed
            .sessions
            .into_iter()
            .find(|entry| entry.session_id == session_id)
            .and_then(|entry| entry.title)
            .map(|title| title.trim().to_owned())
            .filter(|title| !title.is_empty());

        match title {
            Some(title) if self.last_title.as_deref() != Some(title.as_str()) => {
                self.last_title = Some(title.clone());
                vec![Effect::TitleChanged { session_id, title }]
            }
            _ => Vec::new(),
        }
    }

    fn on_session_established(&mut self, result: Option<&Value>, resumed: bool) -> Vec<Effect> {
        let outcome = SessionResult::decode(result);
        let loading = match &self.phase {
            NegotiationPhase::Loading { session_id } => Some(session_id.clone()),
            _ => None,
        };
        let Some(session_id) = loading.or_else(|| outcome.session_id.clone()) else {
            self.phase = NegotiationPhase::Failed;
            return vec![Effect::SessionError {
                code: 0,
                message: "session/new result carried no sessionId".to_owned(),
            }];
        };
        let parked = self.session.take().filter(|_| resumed);
        let cwd = parked.map_or_else(|| self.request.cwd.clone(), |pending| pending.cwd);

        info!(%session_id, resumed, "session ready");
        self.session = Some(Session {
            id: session_id.clone(),
            cwd,
        });
        self.phase = NegotiationPhase::Ready;

        let mut effects: Vec<Effect> = self.merge_config(outcome).into_iter().collect();
        effects.push(Effect::SessionReady {
            session_id,
            resumed,
        });
        effects.extend(self.refresh_title());
        effects
    }

    fn handle_error(&mut self, purpose: RequestPurpose, error: &JsonRpcError) -> Vec<Effect> {
        warn!(?purpose, code = error.code, message = %error.message, "agent request failed");
        let session_error = || Effect::SessionError {
            code: error.code,
            message: error.message.clone(),
        };

        match purpose {
            RequestPurpose::ListSessions(list) => {
                if error.code == METHOD_NOT_FOUND {
                    self.capabilities.can_list_sessions = false;
                }
                match (list, self.phase.clone()) {
                    (
                        ListPurpose::ResumePreflight,
                        NegotiationPhase::ResolvingResume { session_id },
                    ) => {
                        let cwd = self.request.cwd.clone();
                        vec![self.load(session_id, cwd)]
                    }
                    (ListPurpose::TitleRefresh, _) => Vec::new(),
                    _ if error.code == METHOD_NOT_FOUND => Vec::new(),
                    _ => vec![session_error()],
                }
            }
            RequestPurpose::LoadSession => {
                let session_id = match &self.phase {
                    NegotiationPhase::Loading { session_id } => session_id.clone(),
                    _ => self.request.resume.clone().unwrap_or_default(),
                };
                self.session = None;
                vec![
                    Effect::LoadFailed {
                        session_id,
                        message: error.message.clone(),
                    },
                    self.create(),
                ]
            }
            RequestPurpose::Initialize | RequestPurpose::NewSession => {
                self.phase = NegotiationPhase::Failed;
                vec![session_error()]
            }
            RequestPurpose::Prompt | RequestPurpose::ConfigSet => vec![session_error()],
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    fn send(&mut self, purpose: RequestPurpose, method: &'static str, params: Value) -> Effect {
        let id = self.pending.register(purpose);
        debug!(id, method, "negotiation request");
        Effect::Send(OutboundRequest { id, method, params })
    }

    fn create(&mut self) -> Effect {
        self.phase = NegotiationPhase::Creating;
        let cwd = self.request.cwd.clone();
        self.send(
            RequestPurpose::NewSession,
            "session/new",
            json!({ "cwd": cwd, "mcpServers": [] }),
        )
    }

    fn load(&mut self, session_id: String, cwd: String) -> Effect {
        let params = json!({ "sessionId": session_id, "cwd": cwd, "mcpServers": [] });
        // Parked until the load succeeds so the resolved cwd survives.
        self.session = Some(Session {
            id: session_id.clone(),
            cwd,
        });
        self.phase = NegotiationPhase::Loading { session_id };
        self.send(RequestPurpose::LoadSession, "session/load", params)
    }

    fn refresh_title(&mut self) -> Option<Effect> {
        if !self.capabilities.can_list_sessions
            || self
                .pending
                .is_pending(RequestPurpose::ListSessions(ListPurpose::TitleRefresh))
        {
            return None;
        }
        Some(self.send(
            RequestPurpose::ListSessions(ListPurpose::TitleRefresh),
            "session/list",
            json!({}),
        ))
    }

    /// Fold options from a new/load/config-set result; `Some` when any are known.
    fn merge_config(&mut self, result: SessionResult) -> Option<Effect> {
        if let Some(options) = result.config_options {
            self.config_options = options;
        }

        if let Some(models) = result.models {
            if !self.has_category(CATEGORY_MODEL) && !models.available_models.is_empty() {
                self.config_options.push(ConfigOption {
                    id: CATEGORY_MODEL.to_owned(),
                    name: "Model".to_owned(),
                    description: None,
                    category: Some(CATEGORY_MODEL.to_owned()),
                    kind: "select".to_owned(),
                    current_value: models.current_model_id.unwrap_or_default(),
                    options: models
                        .available_models
                        .into_iter()
                        .map(|model| ConfigOptionValue {
                            name: model.name.unwrap_or_else(|| model.model_id.clone()),
                            value: model.model_id,
                            description: model.description,
                        })
                        .collect(),
                });
            }
        }

        if let Some(modes) = result.modes {
            if !self.has_category(CATEGORY_MODE) && !modes.available_modes.is_empty() {
                self.config_options.push(ConfigOption {
                    id: CATEGORY_MODE.to_owned(),
                    name: "Mode".to_owned(),
                    description: None,
                    category: Some(CATEGORY_MODE.to_owned()),
                    kind: "select".to_owned(),
                    current_value: modes.current_mode_id.unwrap_or_default(),
                    options: modes
                        .available_modes
                        .into_iter()
                        .map(|mode| ConfigOptionValue {
                            name: mode.name.unwrap_or_else(|| mode.id.clone()),
                            value: mode.id,
                            description: mode.description,
                        })
                        .collect(),
                });
            }
        }

        (!self.config_options.is_empty()).then(|| Effect::ConfigChanged(self.config_options.clone()))
    }

    fn has_category(&self, category: &str) -> bool {
        self.config_options
            .iter()
            .any(|option| option.has_category(category))
    }
}
