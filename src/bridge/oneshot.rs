//! Server-side prompt runner.
//!
//! Spawns an agent, negotiates a session, sends one prompt and collects the
//! reply, approving every permission request on the operator's behalf. Used
//! by `POST /api/agent` and the `prompt` CLI subcommand.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::acp::jsonrpc::permission_response_line;
use crate::acp::negotiation::{Effect, NegotiationPhase, Negotiator, SessionRequest};
use crate::acp::state::{ProtocolEvent, ProtocolState};
use crate::config::AgentPreset;
use crate::transport::{
    EventSink, ProcessTransport, SpawnRequest, TaggedEvent, TransportEvent, TransportFactory,
    EVENT_CHANNEL_CAPACITY,
};
use crate::{AppError, Result};

/// One prompt to run.
#[derive(Debug, Clone)]
pub struct OneShotRequest {
    /// Agent to launch.
    pub spawn: SpawnRequest,
    /// Session to create or resume.
    pub session: SessionRequest,
    /// Prompt text.
    pub prompt: String,
    /// Configuration options applied before prompting, in order.
    pub config: Vec<(String, String)>,
    /// Overall deadline.
    pub timeout: Duration,
}

impl OneShotRequest {
    /// Build a request launching `preset` in `cwd`.
    #[must_use]
    pub fn from_preset(preset: &AgentPreset, prompt: &str, cwd: &str, timeout: Duration) -> Self {
        Self {
            spawn: SpawnRequest {
                command: preset.command.clone(),
                args: preset.args.clone(),
                cwd: Some(cwd.to_owned()),
                ..SpawnRequest::default()
            },
            session: SessionRequest {
                cwd: cwd.to_owned(),
                resume: None,
            },
            prompt: prompt.trim().to_owned(),
            config: Vec::new(),
            timeout,
        }
    }
}

/// Outcome of a prompt run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OneShotReply {
    /// Assistant reply text (partial when timed out).
    pub response: String,
    /// Set when the deadline elapsed before the turn finished.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
    /// Session the prompt ran in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Agent-reported stop reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

/// Run `request` to completion, timeout, or failure.
///
/// The agent is always destroyed before returning.
///
/// # Errors
///
/// Returns [`AppError::Transport`] / [`AppError::Container`] when the agent
/// cannot be started or its output stream fails, and [`AppError::Acp`] when
/// the agent rejects a request.
pub async fn run_prompt(
    factory: &dyn TransportFactory,
    request: OneShotRequest,
) -> Result<OneShotReply> {
    if request.prompt.is_empty() {
        return Err(AppError::Acp("prompt is required".into()));
    }

    let (events_tx, mut events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let transport = factory.create(&request.spawn, EventSink::new(1, events_tx))?;
    info!(
        command = %request.spawn.command,
        transport_id = transport.id(),
        timeout_seconds = request.timeout.as_secs(),
        "running one-shot prompt"
    );

    let mut run = PromptRun {
        transport,
        state: ProtocolState::new(),
        negotiator: Negotiator::new(),
        prompt: request.prompt,
        config: request.config,
        reply: OneShotReply::default(),
    };

    let outcome = tokio::time::timeout(
        request.timeout,
        run.drive(request.session, &mut events_rx),
    )
    .await;

    let result = match outcome {
        Ok(Ok(response)) => Ok(OneShotReply {
            response,
            ..run.reply.clone()
        }),
        Ok(Err(err)) => Err(err),
        Err(_elapsed) => {
            warn!(timeout_seconds = request.timeout.as_secs(), "one-shot prompt timed out");
            Ok(OneShotReply {
                response: run.current_text(),
                timed_out: true,
                ..run.reply.clone()
            })
        }
    };

    run.transport.destroy();
    run.state.reset();
    result
}

struct PromptRun {
    transport: Box<dyn ProcessTransport>,
    state: ProtocolState,
    negotiator: Negotiator,
    prompt: String,
    config: Vec<(String, String)>,
    reply: OneShotReply,
}

impl PromptRun {
    fn current_text(&self) -> String {
        self.state
            .current_message()
            .map(|message| message.content.clone())
            .unwrap_or_default()
    }

    async fn drive(
        &mut self,
        session: SessionRequest,
        events: &mut mpsc::Receiver<TaggedEvent>,
    ) -> Result<String> {
        for effect in self.negotiator.start(session) {
            if let Some(done) = self.apply(effect)? {
                return Ok(done);
            }
        }

        while let Some(TaggedEvent { event, .. }) = events.recv().await {
            match event {
                TransportEvent::Stdout(chunk) | TransportEvent::Stderr(chunk) => {
                    for event in self.state.process(&chunk) {
                        if let Some(done) = self.handle(event)? {
                            return Ok(done);
                        }
                    }
                }
                TransportEvent::Error(message) => return Err(AppError::Transport(message)),
                TransportEvent::Closed { code, signal } => {
                    debug!(?code, ?signal, "agent exited before the turn completed");
                    let text = self.current_text();
                    self.negotiator.handle_exit();
                    let last = self.state.finalize().map(|message| message.content);
                    return Ok(last.unwrap_or(text));
                }
            }
        }
        Err(AppError::Transport("agent event stream closed".into()))
    }

    fn handle(&mut self, event: ProtocolEvent) -> Result<Option<String>> {
        match event {
            ProtocolEvent::Response(response) => {
                for effect in self.negotiator.handle_response(&response) {
                    if let Some(done) = self.apply(effect)? {
                        return Ok(Some(done));
                    }
                }
            }
            ProtocolEvent::PermissionRequested { request_id, ask } => {
                if let Some(option) = ask.auto_approve_choice() {
                    debug!(permission_id = %ask.id, option_id = %option.value, "auto-approving permission");
                    self.state.respond_to_permission(&ask.id, &option.value);
                    self.transport
                        .write(&permission_response_line(&request_id, &option.value));
                }
            }
            ProtocolEvent::ConfigOptions(options) => self.negotiator.apply_config_update(options),
        }
        Ok(None)
    }

    /// Carry out one effect; `Some(reply)` once the turn is over.
    fn apply(&mut self, effect: Effect) -> Result<Option<String>> {
        match effect {
            Effect::Send(request) => self.transport.write(&request.to_line()),
            Effect::SessionReady { session_id, resumed } => {
                info!(%session_id, resumed, "one-shot session ready");
                self.reply.session_id = Some(session_id);
                for (config_id, value) in std::mem::take(&mut self.config) {
                    if let Some(request) = self.negotiator.set_config_option(&config_id, &value) {
                        self.transport.write(&request.to_line());
                    }
                }
                if let Some(request) = self.negotiator.send_prompt(&self.prompt) {
                    self.transport.write(&request.to_line());
                }
            }
            Effect::LoadFailed {
                session_id,
                message,
            } => {
                warn!(%session_id, %message, "resume failed");
                if self.negotiator.phase() != &NegotiationPhase::Creating {
                    return Err(AppError::Acp(format!(
                        "could not resume session {session_id}: {message}"
                    )));
                }
            }
            Effect::TurnCompleted { stop_reason } => {
                self.reply.stop_reason = stop_reason;
                let text = self.current_text();
                self.state.finalize();
                return Ok(Some(text));
            }
            Effect::SessionError { code, message } => {
                return Err(AppError::Acp(format!("agent error {code}: {message}")));
            }
            Effect::TitleChanged { .. } | Effect::ConfigChanged(_) => {}
        }
        Ok(None)
    }
}
