//! Per-connection peer task.
//!
//! A peer owns at most one agent process together with its
//! [`ProtocolState`]. One tokio task serializes everything that touches it:
//! client commands, transport events, the connection going away, and the
//! detachment grace timer.
//!
//! Delivery works off a high-water mark over the message list: every message
//! from the mark onward is re-sent as `acp:message_chunk`, after which the
//! mark moves to the last (still mutable) message. Tool calls and pending
//! permission asks are re-sent as full snapshots whenever they change.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::protocol::{ClientMessage, ServerMessage};
use super::registry::{PeerId, PeerRegistry};
use crate::acp::jsonrpc::{permission_notification_line, permission_response_line, Document};
use crate::acp::parser::StreamParser;
use crate::acp::state::{ProtocolEvent, ProtocolState};
use crate::transport::{
    EventSink, ProcessTransport, SpawnRequest, TaggedEvent, TransportEvent, TransportFactory,
    EVENT_CHANNEL_CAPACITY,
};

/// Method name marking a prompt turn on the agent's stdin.
const PROMPT_METHOD: &str = "session/prompt";

/// Signal used when a detached turn completes.
const GRACEFUL_SIGNAL: &str = "SIGTERM";

/// Tunables for a peer.
#[derive(Debug, Clone, Copy)]
pub struct PeerSettings {
    /// How long a detached peer may keep its turn running.
    pub detach_grace: Duration,
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self {
            detach_grace: Duration::from_secs(300),
        }
    }
}

/// Input to a peer task.
#[derive(Debug)]
pub enum PeerCommand {
    /// A decoded client frame.
    Client(ClientMessage),
    /// The connection closed or failed.
    Disconnect {
        /// Why, for logs.
        reason: String,
    },
}

/// Owner side of a running peer task.
#[derive(Debug)]
pub struct PeerHandle {
    id: PeerId,
    commands: mpsc::UnboundedSender<PeerCommand>,
    task: JoinHandle<()>,
}

impl PeerHandle {
    /// Register and start a peer whose frames go to `outbound`.
    pub async fn spawn(
        id: PeerId,
        factory: Arc<dyn TransportFactory>,
        outbound: mpsc::UnboundedSender<ServerMessage>,
        settings: PeerSettings,
        registry: PeerRegistry,
    ) -> Self {
        let cancel = CancellationToken::new();
        registry.register(&id, cancel.clone()).await;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let peer = Peer {
            id: id.clone(),
            factory,
            outbound: Outbound(Some(outbound)),
            events_tx,
            generation: 0,
            process: None,
            detached_until: None,
            settings,
            registry,
        };
        let task = tokio::spawn(peer.run(commands_rx, events_rx, cancel));

        Self {
            id,
            commands: commands_tx,
            task,
        }
    }

    /// Peer identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Forward a client frame; `false` once the peer task has ended.
    pub fn send(&self, message: ClientMessage) -> bool {
        self.commands.send(PeerCommand::Client(message)).is_ok()
    }

    /// Report that the connection is gone.
    pub fn disconnect(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.commands.send(PeerCommand::Disconnect { reason }).is_err() {
            debug!(peer_id = %self.id, "peer already stopped");
        }
    }

    /// Wait for the peer task to finish.
    pub async fn join(self) {
        drop(self.commands);
        if let Err(err) = self.task.await {
            warn!(peer_id = %self.id, %err, "peer task ended abnormally");
        }
    }
}

// ── Peer task ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Sender that goes quiet once the connection is gone.
#[derive(Debug)]
struct Outbound(Option<mpsc::UnboundedSender<ServerMessage>>);

impl Outbound {
    fn send(&self, message: ServerMessage) {
        if let Some(tx) = &self.0 {
            if tx.send(message).is_err() {
                debug!("outbound channel closed");
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.0.is_some()
    }

    fn close(&mut self) {
        self.0 = None;
    }
}

/// Prompt requests written to the agent that have not been answered yet.
#[derive(Debug, Default)]
struct TurnTracker {
    scanner: StreamParser,
    outstanding: Vec<Value>,
}

impl TurnTracker {
    fn observe(&mut self, stdin: &str) {
        for document in self.scanner.feed(stdin.as_bytes()) {
            if let Document::Request(request) = document {
                if request.method == PROMPT_METHOD {
                    self.outstanding.push(request.id);
                }
            }
        }
    }

    fn complete(&mut self, id: &Value) -> bool {
        match self.outstanding.iter().position(|pending| pending == id) {
            Some(index) => {
                self.outstanding.remove(index);
                true
            }
            None => false,
        }
    }

    fn is_active(&self) -> bool {
        !self.outstanding.is_empty()
    }
}

/// The agent process a peer currently owns.
#[derive(Debug)]
struct ActiveProcess {
    transport: Box<dyn ProcessTransport>,
    state: ProtocolState,
    delivered: usize,
    tool_call_revision: u64,
    permission_revision: u64,
    turns: TurnTracker,
    permission_requests: HashMap<String, Value>,
}

impl ActiveProcess {
    fn new(transport: Box<dyn ProcessTransport>) -> Self {
        Self {
            transport,
            state: ProtocolState::new(),
            delivered: 0,
            tool_call_revision: 0,
            permission_revision: 0,
            turns: TurnTracker::default(),
            permission_requests: HashMap::new(),
        }
    }

    /// Push everything that changed since the last delivery.
    fn deliver(&mut self, outbound: &Outbound) {
        for message in self.state.messages().skip(self.delivered) {
            outbound.send(ServerMessage::MessageChunk {
                message: message.clone(),
            });
        }
        let count = self.state.message_count();
        self.delivered = if count > 1 { count - 1 } else { 0 };

        if self.state.tool_call_revision() != self.tool_call_revision {
            self.tool_call_revision = self.state.tool_call_revision();
            for call in self.state.tool_calls() {
                outbound.send(ServerMessage::ToolCall {
                    tool_call: call.clone(),
                });
            }
        }

        if self.state.permission_revision() != self.permission_revision {
            self.permission_revision = self.state.permission_revision();
            for ask in self.state.permission_asks() {
                outbound.send(ServerMessage::PermissionRequest {
                    permission_ask: ask.clone(),
                });
            }
        }
    }

    /// Finalize the turn and report its last message.
    ///
    /// Permission requests the agent left unanswered are withdrawn; the
    /// agent no longer waits on them once its prompt has returned.
    fn finish_turn(&mut self, outbound: &Outbound) {
        for (permission_id, _) in self.permission_requests.drain() {
            debug!(%permission_id, "withdrawing unanswered permission request");
            self.state.withdraw_permission(&permission_id);
        }
        let message = self.state.finalize();
        self.delivered = 0;
        outbound.send(ServerMessage::Finalized { message });
    }

    /// Record an answer and relay it to the agent; `false` for unknown asks.
    fn answer(&mut self, permission_id: &str, option_id: &str) -> bool {
        let answered = self.state.respond_to_permission(permission_id, option_id);
        if let Some(request_id) = self.permission_requests.remove(permission_id) {
            self.transport
                .write(&permission_response_line(&request_id, option_id));
            true
        } else if answered.is_some() {
            self.transport
                .write(&permission_notification_line(permission_id, option_id));
            true
        } else {
            false
        }
    }

    /// Answer every pending ask with its auto-approve choice.
    fn auto_approve_pending(&mut self, peer_id: &str) {
        let choices: Vec<(String, String)> = self
            .state
            .permission_asks()
            .iter()
            .filter_map(|ask| {
                ask.auto_approve_choice()
                    .map(|option| (ask.id.clone(), option.value.clone()))
            })
            .collect();
        for (permission_id, option_id) in choices {
            info!(%peer_id, %permission_id, %option_id, "auto-approving permission while detached");
            self.answer(&permission_id, &option_id);
        }
    }
}

struct Peer {
    id: PeerId,
    factory: Arc<dyn TransportFactory>,
    outbound: Outbound,
    events_tx: mpsc::Sender<TaggedEvent>,
    generation: u64,
    process: Option<ActiveProcess>,
    detached_until: Option<Instant>,
    settings: PeerSettings,
    registry: PeerRegistry,
}

impl Peer {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<PeerCommand>,
        mut events: mpsc::Receiver<TaggedEvent>,
        cancel: CancellationToken,
    ) {
        info!(peer_id = %self.id, transport = self.factory.name(), "peer connected");

        loop {
            let deadline = self.detached_until;
            let grace_expired = async move {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            let flow = tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    info!(peer_id = %self.id, "peer shutting down");
                    self.destroy_process();
                    Flow::Stop
                }

                () = grace_expired => {
                    warn!(peer_id = %self.id, "detach grace expired, destroying agent");
                    self.destroy_process();
                    Flow::Stop
                }

                Some(event) = events.recv() => self.handle_event(event),

                command = commands.recv(), if self.outbound.is_connected() => match command {
                    Some(PeerCommand::Client(message)) => self.handle_client(message),
                    Some(PeerCommand::Disconnect { reason }) => self.handle_disconnect(&reason).await,
                    None => self.handle_disconnect("handle dropped").await,
                },
            };

            if flow == Flow::Stop {
                break;
            }
        }

        self.registry.remove(&self.id).await;
        info!(peer_id = %self.id, "peer closed");
    }

    // ── Client commands ──────────────────────────────────────────────────────

    fn handle_client(&mut self, message: ClientMessage) -> Flow {
        match message {
            ClientMessage::Spawn(request) => self.spawn(&request),
            ClientMessage::Stdin { data } => match self.process.as_mut() {
                Some(process) => {
                    process.turns.observe(&data);
                    process.transport.write(&data);
                }
                None => debug!(peer_id = %self.id, "stdin without a process, dropping"),
            },
            ClientMessage::Kill { signal } => {
                let killed = self
                    .process
                    .as_ref()
                    .is_some_and(|process| process.transport.kill(signal.as_deref()));
                if !killed {
                    self.outbound.send(ServerMessage::error("No process running"));
                }
            }
            ClientMessage::PermissionResponse {
                permission_id,
                option_id,
            } => match self.process.as_mut() {
                Some(process) => {
                    if !process.answer(&permission_id, &option_id) {
                        debug!(peer_id = %self.id, %permission_id, "answer for unknown permission ask");
                    }
                    process.deliver(&self.outbound);
                }
                None => self.outbound.send(ServerMessage::error("No process running")),
            },
        }
        Flow::Continue
    }

    fn spawn(&mut self, request: &SpawnRequest) {
        if let Some(previous) = self.process.take() {
            debug!(peer_id = %self.id, transport_id = previous.transport.id(), "replacing agent");
            previous.transport.destroy();
        }
        self.generation += 1;

        let sink = EventSink::new(self.generation, self.events_tx.clone());
        match self.factory.create(request, sink) {
            Ok(transport) => {
                let pid = transport.pid();
                info!(
                    peer_id = %self.id,
                    generation = self.generation,
                    transport_id = transport.id(),
                    command = %request.command,
                    "agent spawned"
                );
                self.process = Some(ActiveProcess::new(transport));
                self.outbound.send(ServerMessage::Spawned { pid });
            }
            Err(err) => {
                warn!(peer_id = %self.id, %err, "agent spawn failed");
                self.outbound.send(ServerMessage::error(err.to_string()));
            }
        }
    }

    // ── Transport events ─────────────────────────────────────────────────────

    fn handle_event(&mut self, tagged: TaggedEvent) -> Flow {
        if tagged.generation != self.generation || self.process.is_none() {
            debug!(
                peer_id = %self.id,
                generation = tagged.generation,
                current = self.generation,
                "discarding stale transport event"
            );
            return Flow::Continue;
        }

        match tagged.event {
            TransportEvent::Stdout(chunk) | TransportEvent::Stderr(chunk) => self.ingest(&chunk),
            TransportEvent::Error(message) => {
                self.outbound.send(ServerMessage::error(message));
                Flow::Continue
            }
            TransportEvent::Closed { code, signal } => self.handle_exit(code, signal),
        }
    }

    fn ingest(&mut self, chunk: &[u8]) -> Flow {
        let detached = self.detached_until.is_some();
        let Some(process) = self.process.as_mut() else {
            return Flow::Continue;
        };

        let mut turn_ended = false;
        for event in process.state.process(chunk) {
            match event {
                ProtocolEvent::Response(response) => {
                    process.deliver(&self.outbound);
                    let completes_turn = process.turns.complete(&response.id);
                    self.outbound.send(ServerMessage::Response {
                        id: response.id,
                        result: response.result,
                        error: response.error,
                    });
                    if completes_turn {
                        process.finish_turn(&self.outbound);
                        turn_ended = true;
                    }
                }
                ProtocolEvent::PermissionRequested { request_id, ask } => {
                    debug!(peer_id = %self.id, permission_id = %ask.id, "permission requested");
                    process.permission_requests.insert(ask.id, request_id);
                    if detached {
                        process.auto_approve_pending(&self.id);
                    }
                }
                ProtocolEvent::ConfigOptions(options) => {
                    self.outbound.send(ServerMessage::ConfigUpdate { options });
                }
            }
        }
        process.deliver(&self.outbound);

        if detached && turn_ended && !process.turns.is_active() {
            info!(peer_id = %self.id, "detached turn completed, stopping agent");
            self.release_process();
            return Flow::Stop;
        }
        Flow::Continue
    }

    fn handle_exit(&mut self, code: Option<i32>, signal: Option<String>) -> Flow {
        if let Some(mut process) = self.process.take() {
            info!(peer_id = %self.id, ?code, ?signal, "agent exited");
            process.deliver(&self.outbound);
            process.finish_turn(&self.outbound);
            self.outbound.send(ServerMessage::Exit { code, signal });
        }
        if self.detached_until.is_some() {
            Flow::Stop
        } else {
            Flow::Continue
        }
    }

    // ── Disconnect & teardown ────────────────────────────────────────────────

    async fn handle_disconnect(&mut self, reason: &str) -> Flow {
        self.outbound.close();

        let turn_active = self
            .process
            .as_ref()
            .is_some_and(|process| process.turns.is_active());
        if !turn_active {
            info!(peer_id = %self.id, reason, "connection closed, cleaning up");
            self.destroy_process();
            return Flow::Stop;
        }

        let grace = self.settings.detach_grace;
        self.detached_until = Some(Instant::now() + grace);
        self.registry.mark_detached(&self.id).await;
        info!(
            peer_id = %self.id,
            reason,
            grace_seconds = grace.as_secs(),
            "connection closed mid-turn, detaching"
        );
        if let Some(process) = self.process.as_mut() {
            process.auto_approve_pending(&self.id);
        }
        Flow::Continue
    }

    /// Ask the agent to stop and drop its state.
    fn release_process(&mut self) {
        if let Some(mut process) = self.process.take() {
            if !process.transport.kill(Some(GRACEFUL_SIGNAL)) {
                debug!(peer_id = %self.id, "agent already gone");
            }
            process.state.reset();
        }
        self.detached_until = None;
    }

    /// Force-terminate the agent and drop its state.
    fn destroy_process(&mut self) {
        if let Some(mut process) = self.process.take() {
            process.transport.destroy();
            process.state.reset();
        }
        self.detached_until = None;
    }
}
