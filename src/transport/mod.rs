//! Agent process transports.
//!
//! A [`ProcessTransport`] supervises one agent process and exposes a uniform
//! write/signal/terminate surface regardless of where the process runs.
//! Output and lifecycle events flow back through an [`EventSink`] tagged with
//! the spawn generation that produced them, so a consumer can discard events
//! from a transport it has already replaced.
//!
//! Two implementations exist:
//! - [`local::LocalTransportFactory`]: a direct child process.
//! - [`container::ContainerTransportFactory`]: the agent runs inside a
//!   throwaway container driven by the `docker` / `podman` CLI.

mod child;
pub mod container;
pub mod local;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::info;

use crate::config::{BridgeConfig, TransportKind};
use crate::Result;

pub use container::{ContainerRuntime, ContainerTransportFactory};
pub use local::LocalTransportFactory;

/// Capacity of the per-peer transport event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Signal sent by [`ProcessTransport::kill`] when none is named.
pub const DEFAULT_SIGNAL: &str = "SIGTERM";

// ── Events ───────────────────────────────────────────────────────────────────

/// Something that happened to a supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Bytes read from the process's stdout.
    Stdout(Bytes),
    /// Bytes read from the process's stderr.
    Stderr(Bytes),
    /// A non-fatal transport failure.
    Error(String),
    /// The process exited and its output streams are drained.
    Closed {
        /// Exit code, when the process exited normally.
        code: Option<i32>,
        /// Terminating signal name, when killed by a signal.
        signal: Option<String>,
    },
}

/// A [`TransportEvent`] stamped with the generation that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedEvent {
    /// Spawn generation of the emitting transport.
    pub generation: u64,
    /// The event.
    pub event: TransportEvent,
}

/// Sending half handed to a transport at creation.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::Sender<TaggedEvent>,
}

impl EventSink {
    /// Create a sink stamping events with `generation`.
    #[must_use]
    pub fn new(generation: u64, tx: mpsc::Sender<TaggedEvent>) -> Self {
        Self { generation, tx }
    }

    /// Generation this sink stamps.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Deliver an event; `false` once the receiver is gone.
    pub async fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(TaggedEvent {
                generation: self.generation,
                event,
            })
            .await
            .is_ok()
    }
}

// ── Spawn request ────────────────────────────────────────────────────────────

/// What to launch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SpawnRequest {
    /// Program to run.
    pub command: String,
    /// Arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory on the host.
    #[serde(default)]
    pub cwd: Option<String>,
    /// Extra environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Container image; required by the container transport.
    #[serde(default)]
    pub image: Option<String>,
}

// ── Traits ───────────────────────────────────────────────────────────────────

/// Handle to one supervised agent process.
///
/// All methods are synchronous; work that needs I/O is queued onto the
/// transport's own tasks.
pub trait ProcessTransport: Send + Sync + fmt::Debug {
    /// Opaque identifier (container name, or `pid-<n>` for local processes).
    fn id(&self) -> &str;

    /// OS process id, when the transport has one.
    fn pid(&self) -> Option<u32>;

    /// Queue `data` for the process's stdin; silently dropped once the
    /// process is no longer writable.
    fn write(&self, data: &str);

    /// Send a signal (default [`DEFAULT_SIGNAL`]); `false` if it could not be
    /// delivered.
    fn kill(&self, signal: Option<&str>) -> bool;

    /// Forcefully terminate the process and release every resource.
    /// Idempotent; no [`TransportEvent::Closed`] follows.
    fn destroy(&self);
}

/// Creates transports of one kind.
pub trait TransportFactory: Send + Sync {
    /// Short name for logs (`local`, `container`).
    fn name(&self) -> &'static str;

    /// Launch a process described by `request`, reporting through `sink`.
    ///
    /// # Errors
    ///
    /// Returns an error when the process cannot be started; no events are
    /// emitted in that case.
    fn create(&self, request: &SpawnRequest, sink: EventSink)
        -> Result<Box<dyn ProcessTransport>>;
}

/// Build the factory selected by `config`.
///
/// The container runtime is health-checked first so a missing CLI fails at
/// startup rather than on the first spawn.
///
/// # Errors
///
/// Returns [`crate::AppError::Container`] when the container runtime is
/// unavailable.
pub async fn build_factory(config: &BridgeConfig) -> Result<Arc<dyn TransportFactory>> {
    match config.transport {
        TransportKind::Local => Ok(Arc::new(LocalTransportFactory::new())),
        TransportKind::Container => {
            let runtime = ContainerRuntime::from_config(&config.container);
            let version = runtime.health_check().await?;
            info!(binary = runtime.binary(), version = %version, "container runtime available");
            Ok(Arc::new(ContainerTransportFactory::new(runtime)))
        }
    }
}
