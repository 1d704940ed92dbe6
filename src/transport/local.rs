//! Agent processes spawned directly on the host.

use std::process::Stdio;

use tokio::process::Command;
use tracing::info;

use super::child::ChildIo;
use super::{EventSink, ProcessTransport, SpawnRequest, TransportFactory};
use crate::{AppError, Result};

/// A host child process.
#[derive(Debug)]
pub struct LocalTransport {
    id: String,
    io: ChildIo,
}

impl ProcessTransport for LocalTransport {
    fn id(&self) -> &str {
        &self.id
    }

    fn pid(&self) -> Option<u32> {
        self.io.pid()
    }

    fn write(&self, data: &str) {
        self.io.write(data);
    }

    fn kill(&self, signal: Option<&str>) -> bool {
        self.io.signal(signal)
    }

    fn destroy(&self) {
        self.io.destroy();
    }
}

/// Spawns [`LocalTransport`]s.
///
/// The child inherits the server's environment with the request's variables
/// layered on top, since agents rely on credentials configured there.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTransportFactory;

impl LocalTransportFactory {
    /// Create the factory.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl TransportFactory for LocalTransportFactory {
    fn name(&self) -> &'static str {
        "local"
    }

    fn create(
        &self,
        request: &SpawnRequest,
        sink: EventSink,
    ) -> Result<Box<dyn ProcessTransport>> {
        let mut cmd = Command::new(&request.command);
        cmd.args(&request.args)
            .envs(&request.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = request.cwd.as_deref().filter(|cwd| !cwd.is_empty()) {
            cmd.current_dir(cwd);
        }

        let child = cmd.spawn().map_err(|err| {
            AppError::Transport(format!("failed to spawn {}: {err}", request.command))
        })?;
        let pid = child.id();
        let id = pid.map_or_else(|| "pid-unknown".to_owned(), |pid| format!("pid-{pid}"));
        info!(
            command = %request.command,
            ?pid,
            generation = sink.generation(),
            "spawned local agent"
        );

        let io = ChildIo::attach(child, sink, id.clone())?;
        Ok(Box::new(LocalTransport { id, io }))
    }
}
