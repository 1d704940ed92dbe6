//! Stdio plumbing shared by transports that own a `tokio::process::Child`.
//!
//! Three kinds of task run per child:
//! - a writer draining queued stdin text,
//! - one pump per output stream forwarding raw chunks to the sink,
//! - a supervisor awaiting exit, which reports [`TransportEvent::Closed`]
//!   only after both pumps have drained.
//!
//! Cancelling the shared token (see [`ChildIo::destroy`]) stops every task and
//! kills the child without reporting an exit. Dropping the handle instead
//! closes stdin and lets the child exit on its own, killing it only if it is
//! still running after [`ORPHAN_GRACE`].

use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::process::{Child, ChildStdin};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::{BytesCodec, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{EventSink, TransportEvent, DEFAULT_SIGNAL};
use crate::{AppError, Result};

/// How long the supervisor waits for output pumps after the child exits.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a child may outlive its dropped handle before it is killed.
const ORPHAN_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn name(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }

    fn event(self, chunk: bytes::Bytes) -> TransportEvent {
        match self {
            Self::Stdout => TransportEvent::Stdout(chunk),
            Self::Stderr => TransportEvent::Stderr(chunk),
        }
    }
}

/// Handles to the tasks serving one child process.
#[derive(Debug)]
pub(crate) struct ChildIo {
    label: String,
    pid: Option<u32>,
    stdin: mpsc::UnboundedSender<String>,
    kill_tx: mpsc::UnboundedSender<()>,
    cancel: CancellationToken,
}

impl ChildIo {
    /// Take the child's stdio and start its writer, pumps and supervisor.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] if a stdio handle was not piped.
    pub(crate) fn attach(mut child: Child, sink: EventSink, label: String) -> Result<Self> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Transport("failed to capture agent stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Transport("failed to capture agent stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Transport("failed to capture agent stderr".into()))?;

        let pid = child.id();
        let cancel = CancellationToken::new();
        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_writer(label.clone(), stdin, stdin_rx, cancel.clone()));
        let pumps = vec![
            spawn_pump(stdout, Stream::Stdout, sink.clone(), cancel.clone()),
            spawn_pump(stderr, Stream::Stderr, sink.clone(), cancel.clone()),
        ];
        tokio::spawn(supervise(
            label.clone(),
            child,
            pumps,
            sink,
            kill_rx,
            cancel.clone(),
        ));

        Ok(Self {
            label,
            pid,
            stdin: stdin_tx,
            kill_tx,
            cancel,
        })
    }

    pub(crate) fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn write(&self, data: &str) {
        if self.is_destroyed() {
            return;
        }
        if self.stdin.send(data.to_owned()).is_err() {
            debug!(label = %self.label, "stdin closed, dropping write");
        }
    }

    /// Deliver `signal` to the child process itself.
    pub(crate) fn signal(&self, signal: Option<&str>) -> bool {
        if self.is_destroyed() {
            return false;
        }
        let name = signal.unwrap_or(DEFAULT_SIGNAL);
        self.deliver_signal(name)
    }

    #[cfg(unix)]
    fn deliver_signal(&self, name: &str) -> bool {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let Some(signal) = parse_signal(name) else {
            warn!(label = %self.label, signal = name, "unknown signal");
            return false;
        };
        let Some(pid) = self.pid.and_then(|pid| i32::try_from(pid).ok()) else {
            return self.kill_tx.send(()).is_ok();
        };
        match kill(Pid::from_raw(pid), signal) {
            Ok(()) => true,
            Err(err) => {
                warn!(label = %self.label, %err, "failed to signal agent process");
                false
            }
        }
    }

    #[cfg(not(unix))]
    fn deliver_signal(&self, name: &str) -> bool {
        debug!(label = %self.label, signal = name, "signals unsupported, killing");
        self.kill_tx.send(()).is_ok()
    }

    /// Stop every task and kill the child. Idempotent.
    pub(crate) fn destroy(&self) {
        self.cancel.cancel();
    }
}

/// Parse `SIGTERM`, `TERM` or `sigterm` into a signal.
#[cfg(unix)]
#[must_use]
pub(crate) fn parse_signal(name: &str) -> Option<nix::sys::signal::Signal> {
    use std::str::FromStr;

    let upper = name.trim().to_ascii_uppercase();
    let full = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{upper}")
    };
    nix::sys::signal::Signal::from_str(&full).ok()
}

// ── Tasks ────────────────────────────────────────────────────────────────────

async fn run_writer(
    label: String,
    mut stdin: ChildStdin,
    mut rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(%label, "writer: cancellation received, stopping");
                break;
            }

            data = rx.recv() => {
                let Some(data) = data else {
                    debug!(%label, "writer: channel closed, stopping");
                    break;
                };
                if let Err(err) = stdin.write_all(data.as_bytes()).await {
                    warn!(%label, %err, "writer: write to stdin failed");
                    break;
                }
            }
        }
    }
}

fn spawn_pump<R>(
    reader: R,
    stream: Stream,
    sink: EventSink,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut frames = FramedRead::new(reader, BytesCodec::new());
        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => break,

                frame = frames.next() => match frame {
                    Some(Ok(chunk)) => {
                        if !sink.emit(stream.event(chunk.freeze())).await {
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        let message = format!("{} read failed: {err}", stream.name());
                        sink.emit(TransportEvent::Error(message)).await;
                        break;
                    }
                    None => break,
                },
            }
        }
    })
}

async fn supervise(
    label: String,
    mut child: Child,
    pumps: Vec<JoinHandle<()>>,
    sink: EventSink,
    mut kill_rx: mpsc::UnboundedReceiver<()>,
    cancel: CancellationToken,
) {
    let mut handle_alive = true;
    let mut orphaned_at: Option<Instant> = None;
    let status = loop {
        let deadline = orphaned_at;
        let reap = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                if let Err(err) = child.start_kill() {
                    debug!(%label, %err, "kill after destroy failed");
                }
                for pump in &pumps {
                    pump.abort();
                }
                debug!(%label, "supervisor: destroyed");
                return;
            }

            () = reap => {
                warn!(%label, "agent outlived its handle, killing");
                if let Err(err) = child.start_kill() {
                    debug!(%label, %err, "kill of orphaned agent failed");
                }
                orphaned_at = None;
            }

            request = kill_rx.recv(), if handle_alive => match request {
                Some(()) => {
                    if let Err(err) = child.start_kill() {
                        warn!(%label, %err, "failed to kill agent process");
                    }
                }
                None => {
                    debug!(%label, "handle dropped, waiting for agent to exit");
                    handle_alive = false;
                    orphaned_at = Some(Instant::now() + ORPHAN_GRACE);
                }
            },

            status = child.wait() => break status,
        }
    };

    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        for pump in pumps {
            if let Err(err) = pump.await {
                debug!(%label, %err, "output pump ended abnormally");
            }
        }
    })
    .await;
    if drained.is_err() {
        warn!(%label, "output streams still open after exit, reporting anyway");
    }

    let (code, signal) = match status {
        Ok(status) => (status.code(), exit_signal(status)),
        Err(err) => {
            warn!(%label, %err, "error waiting for agent process");
            sink.emit(TransportEvent::Error(format!("wait failed: {err}")))
                .await;
            (None, None)
        }
    };
    debug!(%label, ?code, ?signal, "agent process exited");
    sink.emit(TransportEvent::Closed { code, signal }).await;
}

#[cfg(unix)]
fn exit_signal(status: std::process::ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;

    status
        .signal()
        .and_then(|raw| nix::sys::signal::Signal::try_from(raw).ok())
        .map(|signal| signal.as_str().to_owned())
}

#[cfg(not(unix))]
fn exit_signal(_status: std::process::ExitStatus) -> Option<String> {
    None
}
