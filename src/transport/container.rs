//! Agent processes run inside throwaway containers.
//!
//! The container runtime CLI (`docker` or `podman`) is launched in attached
//! interactive mode, so its stdio is the container's stdio and its exit code
//! is the container's. Signals and removal are issued as separate CLI calls
//! against the generated container name.

use std::process::Stdio;
use std::sync::Arc;

use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::child::ChildIo;
use super::{EventSink, ProcessTransport, SpawnRequest, TransportFactory, DEFAULT_SIGNAL};
use crate::config::ContainerConfig;
use crate::{AppError, Result};

/// Prefix of generated container names.
pub const CONTAINER_NAME_PREFIX: &str = "acp-bridge";

/// Validate an image reference before passing it to the runtime CLI.
///
/// # Errors
///
/// Returns [`AppError::Container`] for empty references, references longer
/// than 256 bytes, or references with whitespace or a leading `-`.
pub fn validate_image_name(image: &str) -> Result<()> {
    if image.is_empty() {
        return Err(AppError::Container("image is required".into()));
    }
    if image.len() > 256 {
        return Err(AppError::Container("image name exceeds maximum length".into()));
    }
    if image.starts_with('-') || image.chars().any(char::is_whitespace) {
        return Err(AppError::Container(format!(
            "image name '{image}' contains invalid characters"
        )));
    }
    Ok(())
}

/// Validate an environment variable name for `-e KEY=VALUE`.
///
/// # Errors
///
/// Returns [`AppError::Container`] unless the key is non-empty and made of
/// ASCII alphanumerics and `_`, not starting with a digit.
pub fn validate_env_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && !key.starts_with(|c: char| c.is_ascii_digit())
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(AppError::Container(format!(
            "invalid environment variable name '{key}'"
        )))
    }
}

// ── Runtime ──────────────────────────────────────────────────────────────────

/// Thin wrapper over the container runtime CLI.
#[derive(Debug, Clone)]
pub struct ContainerRuntime {
    binary: String,
    workdir: String,
}

impl ContainerRuntime {
    /// Create a runtime calling `binary`, mounting the host cwd at `workdir`.
    #[must_use]
    pub fn new(binary: impl Into<String>, workdir: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            workdir: workdir.into(),
        }
    }

    /// Create a runtime from the `[container]` configuration section.
    #[must_use]
    pub fn from_config(config: &ContainerConfig) -> Self {
        let binary = config
            .binary
            .clone()
            .unwrap_or_else(|| config.runtime.default_binary().to_owned());
        Self::new(binary, config.workdir.clone())
    }

    /// CLI binary in use.
    #[must_use]
    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Check that the runtime CLI is installed and its daemon reachable.
    ///
    /// Returns the version output.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Container`] when the CLI cannot be executed or
    /// exits unsuccessfully.
    pub async fn health_check(&self) -> Result<String> {
        let output = Command::new(&self.binary)
            .arg("version")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|err| {
                AppError::Container(format!("runtime {} not available: {err}", self.binary))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Container(format!(
                "runtime {} is not healthy: {}",
                self.binary,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_owned())
    }

    /// Arguments for `run`, excluding the binary itself.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Container`] when the request has no valid image or
    /// carries an invalid environment variable name.
    pub fn run_args(&self, name: &str, request: &SpawnRequest) -> Result<Vec<String>> {
        let image = request.image.as_deref().unwrap_or_default();
        validate_image_name(image)?;

        let mut args: Vec<String> = vec![
            "run".into(),
            "-i".into(),
            "--rm".into(),
            "--name".into(),
            name.to_owned(),
            "-w".into(),
            self.workdir.clone(),
        ];
        if let Some(cwd) = request.cwd.as_deref().filter(|cwd| !cwd.is_empty()) {
            args.push("-v".into());
            args.push(format!("{cwd}:{}", self.workdir));
        }
        for (key, value) in &request.env {
            validate_env_key(key)?;
            args.push("-e".into());
            args.push(format!("{key}={value}"));
        }
        args.push(image.to_owned());
        args.push(request.command.clone());
        args.extend(request.args.iter().cloned());
        Ok(args)
    }

    /// Fire-and-forget `kill --signal <signal> <name>`.
    pub fn signal_container(&self, name: &str, signal: &str) {
        let args = vec![
            "kill".to_owned(),
            "--signal".to_owned(),
            signal.to_owned(),
            name.to_owned(),
        ];
        self.spawn_detached(args);
    }

    /// Fire-and-forget `rm -f <name>`.
    pub fn remove_container(&self, name: &str) {
        self.spawn_detached(vec!["rm".to_owned(), "-f".to_owned(), name.to_owned()]);
    }

    fn spawn_detached(&self, args: Vec<String>) {
        let binary = self.binary.clone();
        tokio::spawn(async move {
            let result = Command::new(&binary)
                .args(&args)
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .output()
                .await;
            match result {
                Ok(output) if output.status.success() => {
                    debug!(%binary, ?args, "container command succeeded");
                }
                Ok(output) => {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    debug!(%binary, ?args, stderr = %stderr.trim(), "container command failed");
                }
                Err(err) => warn!(%binary, ?args, %err, "failed to run container command"),
            }
        });
    }
}

// ── Transport ────────────────────────────────────────────────────────────────

/// An agent running in a named container.
#[derive(Debug)]
pub struct ContainerTransport {
    name: String,
    runtime: Arc<ContainerRuntime>,
    io: ChildIo,
}

impl ProcessTransport for ContainerTransport {
    fn id(&self) -> &str {
        &self.name
    }

    fn pid(&self) -> Option<u32> {
        None
    }

    fn write(&self, data: &str) {
        self.io.write(data);
    }

    fn kill(&self, signal: Option<&str>) -> bool {
        if self.io.is_destroyed() {
            return false;
        }
        self.runtime
            .signal_container(&self.name, signal.unwrap_or(DEFAULT_SIGNAL));
        true
    }

    fn destroy(&self) {
        if self.io.is_destroyed() {
            return;
        }
        self.io.destroy();
        self.runtime.remove_container(&self.name);
    }
}

/// Spawns [`ContainerTransport`]s.
#[derive(Debug, Clone)]
pub struct ContainerTransportFactory {
    runtime: Arc<ContainerRuntime>,
}

impl ContainerTransportFactory {
    /// Create the factory over a health-checked runtime.
    #[must_use]
    pub fn new(runtime: ContainerRuntime) -> Self {
        Self {
            runtime: Arc::new(runtime),
        }
    }
}

impl TransportFactory for ContainerTransportFactory {
    fn name(&self) -> &'static str {
        "container"
    }

    fn create(
        &self,
        request: &SpawnRequest,
        sink: EventSink,
    ) -> Result<Box<dyn ProcessTransport>> {
        let name = format!("{CONTAINER_NAME_PREFIX}-{}", Uuid::new_v4().simple());
        let args = self.runtime.run_args(&name, request)?;

        let child = Command::new(self.runtime.binary())
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                AppError::Container(format!(
                    "failed to launch {}: {err}",
                    self.runtime.binary()
                ))
            })?;
        info!(
            container = %name,
            image = request.image.as_deref().unwrap_or_default(),
            command = %request.command,
            generation = sink.generation(),
            "spawned containerized agent"
        );

        let io = ChildIo::attach(child, sink, name.clone())?;
        Ok(Box::new(ContainerTransport {
            name,
            runtime: Arc::clone(&self.runtime),
            io,
        }))
    }
}
