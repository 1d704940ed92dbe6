//! Bridge configuration parsing, validation, and environment overrides.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::{AppError, Result};

/// Environment variable holding the bearer token for `/api/agent`.
pub const API_KEY_ENV: &str = "ACP_BRIDGE_API_KEY";

/// Environment variable overriding [`BridgeConfig::transport`].
pub const TRANSPORT_ENV: &str = "TRANSPORT";

/// Where agent processes run.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Direct child processes.
    #[default]
    Local,
    /// Throwaway containers.
    Container,
}

impl FromStr for TransportKind {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "container" | "docker" | "podman" => Ok(Self::Container),
            other => Err(AppError::Config(format!("unknown transport '{other}'"))),
        }
    }
}

/// Container runtime CLI flavour.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// `docker`.
    #[default]
    Docker,
    /// `podman`.
    Podman,
}

impl RuntimeKind {
    /// Binary invoked when `[container] binary` is unset.
    #[must_use]
    pub fn default_binary(self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }
}

/// `[container]` section.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ContainerConfig {
    /// Runtime flavour.
    #[serde(default)]
    pub runtime: RuntimeKind,
    /// Explicit binary path overriding the runtime's default.
    #[serde(default)]
    pub binary: Option<String>,
    /// Mount point and working directory inside the container.
    #[serde(default = "default_workdir")]
    pub workdir: String,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeKind::default(),
            binary: None,
            workdir: default_workdir(),
        }
    }
}

fn default_workdir() -> String {
    "/workspace".into()
}

/// `[oneshot]` section.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct OneShotConfig {
    /// Timeout when a request names none.
    #[serde(default = "default_timeout_seconds")]
    pub default_timeout_seconds: u64,
    /// Upper bound for requested timeouts.
    #[serde(default = "default_max_timeout_seconds")]
    pub max_timeout_seconds: u64,
    /// Preset used when a request names none.
    #[serde(default = "default_preset_id")]
    pub default_preset: String,
}

impl Default for OneShotConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: default_timeout_seconds(),
            max_timeout_seconds: default_max_timeout_seconds(),
            default_preset: default_preset_id(),
        }
    }
}

fn default_timeout_seconds() -> u64 {
    120
}

fn default_max_timeout_seconds() -> u64 {
    300
}

fn default_preset_id() -> String {
    "claude-code".into()
}

/// A named agent launch recipe (`[[presets]]`).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentPreset {
    /// Identifier used by requests.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Program to launch.
    pub command: String,
    /// Arguments.
    #[serde(default)]
    pub args: Vec<String>,
}

impl AgentPreset {
    fn new(id: &str, name: &str, command: &str, args: &[&str]) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            command: command.into(),
            args: args.iter().map(|arg| (*arg).to_owned()).collect(),
        }
    }
}

fn default_presets() -> Vec<AgentPreset> {
    vec![
        AgentPreset::new("claude-code", "Claude Code", "claude-code-acp", &[]),
        AgentPreset::new("opencode", "OpenCode", "opencode", &["acp"]),
        AgentPreset::new("gemini-cli", "Gemini CLI", "gemini", &["--experimental-acp"]),
        AgentPreset::new("copilot-cli", "Copilot CLI", "copilot", &["--acp"]),
    ]
}

fn default_http_port() -> u16 {
    3000
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_detach_grace_seconds() -> u64 {
    300
}

/// Bridge configuration parsed from `config.toml`.
///
/// Every field has a default, so an empty file is a valid configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BridgeConfig {
    /// HTTP / WebSocket listen port.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Listen address.
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    /// Transport used for spawned agents.
    #[serde(default)]
    pub transport: TransportKind,
    /// Container runtime settings.
    #[serde(default)]
    pub container: ContainerConfig,
    /// How long a detached peer may keep running its turn.
    #[serde(default = "default_detach_grace_seconds")]
    pub detach_grace_seconds: u64,
    /// One-shot prompt runner settings.
    #[serde(default)]
    pub oneshot: OneShotConfig,
    /// Launchable agents.
    #[serde(default = "default_presets")]
    pub presets: Vec<AgentPreset>,
    /// Bearer token for `/api/agent` (populated from the environment).
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            bind_address: default_bind_address(),
            transport: TransportKind::default(),
            container: ContainerConfig::default(),
            detach_grace_seconds: default_detach_grace_seconds(),
            oneshot: OneShotConfig::default(),
            presets: default_presets(),
            api_key: None,
        }
    }
}

impl BridgeConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `TRANSPORT` and load the API key from `ACP_BRIDGE_API_KEY`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `TRANSPORT` names an unknown transport.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(raw) = env::var(TRANSPORT_ENV) {
            if !raw.trim().is_empty() {
                self.transport = raw.parse()?;
            }
        }
        self.api_key = env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty());
        if self.api_key.is_none() {
            warn!("{API_KEY_ENV} not set; /api/agent will reject requests");
        }
        Ok(())
    }

    /// Socket address the server binds.
    #[must_use]
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.http_port)
    }

    /// Detachment grace window.
    #[must_use]
    pub fn detach_grace(&self) -> Duration {
        Duration::from_secs(self.detach_grace_seconds)
    }

    /// Look up a preset by id.
    #[must_use]
    pub fn preset(&self, id: &str) -> Option<&AgentPreset> {
        self.presets.iter().find(|preset| preset.id == id)
    }

    /// Effective one-shot timeout: the requested duration (or the default),
    /// capped at the configured maximum. A zero request means the default.
    #[must_use]
    pub fn oneshot_timeout(&self, requested: Option<Duration>) -> Duration {
        requested
            .filter(|timeout| !timeout.is_zero())
            .unwrap_or(Duration::from_secs(self.oneshot.default_timeout_seconds))
            .min(Duration::from_secs(self.oneshot.max_timeout_seconds))
    }

    fn validate(&self) -> Result<()> {
        if self.detach_grace_seconds == 0 {
            return Err(AppError::Config(
                "detach_grace_seconds must be greater than zero".into(),
            ));
        }

        if self.oneshot.default_timeout_seconds == 0 || self.oneshot.max_timeout_seconds == 0 {
            return Err(AppError::Config(
                "oneshot timeouts must be greater than zero".into(),
            ));
        }

        if self.container.workdir.trim().is_empty() {
            return Err(AppError::Config("container.workdir must not be empty".into()));
        }

        let mut seen = HashSet::new();
        for preset in &self.presets {
            if preset.id.trim().is_empty() || preset.command.trim().is_empty() {
                return Err(AppError::Config(
                    "presets need a non-empty id and command".into(),
                ));
            }
            if !seen.insert(preset.id.as_str()) {
                return Err(AppError::Config(format!(
                    "duplicate preset id '{}'",
                    preset.id
                )));
            }
        }

        Ok(())
    }
}
