#![forbid(unsafe_code)]

//! `acp-bridge`: bridges ACP agents to WebSocket clients.
//!
//! `serve` runs the HTTP / WebSocket server; `prompt` runs a single prompt
//! against a preset agent and prints the reply.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use acp_bridge::acp::negotiation::SessionRequest;
use acp_bridge::bridge::oneshot::{run_prompt, OneShotRequest};
use acp_bridge::server::{self, AppState};
use acp_bridge::transport::build_factory;
use acp_bridge::{AppError, BridgeConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "acp-bridge", about = "ACP agent bridge", version, long_about = None)]
struct Cli {
    /// Log output format (text or json).
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP / WebSocket server.
    Serve {
        /// Path to the TOML configuration file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Send one prompt to a preset agent and print the reply.
    Prompt {
        /// Path to the TOML configuration file.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Preset id; the configured default when omitted.
        #[arg(long)]
        preset: Option<String>,
        /// Working directory for the agent.
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Session id to resume.
        #[arg(long)]
        resume: Option<String>,
        /// Timeout in seconds.
        #[arg(long)]
        timeout: Option<u64>,
        /// Configuration option to apply before prompting, as `id=value`.
        #[arg(long = "set", value_parser = parse_key_value)]
        set: Vec<(String, String)>,
        /// Prompt text.
        text: String,
    },
}

fn parse_key_value(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(key, _)| !key.trim().is_empty())
        .map(|(key, value)| (key.trim().to_owned(), value.to_owned()))
        .ok_or_else(|| format!("expected id=value, got `{raw}`"))
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args.command))
}

async fn run(command: Command) -> Result<()> {
    match command {
        Command::Serve { config } => serve(load_config(config.as_ref())?).await,
        Command::Prompt {
            config,
            preset,
            cwd,
            resume,
            timeout,
            set,
            text,
        } => {
            let config = load_config(config.as_ref())?;
            let preset_id = preset.unwrap_or_else(|| config.oneshot.default_preset.clone());
            let preset = config
                .preset(&preset_id)
                .ok_or_else(|| AppError::NotFound(format!("preset {preset_id}")))?;

            let cwd = match cwd {
                Some(dir) => dir,
                None => std::env::current_dir()?,
            };
            let cwd = cwd.to_string_lossy().into_owned();

            let timeout = config.oneshot_timeout(timeout.map(Duration::from_secs));
            let mut request = OneShotRequest::from_preset(preset, &text, &cwd, timeout);
            request.session = SessionRequest { cwd, resume };
            request.config = set;

            let factory = build_factory(&config).await?;
            let reply = run_prompt(factory.as_ref(), request).await?;
            if let Some(session_id) = &reply.session_id {
                info!(%session_id, timed_out = reply.timed_out, "prompt finished");
            }
            println!("{}", reply.response);
            Ok(())
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<BridgeConfig> {
    let mut config = match path {
        Some(path) => BridgeConfig::load_from_path(path)?,
        None => BridgeConfig::default(),
    };
    config.apply_env()?;
    info!(transport = ?config.transport, "configuration loaded");
    Ok(config)
}

async fn serve(config: BridgeConfig) -> Result<()> {
    let config = Arc::new(config);

    // ── Select transport ────────────────────────────────
    let factory = build_factory(&config).await?;
    let state = Arc::new(AppState::new(Arc::clone(&config), factory));

    // ── Start server ────────────────────────────────────
    let ct = CancellationToken::new();
    let server_ct = ct.clone();
    let server_state = Arc::clone(&state);
    let server_handle = tokio::spawn(async move {
        if let Err(err) = server::serve(server_state, server_ct).await {
            error!(%err, "http server failed");
        }
    });

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();
    state.registry.shutdown_all().await;

    if let Err(err) = server_handle.await {
        error!(%err, "server task ended abnormally");
    }
    info!("acp-bridge shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
