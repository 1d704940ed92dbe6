#![forbid(unsafe_code)]

pub mod acp;
pub mod bridge;
pub mod config;
pub mod errors;
pub mod models;
pub mod server;
pub mod transport;

pub use config::BridgeConfig;
pub use errors::{AppError, Result};
