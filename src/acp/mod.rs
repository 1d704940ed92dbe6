//! Agent Client Protocol (ACP) handling.
//!
//! Everything here is free of I/O: bytes from the agent go in, typed events
//! and outbound JSON-RPC lines come out.
//!
//! - `codec`: bounded line framing that yields classified documents.
//! - `parser`: turns raw output chunks into classified JSON-RPC documents.
//! - `jsonrpc`: wire types and line builders.
//! - `state`: conversation model built from session updates.
//! - `negotiation`: initialize / create / resume handshake and request
//!   correlation.

pub mod codec;
pub mod jsonrpc;
pub mod negotiation;
pub mod parser;
pub mod state;
