//! Client-facing side of the bridge.
//!
//! Each WebSocket connection becomes a peer: a task that owns one agent
//! process, turns its output into client frames, and survives a dropped
//! connection long enough to finish the turn in flight.

pub mod oneshot;
pub mod peer;
pub mod protocol;
pub mod registry;
pub mod ws;

pub use oneshot::{run_prompt, OneShotReply, OneShotRequest};
pub use peer::{PeerHandle, PeerSettings};
pub use protocol::{ClientMessage, ServerMessage};
pub use registry::{PeerCounts, PeerId, PeerRegistry};
