//! Client side of CRI streaming: exec, attach and port-forward.
//!
//! The runtime hands out a URL from a unary call; everything after that
//! runs over a WebSocket speaking the Kubernetes channel protocol.
pub mod portforward;
pub mod protocol;
pub mod stdio;
pub mod terminal;

pub use portforward::{forward, parse_mappings, PortMapping};
pub use stdio::{run_session, StreamOptions};
