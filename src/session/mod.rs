//! # Connection Sessions
//!
//! State shared by every streaming connection: the live-connection registry and the
//! per-chunk audio pipeline. The actor that drives a single connection lives in
//! [`crate::websocket`].

pub mod pipeline;   // detect -> transcode -> transcribe for one chunk
pub mod registry;   // live connections, read by /health

use serde::Serialize;
use std::fmt;

pub use pipeline::{reply_frame, AudioPipeline, ChunkError};
pub use registry::{ConnectionId, ConnectionInfo, ConnectionRegistry, RegistryLease};

/// Prefix of every outbound frame that reports a failure instead of a transcript.
pub const ERROR_MARKER: &str = "[ERROR]";

/// Lifecycle of one connection.
///
/// `Connecting -> Open -> Closing -> Closed`, or `Open -> Closed` directly when frame
/// handling fails internally. A connection is in the registry exactly while `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        write!(f, "{}", label)
    }
}
