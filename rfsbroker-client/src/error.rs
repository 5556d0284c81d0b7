//! Client error types.

use rfsbroker_protocol::ChannelError;
use thiserror::Error;

/// Errors surfaced by a [`crate::RemoteHost`] and its streaming adapters.
#[derive(Debug, Error)]
pub enum HostError {
    /// Pipe or process-level I/O failure.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Framing desync: unexpected reply opcode or init status. The byte
    /// alignment of the channel can no longer be trusted.
    #[error("IPC desync: {context} (code {code})")]
    Ipc { context: &'static str, code: u32 },

    /// The broker reported a protocol-level failure.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The broker does not support this operation for this protocol.
    #[error("operation unsupported: {0}")]
    Unsupported(String),

    /// Handshake or configuration failure.
    #[error("initialization failed: {0}")]
    Init(String),

    /// The user canceled an interactive login.
    #[error("login aborted by user")]
    Aborted,

    /// The connection is broken and needs an explicit re-handshake.
    #[error("connection is broken")]
    Broken,

    #[error("{0}")]
    Generic(String),
}

impl HostError {
    /// Whether this error leaves the channel desynchronized, so the
    /// connection must be marked broken rather than reused.
    pub fn breaks_connection(&self) -> bool {
        matches!(self, HostError::Channel(_) | HostError::Ipc { .. })
    }
}
