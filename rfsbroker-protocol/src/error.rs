//! Channel error types.

use thiserror::Error;

/// Pipe/process-level channel failures.
///
/// Any of these means the byte stream to the broker can no longer be
/// trusted; callers treat them as fatal for the connection.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("channel closed by peer")]
    Closed,

    #[error("receive aborted")]
    Aborted,

    #[error("string too large: {size} bytes (max {max})")]
    TooLarge { size: u32, max: u32 },

    #[error("invalid UTF-8 in string payload")]
    InvalidUtf8,
}
