//! # rfsbroker-protocol
//!
//! Wire protocol between a remote-filesystem host and its broker child
//! process.
//!
//! This crate provides:
//! - Synchronous pipe channel with exact-count transfers and cross-thread
//!   receive abort
//! - Fixed-layout native-endian record encoding
//! - The closed command/reply opcode set and init status codes
//! - Channel error types and protocol constants

pub mod channel;
pub mod command;
pub mod error;
pub mod pipe;
pub mod wire;

pub use channel::{PipeChannel, WakeHandle};
pub use command::{Command, InitStatus};
pub use error::ChannelError;
pub use wire::{FileInformation, Record, TimeSpec};

/// Version magic written by the broker right after startup.
///
/// Reserved: never used as a command or status code.
pub const VERSION_MAGIC: u32 = 0x5246_5301;

/// Maximum length-prefixed string size (16 MiB). Anything larger is
/// treated as a framing desync, not a legitimate payload.
pub const MAX_STRING_SIZE: u32 = 16 * 1024 * 1024;
