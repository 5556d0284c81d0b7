//! # rfsbroker-client
//!
//! Client side of the rfsbroker remote-filesystem IPC.
//!
//! This crate provides:
//! - Connection management over a broker child process
//! - Authentication loop with interactive-login and identity seams
//! - Simple filesystem operations and streaming transfers
//! - Abort and reconnection handling

pub mod connection;
pub mod error;
pub mod interact;
pub mod options;
pub mod registry;
pub mod retry;
pub mod site;
pub mod spawn;
pub mod stream;

#[cfg(test)]
pub(crate) mod testutil;

pub use connection::{HostEnv, RemoteHost};
pub use error::HostError;
pub use interact::{ConfirmIdentity, IdentityDecision, InteractiveLogin, LoginCredentials, NonInteractive};
pub use registry::{ProtocolInfo, ProtocolRegistry};
pub use retry::RetryDelay;
pub use site::{LoginMode, MemorySitesStore, SiteRecord, SitesStore};
pub use spawn::{BrokerLauncher, ExecLauncher};
pub use stream::{DirectoryEntry, DirectoryEnumerator, FileReader, FileWriter};
