//! Site configuration: login modes, stored site records, and the
//! credential-store seam.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How credentials are obtained when a connection handshakes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginMode {
    /// No credentials needed.
    #[default]
    Anonymous,
    /// Must prompt the user through the interactive-login collaborator.
    AskInteractive,
    /// Reuse remembered credentials automatically.
    UseStored,
}

impl LoginMode {
    /// Wire representation, sent as a u32 record during the handshake.
    pub fn code(self) -> u32 {
        match self {
            LoginMode::Anonymous => 0,
            LoginMode::AskInteractive => 1,
            LoginMode::UseStored => 2,
        }
    }

    pub fn from_u32(code: u32) -> Option<Self> {
        Some(match code {
            0 => LoginMode::Anonymous,
            1 => LoginMode::AskInteractive,
            2 => LoginMode::UseStored,
            _ => return None,
        })
    }
}

/// One stored site: protocol, endpoint, credentials and the opaque
/// protocol-option blob.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteRecord {
    pub protocol: String,
    pub host: String,
    pub port: u32,
    pub login_mode: LoginMode,
    pub username: String,
    pub password: String,
    /// Serialized protocol options; see [`crate::options`].
    #[serde(default)]
    pub options: String,
}

/// Read/write access to the site-credential store.
///
/// The core only reads a record at connection setup and writes back an
/// updated option blob after a server-identity change is allowed
/// permanently; credential persistence itself lives behind this trait.
pub trait SitesStore: Send + Sync {
    fn load(&self, site: &str) -> Option<SiteRecord>;

    fn store_options(&self, site: &str, protocol: &str, options: &str);
}

/// In-memory store, for embedders that manage persistence themselves and
/// for tests.
#[derive(Default)]
pub struct MemorySitesStore {
    sites: Mutex<HashMap<String, SiteRecord>>,
}

impl MemorySitesStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, site: impl Into<String>, record: SiteRecord) {
        self.sites.lock().insert(site.into(), record);
    }
}

impl SitesStore for MemorySitesStore {
    fn load(&self, site: &str) -> Option<SiteRecord> {
        self.sites.lock().get(site).cloned()
    }

    fn store_options(&self, site: &str, protocol: &str, options: &str) {
        let mut sites = self.sites.lock();
        if let Some(record) = sites.get_mut(site) {
            if record.protocol == protocol {
                record.options = options.to_string();
            }
        }
    }
}
