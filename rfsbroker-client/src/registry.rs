//! Protocol registry: immutable name → broker lookup table, populated at
//! startup and queried on every handshake.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// One registered remote-filesystem protocol.
#[derive(Debug, Clone)]
pub struct ProtocolInfo {
    /// Protocol name as stored in site configuration (e.g. "sftp").
    pub name: String,
    /// Broker binary stem; the launcher appends `.broker`.
    pub broker: String,
    /// Whether a server address must be configured before connecting.
    pub require_server: bool,
}

impl ProtocolInfo {
    pub fn new(name: &str, broker: &str, require_server: bool) -> Self {
        Self {
            name: name.to_string(),
            broker: broker.to_string(),
            require_server,
        }
    }
}

/// Immutable lookup table. The process-wide default carries the built-in
/// protocol set; embedders with extra brokers build their own table and
/// inject it through [`crate::HostEnv`].
#[derive(Debug, Default)]
pub struct ProtocolRegistry {
    by_name: HashMap<String, ProtocolInfo>,
}

impl ProtocolRegistry {
    pub fn new(entries: impl IntoIterator<Item = ProtocolInfo>) -> Self {
        let by_name = entries
            .into_iter()
            .map(|info| (info.name.clone(), info))
            .collect();
        Self { by_name }
    }

    /// The built-in protocol set.
    pub fn builtin() -> Self {
        Self::new([
            ProtocolInfo::new("ftp", "ftp", true),
            ProtocolInfo::new("ftps", "ftp", true),
            ProtocolInfo::new("sftp", "sftp", true),
            ProtocolInfo::new("scp", "sftp", true),
            ProtocolInfo::new("nfs", "nfs", true),
            ProtocolInfo::new("smb", "smb", true),
            ProtocolInfo::new("webdav", "webdav", true),
            ProtocolInfo::new("webdavs", "webdav", true),
            ProtocolInfo::new("file", "file", false),
        ])
    }

    /// Process-wide default table.
    pub fn global() -> Arc<ProtocolRegistry> {
        static GLOBAL: OnceLock<Arc<ProtocolRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(ProtocolRegistry::builtin())))
    }

    pub fn lookup(&self, name: &str) -> Option<&ProtocolInfo> {
        self.by_name.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        let registry = ProtocolRegistry::builtin();
        let sftp = registry.lookup("sftp").unwrap();
        assert_eq!(sftp.broker, "sftp");
        assert!(sftp.require_server);

        let file = registry.lookup("file").unwrap();
        assert!(!file.require_server);

        assert!(registry.lookup("gopher").is_none());
    }

    #[test]
    fn test_global_is_shared() {
        let a = ProtocolRegistry::global();
        let b = ProtocolRegistry::global();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
