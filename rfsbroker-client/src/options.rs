//! Protocol option blob: an opaque string-encoded key/value map carried
//! through the connection. The only key this core interprets is
//! [`SERVER_IDENTITY_KEY`], used for identity-change detection.

use std::collections::BTreeMap;

/// Key holding the remembered server identity (host key fingerprint or
/// equivalent, protocol-defined).
pub const SERVER_IDENTITY_KEY: &str = "ServerIdentity";

/// Parsed view of an option blob. Encoded as a JSON object of strings;
/// unknown keys round-trip untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionsBlob {
    values: BTreeMap<String, String>,
}

impl OptionsBlob {
    /// Parses a blob. An empty or unparseable blob yields an empty map;
    /// the blob is broker-provided data, not something to fail on.
    pub fn parse(blob: &str) -> Self {
        let values = serde_json::from_str(blob).unwrap_or_default();
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn serialize(&self) -> String {
        serde_json::to_string(&self.values).unwrap_or_default()
    }
}
