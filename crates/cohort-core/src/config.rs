//! Configuration binding
//!
//! The link reads its settings from a key/value store owned by the
//! embedder, rooted at `distribution/tcp`. An environment variable can
//! override the listen port; a port change while the link is enabled
//! bounces the listening socket.

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Keys and Defaults
// ----------------------------------------------------------------------------

/// Root of all link configuration keys
pub const CFG_KEY_DISTRIBUTION_TCP: &str = "distribution/tcp";

pub const CFG_KEY_PORT: &str = "/port";
pub const CFG_KEY_USERNAME: &str = "/username";
pub const CFG_KEY_PASSWORD: &str = "/password";
pub const CFG_KEY_RECONNECT_ATTEMPTS: &str = "/reconnect_attempts";
pub const CFG_KEY_RECONNECT_INTERVAL: &str = "/reconnect_interval";

/// Environment variable overriding the configured listen port
pub const PORT_ENV_VAR: &str = "WORKRAVE_PORT";

pub const DEFAULT_PORT: u16 = 27273;
pub const DEFAULT_ATTEMPTS: u32 = 5;
pub const DEFAULT_INTERVAL: u64 = 10;

// ----------------------------------------------------------------------------
// Config Store
// ----------------------------------------------------------------------------

/// Key/value configuration interface consumed by the link
///
/// Keys are full paths (root + suffix). Change notifications are the
/// embedder's side of the contract: it forwards them to the link's
/// `config_changed`.
pub trait ConfigStore {
    fn get_int(&self, key: &str) -> Option<i64>;
    fn get_string(&self, key: &str) -> Option<String>;
}

/// Build a full key from the root and one of the suffix constants
pub fn full_key(suffix: &str) -> String {
    format!("{CFG_KEY_DISTRIBUTION_TCP}{suffix}")
}

// ----------------------------------------------------------------------------
// Settings Snapshot
// ----------------------------------------------------------------------------

/// The link's current view of its configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSettings {
    /// TCP listen port
    pub port: u16,
    /// Shared username; `None` or empty matches any
    pub username: Option<String>,
    /// Shared password; `None` or empty matches any
    pub password: Option<String>,
    /// Retries per disconnection
    pub reconnect_attempts: u32,
    /// Seconds between retries
    pub reconnect_interval: u64,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            username: None,
            password: None,
            reconnect_attempts: DEFAULT_ATTEMPTS,
            reconnect_interval: DEFAULT_INTERVAL,
        }
    }
}

impl LinkSettings {
    /// Read a settings snapshot from the store, applying defaults and the
    /// port environment override
    pub fn read(store: &dyn ConfigStore) -> Self {
        let port = match std::env::var(PORT_ENV_VAR)
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
        {
            Some(p) => p,
            None => store
                .get_int(&full_key(CFG_KEY_PORT))
                .and_then(|v| u16::try_from(v).ok())
                .unwrap_or(DEFAULT_PORT),
        };

        Self {
            port,
            username: store.get_string(&full_key(CFG_KEY_USERNAME)),
            password: store.get_string(&full_key(CFG_KEY_PASSWORD)),
            reconnect_attempts: store
                .get_int(&full_key(CFG_KEY_RECONNECT_ATTEMPTS))
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(DEFAULT_ATTEMPTS),
            reconnect_interval: store
                .get_int(&full_key(CFG_KEY_RECONNECT_INTERVAL))
                .and_then(|v| u64::try_from(v).ok())
                .unwrap_or(DEFAULT_INTERVAL),
        }
    }

    /// Whether the given credential matches a configured one, where an
    /// absent or empty configured value matches anything
    pub fn credential_matches(configured: Option<&str>, offered: &str) -> bool {
        match configured {
            None | Some("") => true,
            Some(expected) => expected == offered,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MapStore {
        ints: HashMap<String, i64>,
        strings: HashMap<String, String>,
    }

    impl ConfigStore for MapStore {
        fn get_int(&self, key: &str) -> Option<i64> {
            self.ints.get(key).copied()
        }

        fn get_string(&self, key: &str) -> Option<String> {
            self.strings.get(key).cloned()
        }
    }

    #[test]
    fn test_defaults_when_store_is_empty() {
        let settings = LinkSettings::read(&MapStore::default());
        assert_eq!(settings.port, DEFAULT_PORT);
        assert_eq!(settings.reconnect_attempts, DEFAULT_ATTEMPTS);
        assert_eq!(settings.reconnect_interval, DEFAULT_INTERVAL);
        assert_eq!(settings.username, None);
    }

    #[test]
    fn test_reads_configured_values() {
        let mut store = MapStore::default();
        store.ints.insert(full_key(CFG_KEY_PORT), 9100);
        store.ints.insert(full_key(CFG_KEY_RECONNECT_ATTEMPTS), 3);
        store.ints.insert(full_key(CFG_KEY_RECONNECT_INTERVAL), 30);
        store
            .strings
            .insert(full_key(CFG_KEY_USERNAME), "user".into());

        let settings = LinkSettings::read(&store);
        assert_eq!(settings.port, 9100);
        assert_eq!(settings.reconnect_attempts, 3);
        assert_eq!(settings.reconnect_interval, 30);
        assert_eq!(settings.username.as_deref(), Some("user"));
    }

    #[test]
    fn test_out_of_range_port_falls_back_to_default() {
        let mut store = MapStore::default();
        store.ints.insert(full_key(CFG_KEY_PORT), 700_000);
        assert_eq!(LinkSettings::read(&store).port, DEFAULT_PORT);
    }

    #[test]
    fn test_credential_matching() {
        assert!(LinkSettings::credential_matches(None, "anything"));
        assert!(LinkSettings::credential_matches(Some(""), "anything"));
        assert!(LinkSettings::credential_matches(Some("pw"), "pw"));
        assert!(!LinkSettings::credential_matches(Some("pw"), "other"));
    }
}
