//! TCP driver configuration

use serde::{Deserialize, Serialize};

/// Configuration for the tokio TCP driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpDriverConfig {
    /// Address the listening socket binds to
    pub bind_addr: String,
    /// Canonical hostname this node announces in its handshakes
    pub canonical_name: String,
    /// Per-connection read chunk size
    pub read_buffer_size: usize,
}

impl Default for TcpDriverConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            canonical_name: "localhost".to_string(),
            read_buffer_size: 8192,
        }
    }
}

impl TcpDriverConfig {
    /// Configuration announcing the given canonical hostname
    pub fn with_canonical_name(name: impl Into<String>) -> Self {
        Self {
            canonical_name: name.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TcpDriverConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0");
        assert!(config.read_buffer_size > 0);
    }
}
