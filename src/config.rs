//! Channel configuration.
//!
//! The socket path and payload limit are passed explicitly to whoever owns
//! the channel; there is no process-wide default socket.
//!
//! # Example
//!
//! ```
//! use honeypot_ipc::ChannelConfig;
//!
//! let config: ChannelConfig =
//!     serde_json::from_str(r#"{ "socket_path": "/var/run/honeypot/fd.sock" }"#).unwrap();
//! assert_eq!(config.max_payload, honeypot_ipc::config::DEFAULT_MAX_PAYLOAD);
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::transport::generate_socket_path;

/// Default upper bound for the in-band payload accepted on receive.
pub const DEFAULT_MAX_PAYLOAD: usize = 1024;

/// Settings for one descriptor transfer channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Filesystem path of the listening Unix socket.
    pub socket_path: PathBuf,
    /// Largest in-band payload read per receive.
    pub max_payload: usize,
}

impl ChannelConfig {
    /// Create a config for the given socket path.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }

    /// Set the largest in-band payload read per receive.
    pub fn max_payload(mut self, limit: usize) -> Self {
        self.max_payload = limit;
        self
    }

    /// Socket path.
    pub fn path(&self) -> &Path {
        &self.socket_path
    }
}

impl Default for ChannelConfig {
    /// A unique path under the system temp directory.
    fn default() -> Self {
        Self::new(generate_socket_path(std::env::temp_dir()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = ChannelConfig::new("/tmp/x.sock").max_payload(64);
        assert_eq!(config.path(), Path::new("/tmp/x.sock"));
        assert_eq!(config.max_payload, 64);
    }

    #[test]
    fn test_default_uses_temp_dir() {
        let config = ChannelConfig::default();
        assert!(config.socket_path.starts_with(std::env::temp_dir()));
        assert_eq!(config.max_payload, DEFAULT_MAX_PAYLOAD);
    }

    #[test]
    fn test_json_round_trip() {
        let config = ChannelConfig::new("/run/honeypot/fd.sock").max_payload(4096);
        let json = serde_json::to_string(&config).unwrap();
        let back: ChannelConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_json_partial_uses_defaults() {
        let config: ChannelConfig = serde_json::from_str(r#"{ "max_payload": 8 }"#).unwrap();
        assert_eq!(config.max_payload, 8);
        assert!(config.socket_path.starts_with(std::env::temp_dir()));
    }
}
