//! Listening and connecting Unix sockets for descriptor channels.
//!
//! # Example
//!
//! ```ignore
//! use honeypot_ipc::transport::{connect, ChannelListener};
//! use honeypot_ipc::ChannelConfig;
//!
//! let config = ChannelConfig::default();
//! let listener = ChannelListener::bind(&config)?;
//! let worker_side = connect(&config).await?;
//! let parent_side = listener.accept().await?;
//! ```

use std::path::{Path, PathBuf};

use tokio::net::{UnixListener, UnixStream};

use crate::config::ChannelConfig;
use crate::error::Result;
use crate::fdpass::AsyncFdChannel;

/// Generate a unique socket path for this process inside `dir`.
///
/// Format: `{dir}/honeypot-{pid}-{random}.sock`
pub fn generate_socket_path(dir: impl AsRef<Path>) -> PathBuf {
    let name = format!("honeypot-{}-{:x}.sock", std::process::id(), rand_u64());
    dir.as_ref().join(name)
}

/// Simple random u64 from system time, process ID and a call counter.
fn rand_u64() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let pid = std::process::id() as u64;
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    nanos.wrapping_mul(0x517cc1b727220a95) ^ pid ^ seq.rotate_left(32)
}

/// Listening socket that hands out descriptor channels.
///
/// The socket file is removed when the listener is dropped.
#[derive(Debug)]
pub struct ChannelListener {
    listener: UnixListener,
    path: PathBuf,
}

/// Cleanup guard that removes the socket file on drop.
#[derive(Debug)]
pub struct SocketCleanup {
    path: PathBuf,
}

impl Drop for SocketCleanup {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

impl ChannelListener {
    /// Bind to the socket path named by `config`.
    ///
    /// Removes a stale socket file at the path before binding. Must be called
    /// from within a tokio runtime.
    pub fn bind(config: &ChannelConfig) -> Result<Self> {
        let path = config.path();
        if path.exists() {
            tracing::warn!("Removing stale socket at {}", path.display());
            std::fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;
        tracing::debug!("Listening for descriptor channels on {}", path.display());

        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    /// Accept a single connection as a descriptor channel.
    pub async fn accept(&self) -> Result<AsyncFdChannel> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(AsyncFdChannel::new(stream))
    }

    /// Get the socket path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create a cleanup guard that removes the socket on drop.
    pub fn cleanup_guard(&self) -> SocketCleanup {
        SocketCleanup {
            path: self.path.clone(),
        }
    }
}

impl Drop for ChannelListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Connect to the listener named by `config`.
pub async fn connect(config: &ChannelConfig) -> Result<AsyncFdChannel> {
    let stream = UnixStream::connect(config.path()).await?;
    Ok(AsyncFdChannel::new(stream))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_socket_path_format() {
        let path = generate_socket_path("/run/honeypot");
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(path.starts_with("/run/honeypot"));
        assert!(name.starts_with("honeypot-"));
        assert!(name.ends_with(".sock"));
        assert!(name.contains(&std::process::id().to_string()));
    }

    #[test]
    fn test_generate_socket_path_uniqueness() {
        let paths: Vec<PathBuf> = (0..10).map(|_| generate_socket_path("/tmp")).collect();
        for (i, p1) in paths.iter().enumerate() {
            for p2 in &paths[i + 1..] {
                assert_ne!(p1, p2);
            }
        }
    }

    #[tokio::test]
    async fn test_bind_accept_connect() {
        let dir = tempfile::tempdir().unwrap();
        let config = ChannelConfig::new(dir.path().join("fd.sock"));

        let listener = ChannelListener::bind(&config).unwrap();
        let (client, server) = tokio::join!(connect(&config), listener.accept());
        let mut client = client.unwrap();
        let mut server = server.unwrap();

        let (near, _far) = std::os::unix::net::UnixStream::pair().unwrap();
        client.send(&near, b"hi").await.unwrap();
        let msg = server.receive(config.max_payload).await.unwrap();
        assert_eq!(&msg.payload[..], b"hi");
    }

    #[tokio::test]
    async fn test_stale_socket_replaced_and_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let config = ChannelConfig::new(dir.path().join("fd.sock"));
        std::fs::write(config.path(), b"stale").unwrap();

        let listener = ChannelListener::bind(&config).unwrap();
        assert!(config.path().exists());
        drop(listener);
        assert!(!config.path().exists());
    }

    #[tokio::test]
    async fn test_cleanup_guard_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = ChannelConfig::new(dir.path().join("guard.sock"));
        let listener = ChannelListener::bind(&config).unwrap();
        let guard = listener.cleanup_guard();
        drop(guard);
        assert!(!listener.path().exists());
    }

    #[tokio::test]
    async fn test_connect_without_listener_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = ChannelConfig::new(dir.path().join("missing.sock"));
        assert!(connect(&config).await.is_err());
    }
}
