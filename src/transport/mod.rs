//! Transport module - Unix socket endpoints for descriptor channels.
//!
//! Descriptor passing needs `SCM_RIGHTS`, so only Unix domain sockets are
//! supported.

mod socket;

pub use socket::{connect, generate_socket_path, ChannelListener, SocketCleanup};
