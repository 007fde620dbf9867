//! Fdpass module - moving open descriptors between processes.
//!
//! - [`send_fd`] / [`receive_fd`]: single-shot primitives on any Unix socket
//! - [`FdChannel`]: blocking or non-blocking channel with poisoning
//! - [`AsyncFdChannel`]: tokio channel that waits for readiness

mod async_channel;
mod channel;

pub use async_channel::AsyncFdChannel;
pub use channel::{
    receive_fd, send_fd, FdChannel, TransferMessage, MAX_INLINE_PAYLOAD, PLACEHOLDER_BYTE,
};
