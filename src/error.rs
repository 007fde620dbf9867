//! Error types for honeypot-ipc.
//!
//! Two tiers:
//! - [`Attempt::WouldBlock`] is the only retryable outcome and is not an error.
//! - Every [`IpcError`] except [`IpcError::Io`] and
//!   [`IpcError::PayloadTooLarge`] is fatal for the enclosing exchange: the
//!   record being decoded, or the channel the call was made on.

use thiserror::Error;

/// Main error type for all honeypot-ipc operations.
#[derive(Debug, Error)]
pub enum IpcError {
    /// The tag stream is structurally corrupt (bad length, bad width,
    /// truncated escape, unknown variant).
    #[error("Malformed tag stream: {0}")]
    MalformedStream(String),

    /// The peer broke the descriptor transfer contract.
    #[error("Descriptor transfer protocol violation: {0}")]
    ProtocolViolation(String),

    /// The transport failed in a way that leaves the channel unusable.
    #[error("Transport failure during {op}: {source}")]
    TransportFailure {
        /// Operation that failed (`send` or `receive`).
        op: &'static str,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The caller's payload does not fit in one transfer. Nothing was sent.
    #[error("Payload too large: {len} bytes (max {max})")]
    PayloadTooLarge {
        /// Requested payload length.
        len: usize,
        /// Largest payload one transfer carries.
        max: usize,
    },

    /// The channel already reported a fatal error and refuses further use.
    #[error("Channel is poisoned by an earlier fatal error")]
    ChannelPoisoned,

    /// I/O error outside a transfer (bind, connect, socket setup).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IpcError {
    /// Shorthand for a [`IpcError::MalformedStream`] error.
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        IpcError::MalformedStream(msg.into())
    }

    /// Shorthand for a [`IpcError::ProtocolViolation`] error.
    pub(crate) fn violation(msg: impl Into<String>) -> Self {
        IpcError::ProtocolViolation(msg.into())
    }

    /// Whether the caller must abandon the exchange this error came from.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, IpcError::Io(_) | IpcError::PayloadTooLarge { .. })
    }
}

/// Result type alias using IpcError.
pub type Result<T> = std::result::Result<T, IpcError>;

/// Outcome of a non-blocking channel operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Attempt<T> {
    /// The operation completed.
    Ready(T),
    /// The socket is not ready; wait for readiness and retry the same call.
    WouldBlock,
}

impl<T> Attempt<T> {
    /// Check if the operation completed.
    #[inline]
    pub fn is_ready(&self) -> bool {
        matches!(self, Attempt::Ready(_))
    }

    /// Check if the caller must retry.
    #[inline]
    pub fn is_would_block(&self) -> bool {
        matches!(self, Attempt::WouldBlock)
    }

    /// Convert into an `Option`, discarding the `WouldBlock` distinction.
    #[inline]
    pub fn ready(self) -> Option<T> {
        match self {
            Attempt::Ready(value) => Some(value),
            Attempt::WouldBlock => None,
        }
    }

    /// Map the completed value.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Attempt<U> {
        match self {
            Attempt::Ready(value) => Attempt::Ready(f(value)),
            Attempt::WouldBlock => Attempt::WouldBlock,
        }
    }
}
