//! Readiness-driven descriptor channel on top of tokio.
//!
//! Wraps the same [`send_fd`] / [`receive_fd`] primitives as [`FdChannel`]
//! but waits for socket readiness instead of returning
//! [`Attempt::WouldBlock`](crate::Attempt::WouldBlock) to the caller.
//!
//! # Example
//!
//! ```ignore
//! use honeypot_ipc::fdpass::AsyncFdChannel;
//!
//! let (mut parent, mut worker) = AsyncFdChannel::pair()?;
//! parent.send(&accepted_socket, b"10.0.0.7:80").await?;
//! let msg = worker.receive(256).await?;
//! ```
//!
//! [`FdChannel`]: super::FdChannel

use std::io;
use std::os::fd::{AsFd, BorrowedFd};

use bytes::Bytes;
use tokio::io::Interest;
use tokio::net::UnixStream;

use super::channel::{poison, receive_fd, send_fd, TransferMessage};
use crate::error::{Attempt, IpcError, Result};

/// Async end of a descriptor transfer channel.
#[derive(Debug)]
pub struct AsyncFdChannel {
    stream: UnixStream,
    poisoned: bool,
}

/// Turn `WouldBlock` into the I/O error tokio expects from `try_io`, so that
/// the readiness flag is cleared before we wait again.
fn into_io<T>(result: Result<Attempt<T>>) -> io::Result<Result<T>> {
    match result {
        Ok(Attempt::Ready(value)) => Ok(Ok(value)),
        Ok(Attempt::WouldBlock) => Err(io::ErrorKind::WouldBlock.into()),
        Err(e) => Ok(Err(e)),
    }
}

impl AsyncFdChannel {
    /// Wrap a connected tokio Unix stream.
    pub fn new(stream: UnixStream) -> Self {
        Self {
            stream,
            poisoned: false,
        }
    }

    /// Create a connected pair.
    ///
    /// Must be called from within a tokio runtime.
    pub fn pair() -> Result<(Self, Self)> {
        let (a, b) = UnixStream::pair()?;
        Ok((Self::new(a), Self::new(b)))
    }

    /// Wrap a std socket, switching it to non-blocking mode.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_std(stream: std::os::unix::net::UnixStream) -> Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self::new(UnixStream::from_std(stream)?))
    }

    /// Check if an earlier fatal error disabled the channel.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Get a reference to the underlying socket.
    pub fn inner(&self) -> &UnixStream {
        &self.stream
    }

    /// Send `fd` with an optional payload, waiting while the send buffer is
    /// full. The caller keeps `fd`. Payloads longer than
    /// [`MAX_INLINE_PAYLOAD`](super::MAX_INLINE_PAYLOAD) are refused without
    /// poisoning the channel.
    pub async fn send(&mut self, fd: impl AsFd, payload: &[u8]) -> Result<usize> {
        self.ensure_usable()?;
        let fd = fd.as_fd();

        loop {
            if let Err(e) = self.stream.writable().await {
                return Err(self.fail("send", e));
            }

            let stream = &self.stream;
            match stream.try_io(Interest::WRITABLE, || into_io(send_fd(stream, fd, payload))) {
                Ok(Ok(n)) => {
                    tracing::debug!("Sent descriptor with {} payload bytes", n);
                    return Ok(n);
                }
                Ok(Err(e)) => return Err(self.poisoned_by(e)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(self.fail("send", e)),
            }
        }
    }

    /// Wait for one descriptor and at most `max_payload` payload bytes.
    pub async fn receive(&mut self, max_payload: usize) -> Result<TransferMessage> {
        self.ensure_usable()?;
        let mut buf = vec![0u8; max_payload.max(1)];

        loop {
            if let Err(e) = self.stream.readable().await {
                return Err(self.fail("receive", e));
            }

            let stream = &self.stream;
            let outcome =
                stream.try_io(Interest::READABLE, || into_io(receive_fd(stream, &mut buf)));
            match outcome {
                Ok(Ok((descriptor, len))) => {
                    buf.truncate(len);
                    tracing::debug!("Received descriptor with {} payload bytes", len);
                    return Ok(TransferMessage {
                        descriptor,
                        payload: Bytes::from(buf),
                    });
                }
                Ok(Err(e)) => return Err(self.poisoned_by(e)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(self.fail("receive", e)),
            }
        }
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.poisoned {
            return Err(IpcError::ChannelPoisoned);
        }
        Ok(())
    }

    fn fail(&mut self, op: &'static str, source: io::Error) -> IpcError {
        self.poisoned_by(IpcError::TransportFailure { op, source })
    }

    fn poisoned_by(&mut self, err: IpcError) -> IpcError {
        poison(&mut self.poisoned, &err);
        err
    }
}

impl AsFd for AsyncFdChannel {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}
