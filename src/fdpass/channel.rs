//! Descriptor transfer over a connected Unix domain stream socket.
//!
//! One call moves exactly one descriptor:
//! ```text
//! sendmsg ─► ┌───────────────────────────┬──────────────────────┐
//!            │ SCM_RIGHTS control message │ in-band payload      │
//!            │ exactly one fd             │ >= 1 byte            │
//!            └───────────────────────────┴──────────────────────┘
//! ```
//!
//! An empty payload is replaced by a single zero byte, because a stream
//! socket cannot carry ancillary data without at least one data byte.
//!
//! The receiver treats anything other than "one data message carrying one
//! descriptor" as a [`ProtocolViolation`](crate::IpcError::ProtocolViolation):
//! a peer that breaks this contract is no longer trusted.

use std::io::{IoSlice, IoSliceMut};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

use bytes::Bytes;
use nix::errno::Errno;
use nix::sys::socket::{recvmsg, send, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags};

use crate::error::{Attempt, IpcError, Result};

/// Byte sent in-band when the caller has no payload.
pub const PLACEHOLDER_BYTE: u8 = 0;

/// Largest in-band payload accepted by [`send_fd`].
///
/// A Unix stream socket queues a payload of this size as one segment, so
/// `sendmsg` either takes all of it together with the descriptor or returns
/// `EAGAIN` without sending anything.
pub const MAX_INLINE_PAYLOAD: usize = 4096;

/// A descriptor received from the peer together with its in-band payload.
#[derive(Debug)]
pub struct TransferMessage {
    /// Newly allocated descriptor owned by the receiver.
    pub descriptor: OwnedFd,
    /// In-band payload as received (one zero byte if the sender had none).
    pub payload: Bytes,
}

impl TransferMessage {
    /// Split into descriptor and payload.
    pub fn into_parts(self) -> (OwnedFd, Bytes) {
        (self.descriptor, self.payload)
    }
}

fn send_flags() -> MsgFlags {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        MsgFlags::MSG_NOSIGNAL
    }
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    {
        MsgFlags::empty()
    }
}

fn recv_flags() -> MsgFlags {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        MsgFlags::MSG_CMSG_CLOEXEC
    }
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    {
        MsgFlags::empty()
    }
}

fn send_failure(errno: Errno) -> IpcError {
    IpcError::TransportFailure {
        op: "send",
        source: errno.into(),
    }
}

/// Send `fd` and `payload` over `socket`.
///
/// Returns the number of in-band bytes sent. `Attempt::WouldBlock` means
/// nothing was sent and the identical call should be retried once the socket
/// is writable. A payload longer than [`MAX_INLINE_PAYLOAD`] is refused with
/// [`IpcError::PayloadTooLarge`] before anything is sent; every other error
/// is fatal for the channel.
pub fn send_fd<S: AsFd + ?Sized>(
    socket: &S,
    fd: BorrowedFd<'_>,
    payload: &[u8],
) -> Result<Attempt<usize>> {
    if payload.len() > MAX_INLINE_PAYLOAD {
        return Err(IpcError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_INLINE_PAYLOAD,
        });
    }

    let placeholder = [PLACEHOLDER_BYTE];
    let body = if payload.is_empty() {
        &placeholder[..]
    } else {
        payload
    };

    let raw_socket = socket.as_fd().as_raw_fd();
    let fds = [fd.as_raw_fd()];
    let cmsgs = [ControlMessage::ScmRights(&fds)];
    let iov = [IoSlice::new(body)];

    let sent = loop {
        match sendmsg::<()>(raw_socket, &iov, &cmsgs, send_flags(), None) {
            Ok(0) => {
                return Err(IpcError::TransportFailure {
                    op: "send",
                    source: std::io::Error::new(
                        std::io::ErrorKind::WriteZero,
                        "sendmsg accepted zero bytes with a descriptor attached",
                    ),
                })
            }
            Ok(n) => break n,
            Err(Errno::EINTR) => continue,
            Err(Errno::EAGAIN) => return Ok(Attempt::WouldBlock),
            Err(errno) => return Err(send_failure(errno)),
        }
    };

    // The descriptor travels with the first byte; the rest goes without it.
    // Only a signal can cut a bounded payload short here.
    let mut written = sent;
    while written < body.len() {
        match send(raw_socket, &body[written..], send_flags()) {
            Ok(0) => return Err(send_failure(Errno::EPIPE)),
            Ok(n) => written += n,
            Err(Errno::EINTR) => continue,
            // The descriptor is already in flight; retrying the whole send
            // would deliver it twice.
            Err(errno) => return Err(send_failure(errno)),
        }
    }

    Ok(Attempt::Ready(written))
}

/// Receive one descriptor and up to `buf.len()` payload bytes from `socket`.
///
/// Retries internally when interrupted by a signal. Returns the descriptor
/// and the number of payload bytes written into `buf`.
pub fn receive_fd<S: AsFd + ?Sized>(
    socket: &S,
    buf: &mut [u8],
) -> Result<Attempt<(OwnedFd, usize)>> {
    let raw_socket = socket.as_fd().as_raw_fd();

    loop {
        // Room for a few descriptors so that an over-eager peer is detected
        // instead of silently truncated.
        let mut cmsg_buf = nix::cmsg_space!([RawFd; 4]);
        let mut iov = [IoSliceMut::new(&mut *buf)];

        let (bytes, flags, raw_fds, foreign) =
            match recvmsg::<()>(raw_socket, &mut iov, Some(&mut cmsg_buf), recv_flags()) {
                Ok(msg) => {
                    let mut raw_fds = Vec::new();
                    let mut foreign = 0usize;
                    for cmsg in msg.cmsgs() {
                        match cmsg {
                            ControlMessageOwned::ScmRights(fds) => raw_fds.extend(fds),
                            _ => foreign += 1,
                        }
                    }
                    (msg.bytes, msg.flags, raw_fds, foreign)
                }
                Err(Errno::EINTR) => continue,
                Err(Errno::EAGAIN) => return Ok(Attempt::WouldBlock),
                Err(errno) => {
                    return Err(IpcError::TransportFailure {
                        op: "receive",
                        source: errno.into(),
                    })
                }
            };

        // SAFETY: the kernel just installed these descriptors in our table
        // and nothing else refers to them yet.
        let mut owned: Vec<OwnedFd> = raw_fds
            .into_iter()
            .map(|fd| unsafe { OwnedFd::from_raw_fd(fd) })
            .collect();

        if bytes == 0 {
            return Err(IpcError::TransportFailure {
                op: "receive",
                source: std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "peer closed the channel",
                ),
            });
        }
        if flags.contains(MsgFlags::MSG_CTRUNC) {
            return Err(IpcError::violation("control data truncated"));
        }
        if foreign > 0 {
            return Err(IpcError::violation(format!(
                "{} control message(s) other than SCM_RIGHTS",
                foreign
            )));
        }
        if owned.len() != 1 {
            return Err(IpcError::violation(format!(
                "expected exactly one descriptor, got {}",
                owned.len()
            )));
        }

        let descriptor = owned.pop().ok_or_else(|| IpcError::violation("no descriptor"))?;
        return Ok(Attempt::Ready((descriptor, bytes)));
    }
}

/// One end of a descriptor transfer channel.
///
/// After any fatal error the channel is poisoned: every later call fails
/// with [`IpcError::ChannelPoisoned`] and the socket should be dropped.
#[derive(Debug)]
pub struct FdChannel {
    stream: UnixStream,
    poisoned: bool,
}

impl FdChannel {
    /// Wrap a connected Unix stream socket.
    pub fn new(stream: UnixStream) -> Self {
        Self {
            stream,
            poisoned: false,
        }
    }

    /// Create a connected pair, e.g. before forking a worker.
    pub fn pair() -> Result<(Self, Self)> {
        let (a, b) = UnixStream::pair()?;
        Ok((Self::new(a), Self::new(b)))
    }

    /// Switch between blocking and non-blocking mode.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.stream.set_nonblocking(nonblocking)?;
        Ok(())
    }

    /// Check if an earlier fatal error disabled the channel.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Get a reference to the underlying socket.
    pub fn inner(&self) -> &UnixStream {
        &self.stream
    }

    /// Unwrap the underlying socket.
    pub fn into_inner(self) -> UnixStream {
        self.stream
    }

    /// Send `fd` with an optional payload. The caller keeps `fd`.
    pub fn send(&mut self, fd: impl AsFd, payload: &[u8]) -> Result<Attempt<usize>> {
        self.ensure_usable()?;
        let fd = fd.as_fd();
        let result = send_fd(&self.stream, fd, payload);
        if let Ok(Attempt::Ready(n)) = &result {
            tracing::debug!("Sent fd {} with {} payload bytes", fd.as_raw_fd(), n);
        }
        self.check(result)
    }

    /// Receive one descriptor and at most `max_payload` payload bytes.
    pub fn receive(&mut self, max_payload: usize) -> Result<Attempt<TransferMessage>> {
        self.ensure_usable()?;
        let mut buf = vec![0u8; max_payload.max(1)];
        let result = receive_fd(&self.stream, &mut buf).map(|attempt| {
            attempt.map(|(descriptor, len)| {
                buf.truncate(len);
                tracing::debug!(
                    "Received fd {} with {} payload bytes",
                    descriptor.as_raw_fd(),
                    len
                );
                TransferMessage {
                    descriptor,
                    payload: Bytes::from(buf),
                }
            })
        });
        self.check(result)
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.poisoned {
            return Err(IpcError::ChannelPoisoned);
        }
        Ok(())
    }

    fn check<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            poison(&mut self.poisoned, e);
        }
        result
    }
}

impl AsFd for FdChannel {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}

/// Mark a channel unusable after a fatal error.
pub(crate) fn poison(flag: &mut bool, err: &IpcError) {
    if err.is_fatal() && !*flag {
        *flag = true;
        tracing::error!("Descriptor channel disabled: {}", err);
    }
}
