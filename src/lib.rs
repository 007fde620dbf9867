//! # honeypot-ipc
//!
//! Control-and-state plumbing for a privilege-separated honeypot daemon.
//!
//! ## Architecture
//!
//! - **Descriptor transfer** (`fdpass`): moves one open socket or file at a
//!   time between cooperating processes over a Unix domain socket
//! - **Tag streams** (`tagging`): compact self-describing encoding of
//!   connection records for transport and logging
//!
//! The two halves are independent. A worker typically receives a connection
//! over an [`FdChannel`], then writes [`ConnectionRecord`]s describing the
//! traffic it saw to a [`RecordSink`](sink::RecordSink).
//!
//! ## Example
//!
//! ```
//! use std::net::Ipv4Addr;
//! use honeypot_ipc::{ConnectionRecord, FdChannel};
//!
//! let (mut parent, mut worker) = FdChannel::pair().unwrap();
//! let (conn, _peer) = std::os::unix::net::UnixStream::pair().unwrap();
//!
//! let record = ConnectionRecord {
//!     src: Ipv4Addr::new(10, 0, 0, 9).into(),
//!     dst_port: 23,
//!     proto: 6,
//!     ..Default::default()
//! };
//! parent.send(&conn, &record.encode()).unwrap();
//!
//! let msg = worker.receive(512).unwrap().ready().unwrap();
//! assert_eq!(ConnectionRecord::decode(&msg.payload).unwrap(), record);
//! ```

pub mod config;
pub mod error;
pub mod fdpass;
pub mod sink;
pub mod tagging;
pub mod transport;

pub use config::ChannelConfig;
pub use error::{Attempt, IpcError, Result};
pub use fdpass::{AsyncFdChannel, FdChannel, TransferMessage};
pub use tagging::{Address, ConnectionRecord, TagReader, TagWriter, Timestamp};
