//! Reliable delivery of handshake flights over an unreliable datagram
//! transport.
//!
//! Datagrams get lost, reordered and duplicated, and they are smaller than
//! the messages a handshake wants to exchange. This crate provides the
//! layer that deals with it: outgoing messages are fragmented to fit the
//! path MTU and resent as whole flights on a doubling timeout; incoming
//! fragments are reassembled in a fixed window and delivered strictly in
//! order.
//!
//! The crate is sans-IO. It never touches a socket, spawns a thread or
//! reads a clock: the caller writes packets through a [`Transport`], feeds
//! received datagrams into [`Engine::handle_packet`] and reports time into
//! [`Engine::handle_timeout`]. Encryption stays behind the [`RecordLayer`]
//! seam; this layer only decides which epoch each record is sealed under.

#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::new_without_default)]

#[macro_use]
extern crate log;

mod buffer;
mod codec;
mod config;
mod engine;
mod error;
mod flight;
mod incoming;
mod reassembly;
mod record;
mod timer;
mod transport;

pub use buffer::{Buf, BufferPool};
pub use codec::{fragments, ContentType, Fragment, FragmentHeader, FragmentIter};
pub use codec::{CCS_BODY, FRAGMENT_HEADER_LEN};
pub use config::{Config, ConfigBuilder, DEFAULT_MTU, MIN_MTU};
pub use engine::Engine;
pub use error::Error;
pub use incoming::CompleteMessage;
pub use record::{RecordLayer, SealEpoch};
pub use timer::{MAX_RTO, MAX_TIMEOUTS};
pub use transport::{IoStatus, Transport};

/// Max number of messages concurrently tracked in either direction: the
/// receive window holds this many in-progress messages, and an outgoing
/// flight holds at most this many.
pub const WINDOW_SIZE: usize = 7;
