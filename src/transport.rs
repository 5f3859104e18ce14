//! The seam to the unreliable packet transport.

use crate::Error;

/// Result of a transport operation that may need to be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    /// The operation completed.
    Done,
    /// The transport cannot take more right now. Not an error: all state is
    /// preserved and the identical operation is retried later.
    WouldBlock,
}

/// Datagram transport, provided by the surrounding connection.
///
/// Reading stays outside this crate; the caller feeds received datagrams
/// into [`Engine::handle_packet`][crate::Engine::handle_packet].
pub trait Transport {
    /// Write one datagram. `WouldBlock` must leave the transport unchanged.
    fn write_packet(&mut self, packet: &[u8]) -> Result<IoStatus, Error>;

    /// A conservative path MTU to fall back to when retransmissions keep
    /// failing, if the transport knows one.
    fn query_fallback_mtu(&self) -> Option<usize>;
}
