use thiserror::Error;

/// Fatal conditions surfaced by the delivery layer.
///
/// None of these are retryable. A blocked transport is not an error, it is
/// reported as [`IoStatus::WouldBlock`][crate::IoStatus::WouldBlock].
#[derive(Debug, Error)]
pub enum Error {
    /// A fragment header was truncated, or its declared fragment length
    /// overran the record payload.
    #[error("Malformed fragment header")]
    MalformedHeader,

    /// A fragment disagreed with the message type or total length already
    /// established for its sequence number.
    #[error("Fragment mismatch for in-window sequence number")]
    FragmentMismatch,

    /// A message declared a total length beyond the configured maximum.
    #[error("Message size exceeds maximum: {0}")]
    ExcessiveMessageSize(usize),

    /// The packet budget cannot make progress on even the first message
    /// of a flight.
    #[error("MTU too small to send: {0}")]
    MtuTooSmall(usize),

    /// The flight was retransmitted the maximum number of times without a
    /// reply. The handshake is abandoned.
    #[error("Retransmission timeout expired")]
    ReadTimeoutExpired,

    /// Record layer adapter failure (seal or open).
    #[error("Record layer error: {0}")]
    Crypto(String),

    /// Transport failure other than would-block.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Invalid configuration.
    #[error("Config error: {0}")]
    Config(&'static str),

    /// A broken internal invariant. No conforming or malicious peer can
    /// trigger this.
    #[error("Internal error: {0}")]
    Internal(&'static str),
}
