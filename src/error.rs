use std::io;

use thiserror::Error;

/// Result type used across this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by this crate.
///
/// Inside the dispatcher these never escape a single datagram: each one is
/// mapped to "drop the packet" or "close the session" by [`Error::closes_session`].
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (socket, OS, etc.).
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Peer sent a malformed or unexpected packet.
    #[error("protocol error: {0}")]
    Protocol(&'static str),

    /// Peer sent a malformed or unexpected packet.
    #[error("protocol error: {0}")]
    ProtocolOwned(String),

    /// Authentication or integrity verification failed.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(&'static str),

    /// An inbound session sequence number went backwards.
    #[error("replayed sequence number {received:#010x} (last accepted {last:#010x})")]
    Replay {
        /// Sequence number carried by the rejected packet.
        received: u32,
        /// Last sequence number accepted on the session.
        last: u32,
    },

    /// RAKP message 1 named a user that is not configured.
    #[error("unknown user {0:?}")]
    UnknownUser(String),

    /// Cryptographic failure (invalid key sizes, decrypt failure, etc.).
    #[error("crypto error: {0}")]
    Crypto(&'static str),

    /// Unsupported protocol feature.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// Invalid caller-supplied argument or configuration.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

impl Error {
    pub(crate) fn protocol_owned(msg: impl Into<String>) -> Self {
        Self::ProtocolOwned(msg.into())
    }

    /// Whether this failure ends the peer's session (as opposed to dropping the datagram).
    pub fn closes_session(&self) -> bool {
        !matches!(
            self,
            Self::Io(_) | Self::Unsupported(_) | Self::InvalidArgument(_)
        )
    }
}
