use std::io;
use std::time::Duration;

/// Largest datagram we read.
///
/// IPMI packets are small; 4 KiB is a conservative upper bound.
pub(crate) const MAX_DATAGRAM_SIZE: usize = 4096;

/// Shortest socket wait; a zero read timeout means "block forever" to the OS.
pub(crate) const MIN_WAIT: Duration = Duration::from_millis(1);

/// Receive errors that concern one peer rather than the socket.
///
/// `ConnectionReset` surfaces on some platforms when an earlier reply hit an ICMP
/// port-unreachable.
pub(crate) fn is_peer_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused
    )
}

#[cfg(feature = "blocking")]
pub(crate) mod blocking;

#[cfg(feature = "async")]
pub(crate) mod tokio;
