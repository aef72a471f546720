use core::fmt;
use std::net::SocketAddr;

use crate::error::Error;

/// Why a session left the session table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The console sent `Close Session`.
    ClosedByPeer,
    /// A new Open Session Request replaced the session.
    Restarted,
    /// RAKP message 1 named an unknown or disabled user.
    UnknownUser,
    /// Wrong password or a bad key exchange / integrity code.
    AuthenticationFailed,
    /// An inbound sequence number went backwards.
    Replay,
    /// Malformed or out-of-order traffic.
    ProtocolViolation,
    /// A retried payload was never acknowledged.
    RetriesExhausted,
    /// Nothing arrived for the configured idle timeout.
    Idle,
}

impl CloseReason {
    /// Stable label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClosedByPeer => "closed_by_peer",
            Self::Restarted => "restarted",
            Self::UnknownUser => "unknown_user",
            Self::AuthenticationFailed => "authentication_failed",
            Self::Replay => "replay",
            Self::ProtocolViolation => "protocol_violation",
            Self::RetriesExhausted => "retries_exhausted",
            Self::Idle => "idle",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&Error> for CloseReason {
    fn from(err: &Error) -> Self {
        match err {
            Error::Replay { .. } => Self::Replay,
            Error::UnknownUser(_) => Self::UnknownUser,
            Error::AuthenticationFailed(_) | Error::Crypto(_) => Self::AuthenticationFailed,
            _ => Self::ProtocolViolation,
        }
    }
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// First datagram from a peer without a session.
    NewConnection,
    /// RAKP completed for `username`.
    LoginSucceeded {
        /// Authenticated account.
        username: String,
    },
    /// RAKP failed for `username` (unknown account or wrong password).
    LoginFailed {
        /// Name the console presented.
        username: String,
    },
    /// An authenticated IPMI command was processed.
    Command {
        /// Human-readable command name, e.g. `"Chassis Control"`.
        name: &'static str,
        /// Account that issued the command.
        username: String,
    },
    /// A session was removed.
    SessionClosed {
        /// Why it was removed.
        reason: CloseReason,
    },
}

/// One honeypot observation, tagged with the peer that caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Source address of the peer.
    pub source: SocketAddr,
    /// What happened.
    pub kind: EventKind,
}

/// Consumer of honeypot events.
///
/// Closures taking `&Event` implement this trait, which is handy for collecting events in tests.
pub trait EventSink {
    /// Handle one event. Called synchronously from the dispatcher.
    fn record(&mut self, event: &Event);
}

impl<F> EventSink for F
where
    F: FnMut(&Event),
{
    fn record(&mut self, event: &Event) {
        self(event)
    }
}

/// Default sink: forwards events to `tracing` / `metrics` when those features are enabled.
#[derive(Debug, Clone)]
pub struct ObserveSink {
    device_name: String,
}

impl ObserveSink {
    /// Sink that labels every event with `device_name`.
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
        }
    }
}

impl EventSink for ObserveSink {
    fn record(&mut self, event: &Event) {
        crate::observe::record_event(&self.device_name, event);
    }
}
