use std::net::SocketAddr;

use crate::error::Error;
use crate::event::{Event, EventKind};

pub(crate) fn record_datagram(source: SocketAddr, len: usize) {
    let _ = (source, len);

    #[cfg(feature = "metrics")]
    {
        metrics::counter!("ipmi_honeypot_datagrams_total").increment(1);
    }

    #[cfg(feature = "tracing")]
    {
        tracing::trace!(%source, len, "datagram received");
    }
}

pub(crate) fn record_dropped(source: SocketAddr, err: &Error) {
    let _ = (source, err);

    #[cfg(feature = "metrics")]
    {
        metrics::counter!("ipmi_honeypot_dropped_total", "kind" => error_kind(err)).increment(1);
    }

    #[cfg(feature = "tracing")]
    {
        tracing::debug!(%source, error = %err, "datagram dropped");
    }
}

pub(crate) fn record_event(device: &str, event: &Event) {
    let source = event.source;
    let _ = (device, source);

    match &event.kind {
        EventKind::NewConnection => {
            #[cfg(feature = "metrics")]
            metrics::counter!("ipmi_honeypot_connections_total").increment(1);

            #[cfg(feature = "tracing")]
            tracing::info!(device, %source, "new ipmi connection");
        }
        EventKind::LoginSucceeded { username } => {
            let _ = username;

            #[cfg(feature = "tracing")]
            tracing::info!(device, %source, username = %username, "ipmi login");
        }
        EventKind::LoginFailed { username } => {
            let _ = username;

            #[cfg(feature = "metrics")]
            metrics::counter!("ipmi_honeypot_login_failures_total").increment(1);

            #[cfg(feature = "tracing")]
            tracing::warn!(device, %source, username = %username, "ipmi login failed");
        }
        EventKind::Command { name, username } => {
            let _ = (name, username);

            #[cfg(feature = "metrics")]
            metrics::counter!("ipmi_honeypot_commands_total", "command" => *name).increment(1);

            #[cfg(feature = "tracing")]
            tracing::info!(device, %source, command = *name, username = %username, "ipmi command");
        }
        EventKind::SessionClosed { reason } => {
            let _ = reason;

            #[cfg(feature = "metrics")]
            metrics::counter!("ipmi_honeypot_sessions_closed_total", "reason" => reason.as_str())
                .increment(1);

            #[cfg(feature = "tracing")]
            tracing::info!(device, %source, reason = reason.as_str(), "ipmi session closed");
        }
    }
}

#[cfg(feature = "metrics")]
fn error_kind(err: &Error) -> &'static str {
    match err {
        Error::Io(_) => "io",
        Error::Protocol(_) | Error::ProtocolOwned(_) => "protocol",
        Error::AuthenticationFailed(_) => "authentication",
        Error::Replay { .. } => "replay",
        Error::UnknownUser(_) => "unknown_user",
        Error::Crypto(_) => "crypto",
        Error::Unsupported(_) => "unsupported",
        Error::InvalidArgument(_) => "invalid_argument",
    }
}

pub(crate) fn record_send_failed(destination: SocketAddr, err: &std::io::Error) {
    let _ = (destination, err);

    #[cfg(feature = "metrics")]
    {
        metrics::counter!("ipmi_honeypot_send_errors_total").increment(1);
    }

    #[cfg(feature = "tracing")]
    {
        tracing::warn!(%destination, error = %err, "failed to send datagram");
    }
}

pub(crate) fn record_retransmit(peer: SocketAddr, payload_type: Option<u8>) {
    let _ = (peer, payload_type);

    #[cfg(feature = "metrics")]
    {
        metrics::counter!("ipmi_honeypot_retransmits_total").increment(1);
    }

    #[cfg(feature = "tracing")]
    {
        tracing::debug!(%peer, ?payload_type, "retransmitting unacknowledged message");
    }
}
