use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::OnceLock;

/// Whether `IPMI_DEBUG` is set to a non-empty value. Read once per process.
pub(crate) fn enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| std::env::var_os("IPMI_DEBUG").is_some_and(|v| !v.is_empty()))
}

/// Hex-dump a datagram exchanged with `peer`, sixteen bytes per row.
pub(crate) fn dump_hex(direction: &str, peer: SocketAddr, bytes: &[u8]) {
    if !enabled() {
        return;
    }
    let mut out = format!("{direction} {peer} ({} bytes)", bytes.len());
    for (row, chunk) in bytes.chunks(16).enumerate() {
        let _ = write!(out, "\n  {:04x}:", row * 16);
        for b in chunk {
            let _ = write!(out, " {b:02x}");
        }
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("{out}");

    #[cfg(not(feature = "tracing"))]
    eprintln!("{out}");
}
