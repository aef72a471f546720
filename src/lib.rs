#![deny(unsafe_code)]
#![warn(missing_docs)]

//! An emulated IPMI v2.0 BMC for ICS honeypots.
//!
//! The crate answers remote consoles the way a real baseboard management
//! controller would:
//! - IPMI v1.5 capability probes (`Get Channel Authentication Capabilities`)
//! - RMCP+ Open Session and RAKP 1-4 key exchange against a configured user table
//! - Integrity (HMAC-SHA1-96) and confidentiality (AES-CBC-128) on session traffic
//! - A small set of chassis, application and user-management commands backed
//!   by a virtual machine state
//!
//! Every attacker-visible step is reported as an [`Event`]. By default events are
//! written through `tracing` and, with the `metrics` feature, counted.
//!
//! Protocol handling is sans-IO: [`Dispatcher`] turns datagrams and clock ticks into
//! datagrams to send. `UdpServer` (feature `blocking`) and `TokioUdpServer`
//! (feature `async`) put it on a socket.

mod bmc;
mod commands;
mod config;
mod crypto;
mod debug;
mod error;
mod event;
mod handshake;
mod observe;
mod protocol;
mod server;
mod session;
#[cfg(test)]
mod testing;
mod transport;
mod types;
mod users;

pub use crate::bmc::{DEFAULT_BOOT_DEVICE, PowerState, VirtualBmc};
pub use crate::config::{DEFAULT_PORT, MAX_TIMEOUT, ServerBuilder, ServerConfig};
pub use crate::error::{Error, Result};
pub use crate::event::{CloseReason, Event, EventKind, EventSink, ObserveSink};
pub use crate::server::{Dispatcher, Outbound, SessionInfo};
pub use crate::session::{IpmiVersion, SessionState};
#[cfg(feature = "blocking")]
pub use crate::transport::blocking::UdpServer;
#[cfg(feature = "async")]
pub use crate::transport::tokio::UdpServer as TokioUdpServer;
pub use crate::types::{DeviceIdentity, PrivilegeLevel};
pub use crate::users::{User, UserStore};
