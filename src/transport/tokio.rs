use std::net::SocketAddr;
use std::time::Instant;

use tokio::net::UdpSocket;

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::observe;
use crate::server::{Dispatcher, Outbound};
use crate::transport::{MAX_DATAGRAM_SIZE, is_peer_error};

/// Tokio UDP front end for a [`Dispatcher`].
#[derive(Debug)]
pub struct UdpServer {
    socket: UdpSocket,
    dispatcher: Dispatcher,
}

impl UdpServer {
    /// Bind the configured address.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let socket = UdpSocket::bind(config.bind_addr()).await?;
        Ok(Self::with_socket(socket, Dispatcher::new(config)))
    }

    /// Serve `dispatcher` on an already bound socket.
    pub fn with_socket(socket: UdpSocket, dispatcher: Dispatcher) -> Self {
        Self { socket, dispatcher }
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Serve forever. Returns only on a socket error.
    pub async fn run(mut self) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            let deadline = self.dispatcher.next_deadline();
            let received = tokio::select! {
                r = self.socket.recv_from(&mut buf) => Some(r),
                _ = sleep_until(deadline) => None,
            };

            match received {
                Some(Ok((n, source))) => {
                    let out = self.dispatcher.handle(&buf[..n], source, Instant::now());
                    send_all(&self.socket, out).await;
                }
                Some(Err(e)) if is_peer_error(&e) => {}
                Some(Err(e)) => return Err(Error::Io(e)),
                None => {}
            }

            let out = self.dispatcher.poll_timers(Instant::now());
            send_all(&self.socket, out).await;
        }
    }
}

/// Send every datagram, logging failures; only the socket is borrowed across awaits.
async fn send_all(socket: &UdpSocket, out: Vec<Outbound>) {
    for datagram in out {
        if let Err(e) = socket.send_to(&datagram.bytes, datagram.destination).await {
            observe::record_send_failed(datagram.destination, &e);
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}
