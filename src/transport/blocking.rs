use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Instant;

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::observe;
use crate::server::{Dispatcher, Outbound};
use crate::transport::{MAX_DATAGRAM_SIZE, MIN_WAIT, is_peer_error};

/// Blocking UDP front end for a [`Dispatcher`].
#[derive(Debug)]
pub struct UdpServer {
    socket: UdpSocket,
    dispatcher: Dispatcher,
    buf: Vec<u8>,
}

impl UdpServer {
    /// Bind the configured address.
    pub fn bind(config: ServerConfig) -> Result<Self> {
        let socket = UdpSocket::bind(config.bind_addr())?;
        Ok(Self::with_socket(socket, Dispatcher::new(config)))
    }

    /// Serve `dispatcher` on an already bound socket.
    pub fn with_socket(socket: UdpSocket, dispatcher: Dispatcher) -> Self {
        Self {
            socket,
            dispatcher,
            buf: vec![0u8; MAX_DATAGRAM_SIZE],
        }
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// The dispatcher behind this socket.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Serve forever. Returns only on a socket error.
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.run_once()?;
        }
    }

    /// Wait for one datagram or the next timer, whichever comes first, and process it.
    pub fn run_once(&mut self) -> Result<()> {
        let wait = self
            .dispatcher
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()).max(MIN_WAIT));
        self.socket.set_read_timeout(wait)?;

        match self.socket.recv_from(&mut self.buf) {
            Ok((n, source)) => {
                let out = self.dispatcher.handle(&self.buf[..n], source, Instant::now());
                self.send_all(out);
            }
            Err(e) if is_timeout(&e) || is_peer_error(&e) => {}
            Err(e) => return Err(Error::Io(e)),
        }

        let out = self.dispatcher.poll_timers(Instant::now());
        self.send_all(out);
        Ok(())
    }

    fn send_all(&self, out: Vec<Outbound>) {
        for datagram in out {
            if let Err(e) = self.socket.send_to(&datagram.bytes, datagram.destination) {
                observe::record_send_failed(datagram.destination, &e);
            }
        }
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}
