//! Listening sockets and the blocking accept loop.

use crate::config::ServerConfig;
use crate::server::ServerError;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info};

const LISTEN_BACKLOG: i32 = 1024;
const WAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Create a TCP listener with SO_REUSEADDR set.
pub fn bind_listener(addr: SocketAddr, nonblocking: bool) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(nonblocking)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}

/// Blocking accept loop that another thread can stop.
///
/// `close` flips a flag and then connects to the listener itself, so an
/// `accept` parked in the kernel returns and observes the flag.
pub struct Acceptor {
    name: &'static str,
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    closed: AtomicBool,
}

impl Acceptor {
    /// Bind the configured address.
    pub fn bind(name: &'static str, config: &ServerConfig) -> Result<Self, ServerError> {
        let listener = bind_listener(config.addr()?, false)?;
        let local_addr = listener.local_addr()?;
        info!(server = name, addr = %local_addr, "Listening");

        Ok(Self {
            name,
            listener: Mutex::new(Some(listener)),
            local_addr,
            closed: AtomicBool::new(false),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Check if `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Accept connections on the calling thread until `close` is called.
    ///
    /// Accepted sockets have TCP_NODELAY set. Accept failures are logged and
    /// the loop keeps going. The listener is dropped on return.
    pub fn run<F>(&self, mut on_accept: F) -> Result<(), ServerError>
    where
        F: FnMut(TcpStream, SocketAddr),
    {
        let taken = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        // A closed acceptor has no listener either; that is not a second run.
        let Some(listener) = taken else {
            return if self.is_closed() {
                Ok(())
            } else {
                Err(ServerError::AlreadyRunning)
            };
        };
        if self.is_closed() {
            return Ok(());
        }

        loop {
            let accepted = listener.accept();
            if self.is_closed() {
                break;
            }

            match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(server = self.name, peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                    }
                    on_accept(stream, peer);
                }
                Err(e) => {
                    error!(server = self.name, error = %e, "Accept error");
                }
            }
        }

        info!(server = self.name, addr = %self.local_addr, "Stopped accepting");
        Ok(())
    }

    /// Stop the accept loop and release the listening socket.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        // Never started: dropping the listener is enough.
        let idle = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if idle.is_some() {
            return;
        }

        if let Err(e) = TcpStream::connect_timeout(&wake_addr(self.local_addr), WAKE_TIMEOUT) {
            debug!(server = self.name, error = %e, "Wake-up connection failed");
        }
    }
}

/// Loopback equivalent of a wildcard bind address.
pub(crate) fn wake_addr(addr: SocketAddr) -> SocketAddr {
    let ip = match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, addr.port())
}
