//! Registry of live connections.
//!
//! Holds a duplicate handle of every accepted socket so `close()` can shut
//! down connections whose threads are parked in a blocking read. Slab
//! allocation gives O(1) insert and remove.

use slab::Slab;
use std::io;
use std::net::{Shutdown, TcpStream};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

struct Inner {
    connections: Slab<TcpStream>,
    closed: bool,
}

/// Tracks accepted sockets until their owner removes them.
pub struct ConnectionRegistry {
    inner: Mutex<Inner>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                connections: Slab::new(),
                closed: false,
            }),
        }
    }

    /// Track `stream`, returning its registry id.
    ///
    /// Fails with `NotConnected` once the registry has been shut down, so a
    /// connection accepted while the server closes is dropped straight away.
    pub fn insert(&self, stream: &TcpStream) -> io::Result<usize> {
        let handle = stream.try_clone()?;
        let mut inner = self.lock();
        if inner.closed {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection registry is closed",
            ));
        }
        Ok(inner.connections.insert(handle))
    }

    /// Stop tracking a connection.
    pub fn remove(&self, id: usize) {
        self.lock().connections.try_remove(id);
    }

    /// Number of tracked connections.
    pub fn len(&self) -> usize {
        self.lock().connections.len()
    }

    /// Check if no connections are tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shut down every tracked socket and refuse new ones.
    ///
    /// Threads blocked reading these sockets see end-of-stream and exit.
    pub fn shutdown_all(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        let count = inner.connections.len();
        for stream in inner.connections.drain() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        if count > 0 {
            debug!(count, "Closed tracked connections");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn test_insert_and_remove() {
        let registry = ConnectionRegistry::new();
        let (_c1, s1) = pair();
        let (_c2, s2) = pair();

        let id1 = registry.insert(&s1).unwrap();
        let id2 = registry.insert(&s2).unwrap();
        assert_ne!(id1, id2);
        assert_eq!(registry.len(), 2);

        registry.remove(id1);
        assert_eq!(registry.len(), 1);

        // Removing twice is harmless.
        registry.remove(id1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_shutdown_all_unblocks_readers_and_refuses_inserts() {
        let registry = ConnectionRegistry::new();
        let (_client, mut server) = pair();
        registry.insert(&server).unwrap();

        registry.shutdown_all();
        assert!(registry.is_empty());

        let mut buf = [0u8; 1];
        assert_eq!(server.read(&mut buf).unwrap(), 0);

        let (_c, s) = pair();
        let err = registry.insert(&s).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }
}
