//! Thread-per-connection reader with a shared worker pool.
//!
//! The reader thread decodes a frame and captures `contextStart`, the sort
//! runs on the bounded pool, and the response is built and written on a
//! single-threaded executor owned by the connection. Two completions for
//! the same connection therefore never interleave bytes on the wire.

use super::{log_connection_end, Server, ServerError};
use crate::config::ServerConfig;
use crate::pipeline::ProcessingContext;
use crate::protocol::{read_frame, write_frame};
use crate::runtime::{Acceptor, ConnectionRegistry, SerialExecutor, WorkerPool};
use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, warn};

pub struct PooledBlockingServer {
    acceptor: Acceptor,
    connections: Arc<ConnectionRegistry>,
    pool: Arc<WorkerPool>,
}

impl PooledBlockingServer {
    /// Bind the listener and start `config.threads` workers.
    pub fn new(config: &ServerConfig) -> Result<Self, ServerError> {
        let acceptor = Acceptor::bind("blocking", config)?;
        let pool = WorkerPool::new("blocking-worker", config.threads, config.queue_capacity)?;
        Ok(Self {
            acceptor,
            connections: Arc::new(ConnectionRegistry::new()),
            pool: Arc::new(pool),
        })
    }
}

impl Server for PooledBlockingServer {
    fn run(&self) -> Result<(), ServerError> {
        let result = self.acceptor.run(|stream, peer| {
            let conn_id = match self.connections.insert(&stream) {
                Ok(id) => id,
                Err(e) => {
                    debug!(peer = %peer, error = %e, "Dropping connection");
                    return;
                }
            };
            debug!(conn_id, peer = %peer, "Accepted connection");

            let connections = Arc::clone(&self.connections);
            let pool = Arc::clone(&self.pool);
            let spawned = thread::Builder::new()
                .name(format!("blocking-reader-{conn_id}"))
                .spawn(move || {
                    if let Err(e) = read_loop(conn_id, stream, &pool) {
                        debug!(conn_id, error = %e, "Connection setup failed");
                    }
                    connections.remove(conn_id);
                });

            if let Err(e) = spawned {
                error!(conn_id, error = %e, "Failed to spawn reader thread");
                self.connections.remove(conn_id);
            }
        });

        self.connections.shutdown_all();
        self.pool.shutdown();
        result
    }

    fn close(&self) {
        self.acceptor.close();
        self.connections.shutdown_all();
        self.pool.shutdown();
    }

    fn local_addr(&self) -> SocketAddr {
        self.acceptor.local_addr()
    }
}

/// Read frames until the peer leaves or a frame is bad.
///
/// The socket closes once this loop and every queued write for it are done.
fn read_loop(conn_id: usize, mut stream: TcpStream, pool: &WorkerPool) -> io::Result<()> {
    let out = Arc::new(stream.try_clone()?);
    let writer = SerialExecutor::spawn(format!("blocking-writer-{conn_id}"))?;

    loop {
        let message = match read_frame(&mut stream) {
            Ok(message) => message,
            Err(e) => {
                log_connection_end(conn_id, &e);
                return Ok(());
            }
        };

        let context = ProcessingContext::begin(message);
        let writer = writer.clone();
        let out = Arc::clone(&out);

        let submitted = pool.submit(move || {
            let processed = match context.process() {
                Ok(processed) => processed,
                Err(e) => {
                    warn!(conn_id, error = %e, "Request failed, closing connection");
                    let _ = out.shutdown(Shutdown::Both);
                    return;
                }
            };

            let queued = writer.execute(move || {
                let response = processed.end();
                if let Err(e) = write_frame(&mut &*out, &response) {
                    log_connection_end(conn_id, &e);
                    let _ = out.shutdown(Shutdown::Both);
                }
            });
            if queued.is_err() {
                debug!(conn_id, "Writer closed, dropping response");
            }
        });

        if submitted.is_err() {
            debug!(conn_id, "Worker pool closed, dropping connection");
            let _ = stream.shutdown(Shutdown::Both);
            return Ok(());
        }
    }
}
