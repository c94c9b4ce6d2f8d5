//! Completion-style server on the tokio runtime.
//!
//! Every connection is a task that suspends at each I/O boundary: header
//! read, body read, response write. `read_exact` and `write_all` resume
//! partial completions until the buffer is full. The sort runs on the
//! shared worker pool and its result comes back over a oneshot channel, so
//! runtime threads only ever wait on I/O.

use super::{log_connection_end, Server, ServerError};
use crate::config::ServerConfig;
use crate::pipeline::ProcessingContext;
use crate::protocol::{encode, read_frame_async, ProtocolError};
use crate::runtime::{bind_listener, WorkerPool};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

pub struct AsyncCompletionServer {
    listener: Mutex<Option<std::net::TcpListener>>,
    local_addr: SocketAddr,
    pool: Arc<WorkerPool>,
    shutdown: Notify,
    closed: AtomicBool,
}

impl AsyncCompletionServer {
    /// Bind the listener and start `config.threads` workers.
    ///
    /// The tokio runtime is built by `run`, on the thread that serves.
    pub fn new(config: &ServerConfig) -> Result<Self, ServerError> {
        let listener = bind_listener(config.addr()?, true)?;
        let local_addr = listener.local_addr()?;
        let pool = WorkerPool::new("async-worker", config.threads, config.queue_capacity)?;
        info!(server = "async", addr = %local_addr, "Listening");

        Ok(Self {
            listener: Mutex::new(Some(listener)),
            local_addr,
            pool: Arc::new(pool),
            shutdown: Notify::new(),
            closed: AtomicBool::new(false),
        })
    }

    async fn serve(&self, listener: std::net::TcpListener) -> Result<(), ServerError> {
        let listener = TcpListener::from_std(listener)?;
        let mut connections = JoinSet::new();
        let mut next_conn_id = 0usize;

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                        }
                        let conn_id = next_conn_id;
                        next_conn_id += 1;
                        debug!(conn_id, peer = %peer, "Accepted connection");
                        connections.spawn(serve_connection(conn_id, stream, Arc::clone(&self.pool)));
                    }
                    Err(e) => {
                        error!(server = "async", error = %e, "Accept error");
                    }
                },
            }

            while connections.try_join_next().is_some() {}
        }

        drop(listener);
        info!(server = "async", addr = %self.local_addr, "Stopped accepting");
        connections.shutdown().await;
        Ok(())
    }
}

impl Server for AsyncCompletionServer {
    fn run(&self) -> Result<(), ServerError> {
        let taken = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let closed = self.closed.load(Ordering::SeqCst);
        let listener = match taken {
            Some(_) if closed => return Ok(()),
            Some(listener) => listener,
            None if closed => return Ok(()),
            None => return Err(ServerError::AlreadyRunning),
        };

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .thread_name("async-io")
            .enable_all()
            .build()?;

        let result = runtime.block_on(self.serve(listener));
        runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
        self.pool.shutdown();
        result
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Never started: dropping the listener is enough.
        drop(
            self.listener
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        self.shutdown.notify_one();
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

async fn serve_connection(conn_id: usize, mut stream: TcpStream, pool: Arc<WorkerPool>) {
    loop {
        let message = match read_frame_async(&mut stream).await {
            Ok(message) => message,
            Err(e) => {
                log_connection_end(conn_id, &e);
                return;
            }
        };

        let context = ProcessingContext::begin(message);
        let frame = match process_on_pool(conn_id, context, &pool).await {
            Some(frame) => frame,
            None => return,
        };

        if let Err(e) = stream.write_all(&frame).await {
            log_connection_end(conn_id, &ProtocolError::Io(e));
            return;
        }
    }
}

/// Run `process`, `end` and encode on the pool. `None` closes the connection.
async fn process_on_pool(
    conn_id: usize,
    context: ProcessingContext,
    pool: &WorkerPool,
) -> Option<Bytes> {
    let (tx, rx) = oneshot::channel();
    let job = move || {
        let frame = context
            .process()
            .map_err(ServerError::from)
            .and_then(|processed| Ok(encode(&processed.end())?));
        let _ = tx.send(frame);
    };

    // A full queue blocks the submitter; move that wait off the I/O threads.
    if tokio::task::block_in_place(|| pool.submit(job)).is_err() {
        debug!(conn_id, "Worker pool closed, dropping connection");
        return None;
    }

    match rx.await {
        Ok(Ok(frame)) => Some(frame),
        Ok(Err(e)) => {
            warn!(conn_id, error = %e, "Request failed, closing connection");
            None
        }
        // The job panicked or the pool dropped it on shutdown.
        Err(_) => {
            debug!(conn_id, "Request abandoned by worker pool");
            None
        }
    }
}
