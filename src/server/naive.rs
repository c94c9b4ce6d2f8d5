//! Thread-per-connection server, fully synchronous.
//!
//! Each connection thread loops: read one frame, sort, write one frame.
//! There is no bound on the number of connection threads.

use super::{log_connection_end, Server, ServerError};
use crate::config::ServerConfig;
use crate::pipeline::ProcessingContext;
use crate::protocol::{read_frame, write_frame};
use crate::runtime::{Acceptor, ConnectionRegistry};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, warn};

pub struct NaiveBlockingServer {
    acceptor: Acceptor,
    connections: Arc<ConnectionRegistry>,
}

impl NaiveBlockingServer {
    /// Bind the listener. The configured thread count is ignored.
    pub fn new(config: &ServerConfig) -> Result<Self, ServerError> {
        Ok(Self {
            acceptor: Acceptor::bind("naive-blocking", config)?,
            connections: Arc::new(ConnectionRegistry::new()),
        })
    }
}

impl Server for NaiveBlockingServer {
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
            let spawned = thread::Builder::new()
                .name(format!("naive-conn-{conn_id}"))
                .spawn(move || {
                    serve_connection(conn_id, stream);
                    connections.remove(conn_id);
                });

            if let Err(e) = spawned {
                error!(conn_id, error = %e, "Failed to spawn connection thread");
                self.connections.remove(conn_id);
            }
        });

        self.connections.shutdown_all();
        result
    }

    fn close(&self) {
        self.acceptor.close();
        self.connections.shutdown_all();
    }

    fn local_addr(&self) -> SocketAddr {
        self.acceptor.local_addr()
    }
}

fn serve_connection(conn_id: usize, mut stream: TcpStream) {
    loop {
        let message = match read_frame(&mut stream) {
            Ok(message) => message,
            Err(e) => {
                log_connection_end(conn_id, &e);
                return;
            }
        };

        let context = ProcessingContext::begin(message);
        let response = match context.process() {
            Ok(processed) => processed.end(),
            Err(e) => {
                warn!(conn_id, error = %e, "Request failed, closing connection");
                return;
            }
        };

        if let Err(e) = write_frame(&mut stream, &response) {
            log_connection_end(conn_id, &e);
            return;
        }
    }
}
