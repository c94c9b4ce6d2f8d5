//! The four server architectures.
//!
//! Every variant speaks the same framed protocol and runs the same
//! [`ProcessingContext`](crate::pipeline::ProcessingContext) pipeline; they
//! differ only in how connections are accepted, read, dispatched and written:
//!
//! | Kind                   | Reads                  | Sort              | Writes                         |
//! |------------------------|------------------------|-------------------|--------------------------------|
//! | `NaiveBlocking`        | thread per connection  | same thread       | same thread                    |
//! | `PooledBlocking`       | thread per connection  | bounded pool      | serial executor per connection |
//! | `ReadinessMultiplexed` | one mio reader loop    | bounded pool      | one mio writer loop            |
//! | `AsyncCompletion`      | tokio tasks            | bounded pool      | tokio tasks                    |

mod completion;
mod naive;
mod pooled;
#[cfg(any(target_os = "linux", target_os = "macos"))]
mod readiness;

pub use completion::AsyncCompletionServer;
pub use naive::NaiveBlockingServer;
pub use pooled::PooledBlockingServer;
#[cfg(any(target_os = "linux", target_os = "macos"))]
pub use readiness::ReadinessMultiplexedServer;

use crate::config::ServerConfig;
use crate::pipeline::PipelineError;
use crate::protocol::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// Errors surfaced by server construction and `run()`.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Bind, multiplexer or runtime setup failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// `run()` was called while another `run()` owns the listener.
    #[error("server is already running")]
    AlreadyRunning,

    /// The architecture is not available on this platform.
    #[error("{0} server is not supported on this platform")]
    Unsupported(ServerKind),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Common surface of every architecture.
pub trait Server: Send + Sync {
    /// Serve on the calling thread until `close` is called.
    fn run(&self) -> Result<(), ServerError>;

    /// Stop accepting, close the listener and every connection, release pools.
    ///
    /// Idempotent and safe to call while `run` is executing on another thread.
    fn close(&self);

    /// Address the server is bound to.
    fn local_addr(&self) -> SocketAddr;
}

/// Server architecture selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServerKind {
    #[serde(rename = "naive-blocking")]
    NaiveBlocking,
    #[serde(rename = "blocking")]
    PooledBlocking,
    #[serde(rename = "non-blocking")]
    ReadinessMultiplexed,
    #[serde(rename = "async")]
    AsyncCompletion,
}

impl ServerKind {
    pub const ALL: [ServerKind; 4] = [
        ServerKind::NaiveBlocking,
        ServerKind::PooledBlocking,
        ServerKind::ReadinessMultiplexed,
        ServerKind::AsyncCompletion,
    ];

    /// Short name used in logs and thread names.
    pub fn name(self) -> &'static str {
        match self {
            ServerKind::NaiveBlocking => "naive-blocking",
            ServerKind::PooledBlocking => "blocking",
            ServerKind::ReadinessMultiplexed => "non-blocking",
            ServerKind::AsyncCompletion => "async",
        }
    }
}

impl fmt::Display for ServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ServerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServerKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| format!("unknown server kind '{s}'"))
    }
}

/// One server of any architecture.
pub enum BenchServer {
    NaiveBlocking(NaiveBlockingServer),
    PooledBlocking(PooledBlockingServer),
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    ReadinessMultiplexed(ReadinessMultiplexedServer),
    AsyncCompletion(AsyncCompletionServer),
}

impl BenchServer {
    /// Bind a server of the given architecture.
    pub fn bind(kind: ServerKind, config: &ServerConfig) -> Result<Self, ServerError> {
        Ok(match kind {
            ServerKind::NaiveBlocking => BenchServer::NaiveBlocking(NaiveBlockingServer::new(config)?),
            ServerKind::PooledBlocking => BenchServer::PooledBlocking(PooledBlockingServer::new(config)?),
            #[cfg(any(target_os = "linux", target_os = "macos"))]
            ServerKind::ReadinessMultiplexed => {
                BenchServer::ReadinessMultiplexed(ReadinessMultiplexedServer::new(config)?)
            }
            #[cfg(not(any(target_os = "linux", target_os = "macos")))]
            ServerKind::ReadinessMultiplexed => return Err(ServerError::Unsupported(kind)),
            ServerKind::AsyncCompletion => BenchServer::AsyncCompletion(AsyncCompletionServer::new(config)?),
        })
    }

    /// Architecture of this server.
    pub fn kind(&self) -> ServerKind {
        match self {
            BenchServer::NaiveBlocking(_) => ServerKind::NaiveBlocking,
            BenchServer::PooledBlocking(_) => ServerKind::PooledBlocking,
            #[cfg(any(target_os = "linux", target_os = "macos"))]
            BenchServer::ReadinessMultiplexed(_) => ServerKind::ReadinessMultiplexed,
            BenchServer::AsyncCompletion(_) => ServerKind::AsyncCompletion,
        }
    }

    fn inner(&self) -> &dyn Server {
        match self {
            BenchServer::NaiveBlocking(server) => server,
            BenchServer::PooledBlocking(server) => server,
            #[cfg(any(target_os = "linux", target_os = "macos"))]
            BenchServer::ReadinessMultiplexed(server) => server,
            BenchServer::AsyncCompletion(server) => server,
        }
    }
}

impl Server for BenchServer {
    fn run(&self) -> Result<(), ServerError> {
        self.inner().run()
    }

    fn close(&self) {
        self.inner().close()
    }

    fn local_addr(&self) -> SocketAddr {
        self.inner().local_addr()
    }
}

/// Log why a connection ended: peers leaving at `trace`, faults at `debug`.
pub(crate) fn log_connection_end(conn_id: usize, err: &ProtocolError) {
    if err.is_disconnect() {
        tracing::trace!(conn_id, "Connection closed by peer");
    } else {
        debug!(conn_id, error = %err, "Connection error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_match_cli_names() {
        let names: Vec<_> = ServerKind::ALL.iter().map(|k| k.to_string()).collect();
        assert_eq!(names, vec!["naive-blocking", "blocking", "non-blocking", "async"]);
    }

    #[test]
    fn test_kind_parses_from_name() {
        for kind in ServerKind::ALL {
            assert_eq!(kind.name().parse::<ServerKind>(), Ok(kind));
        }
        assert!("pooled".parse::<ServerKind>().is_err());
    }

    #[test]
    fn test_bind_reports_kind_and_address() {
        for kind in ServerKind::ALL {
            let server = BenchServer::bind(kind, &ServerConfig::new("127.0.0.1", 0, 2)).unwrap();
            assert_eq!(server.kind(), kind);
            assert_ne!(server.local_addr().port(), 0);
            server.close();
        }
    }
}
