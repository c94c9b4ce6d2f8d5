//! sortbench: four TCP server architectures behind one sort protocol, plus
//! the client and harness that measure them.
//!
//! - [`server`]: naive thread-per-connection, pooled thread-per-connection,
//!   readiness-multiplexed (mio) and async completion (tokio) servers
//! - [`client`]: single-connection client, one request in flight
//! - [`bench`]: concurrent-client harness and CSV export

pub mod bench;
pub mod client;
pub mod config;
pub mod pipeline;
pub mod protocol;
pub mod runtime;
pub mod server;
