//! Concurrency plumbing shared by the server architectures.
//!
//! - `WorkerPool`: fixed threads behind a bounded queue, for sort work
//! - `SerialExecutor`: one thread, strict submission order, for per-connection writes
//! - `ConnectionRegistry`: tracked sockets so `close()` reaches blocked readers
//! - `Acceptor`: blocking accept loop with a wake-up for shutdown

mod executor;
mod listener;
mod pool;
mod registry;

pub use executor::SerialExecutor;
pub use listener::{bind_listener, Acceptor};
pub use pool::{PoolError, WorkerPool};
pub use registry::ConnectionRegistry;
