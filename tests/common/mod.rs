#![allow(dead_code)]

use rand::Rng;
use sortbench::config::ServerConfig;
use sortbench::server::{BenchServer, Server, ServerError, ServerKind};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A server running `run()` on its own thread.
pub struct Running {
    pub server: Arc<BenchServer>,
    handle: Option<JoinHandle<Result<(), ServerError>>>,
}

impl Running {
    pub fn addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// Close the server and wait for `run()` to return.
    pub async fn stop(mut self) -> Result<(), ServerError> {
        self.server.close();
        let handle = self.handle.take().expect("server already stopped");
        tokio::task::spawn_blocking(move || handle.join().expect("server thread panicked"))
            .await
            .expect("join task failed")
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        self.server.close();
    }
}

/// Bind `kind` on an ephemeral loopback port and start serving.
pub fn start(kind: ServerKind) -> Running {
    let server = Arc::new(
        BenchServer::bind(kind, &ServerConfig::new("127.0.0.1", 0, 4)).expect("bind failed"),
    );
    let runner = Arc::clone(&server);
    let handle = thread::Builder::new()
        .name(format!("test-{kind}"))
        .spawn(move || runner.run())
        .expect("spawn failed");

    Running {
        server,
        handle: Some(handle),
    }
}

pub fn random_items(len: usize) -> Vec<i32> {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen()).collect()
}

pub fn sorted(items: &[i32]) -> Vec<i32> {
    let mut items = items.to_vec();
    items.sort_unstable();
    items
}
