//! Readiness-multiplexed server.
//!
//! Three thread roles share one connection set:
//!
//! - the acceptor, on the thread calling `run`, which makes each socket
//!   non-blocking and posts it to the reader loop
//! - the reader loop, which owns one `Poll` and decodes frames
//! - the writer loop, which owns a second `Poll` and flushes responses
//!
//! Sorting happens on the worker pool. A pool job never touches a socket;
//! it posts the finished response to the writer loop's mailbox.
//!
//! Each socket is split into two descriptors: the reader loop owns the
//! first descriptor, the writer loop writes through a duplicate. Responses carry
//! their own handle to the duplicate, so a connection dropped by the
//! reader still gets its queued responses flushed.

mod connection;
mod event_loop;
mod mailbox;

use self::event_loop::{ReaderCommand, WriterCommand, WAKE_TOKEN};
use self::mailbox::Mailbox;
use super::{Server, ServerError};
use crate::config::ServerConfig;
use crate::runtime::{Acceptor, ConnectionRegistry, WorkerPool};
use mio::Poll;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, warn};

/// State shared by the acceptor, both loops, and pool jobs.
struct Shared {
    pool: WorkerPool,
    connections: ConnectionRegistry,
    reader: Mailbox<ReaderCommand>,
    writer: Mailbox<WriterCommand>,
    shutdown: AtomicBool,
}

impl Shared {
    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Ask both loops to exit at the top of their next iteration.
    fn stop_loops(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Err(e) = self.reader.wake() {
            warn!(error = %e, "Failed to wake reader loop");
        }
        if let Err(e) = self.writer.wake() {
            warn!(error = %e, "Failed to wake writer loop");
        }
    }
}

pub struct ReadinessMultiplexedServer {
    acceptor: Acceptor,
    shared: Arc<Shared>,
    polls: Mutex<Option<(Poll, Poll)>>,
    next_conn_id: AtomicUsize,
}

impl ReadinessMultiplexedServer {
    /// Bind the listener, create both pollers and start the worker pool.
    ///
    /// Failing to create a poller is a startup error.
    pub fn new(config: &ServerConfig) -> Result<Self, ServerError> {
        let acceptor = Acceptor::bind("non-blocking", config)?;
        let reader_poll = Poll::new()?;
        let writer_poll = Poll::new()?;

        let shared = Shared {
            pool: WorkerPool::new("non-blocking-worker", config.threads, config.queue_capacity)?,
            connections: ConnectionRegistry::new(),
            reader: Mailbox::new(reader_poll.registry(), WAKE_TOKEN)?,
            writer: Mailbox::new(writer_poll.registry(), WAKE_TOKEN)?,
            shutdown: AtomicBool::new(false),
        };

        Ok(Self {
            acceptor,
            shared: Arc::new(shared),
            polls: Mutex::new(Some((reader_poll, writer_poll))),
            next_conn_id: AtomicUsize::new(0),
        })
    }

    fn spawn_loops(&self) -> Result<[JoinHandle<()>; 2], ServerError> {
        let (reader_poll, writer_poll) = self
            .polls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(ServerError::AlreadyRunning)?;

        let shared = Arc::clone(&self.shared);
        let reader = thread::Builder::new()
            .name("non-blocking-reader".to_string())
            .spawn(move || {
                if let Err(e) = event_loop::reader_loop(reader_poll, shared) {
                    error!(error = %e, "Reader loop failed");
                }
            })?;

        let shared = Arc::clone(&self.shared);
        let writer = thread::Builder::new()
            .name("non-blocking-writer".to_string())
            .spawn(move || {
                if let Err(e) = event_loop::writer_loop(writer_poll, shared) {
                    error!(error = %e, "Writer loop failed");
                }
            });

        match writer {
            Ok(writer) => Ok([reader, writer]),
            Err(e) => {
                self.shared.stop_loops();
                let _ = reader.join();
                Err(e.into())
            }
        }
    }

    /// Split an accepted socket and post it to the reader loop.
    fn register(&self, stream: TcpStream, peer: SocketAddr) {
        let tracker_id = match self.shared.connections.insert(&stream) {
            Ok(id) => id,
            Err(e) => {
                debug!(peer = %peer, error = %e, "Dropping connection");
                return;
            }
        };
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);

        let write_half = match stream.set_nonblocking(true).and_then(|()| stream.try_clone()) {
            Ok(write_half) => Arc::new(write_half),
            Err(e) => {
                warn!(conn_id, error = %e, "Failed to prepare connection");
                self.shared.connections.remove(tracker_id);
                return;
            }
        };
        debug!(conn_id, peer = %peer, "Accepted connection");

        let command = ReaderCommand::Register {
            conn_id,
            tracker_id,
            stream: mio::net::TcpStream::from_std(stream),
            write_half,
        };
        if let Err(e) = self.shared.reader.post(command) {
            warn!(conn_id, error = %e, "Failed to wake reader loop");
        }
    }
}

impl Server for ReadinessMultiplexedServer {
    fn run(&self) -> Result<(), ServerError> {
        if self.acceptor.is_closed() {
            return Ok(());
        }

        let loops = self.spawn_loops()?;
        let result = self.acceptor.run(|stream, peer| self.register(stream, peer));

        self.shared.stop_loops();
        for handle in loops {
            let _ = handle.join();
        }
        self.shared.connections.shutdown_all();
        self.shared.pool.shutdown();
        result
    }

    fn close(&self) {
        self.acceptor.close();
        self.shared.stop_loops();
        self.shared.connections.shutdown_all();
        self.shared.pool.shutdown();
    }

    fn local_addr(&self) -> SocketAddr {
        self.acceptor.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{read_frame, write_frame, Message};
    use std::io::Write;

    fn start() -> (Arc<ReadinessMultiplexedServer>, thread::JoinHandle<()>) {
        let server = Arc::new(
            ReadinessMultiplexedServer::new(&ServerConfig::new("127.0.0.1", 0, 2)).unwrap(),
        );
        let runner = {
            let server = Arc::clone(&server);
            thread::spawn(move || server.run().unwrap())
        };
        (server, runner)
    }

    fn sort_over(stream: &mut TcpStream, items: Vec<i32>) -> Vec<i32> {
        write_frame(stream, &Message::SortArrayRequest { items }).unwrap();
        match read_frame(stream).unwrap() {
            Message::SortArrayResponse { items, .. } => items,
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_requests_on_many_connections() {
        let (server, runner) = start();
        let addr = server.local_addr();

        let clients: Vec<_> = (0..8)
            .map(|i| {
                thread::spawn(move || {
                    let mut stream = TcpStream::connect(addr).unwrap();
                    for round in 0..5 {
                        let items: Vec<i32> = (0..100).map(|x| (x * 31 + i + round) % 97).collect();
                        let mut expected = items.clone();
                        expected.sort();
                        assert_eq!(sort_over(&mut stream, items), expected);
                    }
                })
            })
            .collect();
        for client in clients {
            client.join().unwrap();
        }

        server.close();
        runner.join().unwrap();
    }

    #[test]
    fn test_bad_frame_only_closes_its_connection() {
        let (server, runner) = start();
        let addr = server.local_addr();

        let mut bad = TcpStream::connect(addr).unwrap();
        bad.write_all(&[0, 0, 0, 1, 0xc1]).unwrap();

        let mut good = TcpStream::connect(addr).unwrap();
        assert_eq!(sort_over(&mut good, vec![5, 4, 3]), vec![3, 4, 5]);

        assert!(read_frame(&mut bad).is_err());

        server.close();
        runner.join().unwrap();
    }

    #[test]
    fn test_close_releases_idle_connections() {
        let (server, runner) = start();
        let mut idle = TcpStream::connect(server.local_addr()).unwrap();
        assert_eq!(sort_over(&mut idle, vec![2, 1]), vec![1, 2]);

        server.close();
        runner.join().unwrap();

        assert!(server.shared.connections.is_empty());
        assert!(read_frame(&mut idle).is_err());
    }

    #[test]
    fn test_second_run_is_rejected() {
        let (server, runner) = start();
        while server.polls.lock().unwrap().is_some() {
            thread::yield_now();
        }
        assert!(matches!(server.run(), Err(ServerError::AlreadyRunning)));
        server.close();
        runner.join().unwrap();
    }
}
