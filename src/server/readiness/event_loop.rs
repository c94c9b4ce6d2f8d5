//! Reader and writer event loops.
//!
//! mio readiness is edge-triggered, so both loops keep reading or writing a
//! socket until it reports `WouldBlock` before going back to `poll`.

use super::connection::{ReadOutcome, ReadState, WriteOutcome, WriteState};
use super::Shared;
use crate::pipeline::ProcessingContext;
use crate::protocol::Message;
use crate::server::log_connection_end;
use mio::net::TcpStream;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use slab::Slab;
use std::collections::HashMap;
use std::io;
use std::net::Shutdown;
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Fired by a mailbox post. Never a connection token.
pub(super) const WAKE_TOKEN: Token = Token(usize::MAX);

const EVENTS_CAPACITY: usize = 1024;

/// Work handed to the reader loop.
pub(super) enum ReaderCommand {
    /// Start reading a freshly accepted connection.
    Register {
        conn_id: usize,
        tracker_id: usize,
        stream: TcpStream,
        write_half: Arc<std::net::TcpStream>,
    },
}

/// Work handed to the writer loop.
pub(super) enum WriterCommand {
    /// Queue a finished response on a connection.
    Respond {
        conn_id: usize,
        stream: Arc<std::net::TcpStream>,
        response: Message,
    },
}

struct ReadConn {
    conn_id: usize,
    tracker_id: usize,
    stream: TcpStream,
    write_half: Arc<std::net::TcpStream>,
    state: ReadState,
}

struct WriteConn {
    stream: Arc<std::net::TcpStream>,
    state: WriteState,
}

/// Poll for readable connections, decode frames, and hand them to the pool.
///
/// Connections are keyed by slab index in this loop's `Poll`.
pub(super) fn reader_loop(mut poll: Poll, shared: Arc<Shared>) -> io::Result<()> {
    let mut events = Events::with_capacity(EVENTS_CAPACITY);
    let mut connections: Slab<ReadConn> = Slab::new();

    loop {
        for command in shared.reader.drain() {
            let ReaderCommand::Register {
                conn_id,
                tracker_id,
                mut stream,
                write_half,
            } = command;

            let entry = connections.vacant_entry();
            let token = Token(entry.key());
            if let Err(e) = poll
                .registry()
                .register(&mut stream, token, Interest::READABLE)
            {
                warn!(conn_id, error = %e, "Failed to register connection for reading");
                shared.connections.remove(tracker_id);
                continue;
            }
            trace!(conn_id, token = token.0, "Registered for reading");

            entry.insert(ReadConn {
                conn_id,
                tracker_id,
                stream,
                write_half,
                state: ReadState::new(),
            });
        }

        if shared.is_shutdown() {
            break;
        }

        if let Err(e) = poll.poll(&mut events, None) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(e);
        }

        for event in events.iter() {
            if event.token() == WAKE_TOKEN {
                continue;
            }

            let key = event.token().0;
            let keep = match connections.get_mut(key) {
                Some(conn) => drain_readable(conn, &shared),
                None => continue,
            };

            if !keep {
                let mut conn = connections.remove(key);
                let _ = poll.registry().deregister(&mut conn.stream);
                shared.connections.remove(conn.tracker_id);
            }
        }
    }

    for mut conn in connections.drain() {
        let _ = poll.registry().deregister(&mut conn.stream);
        shared.connections.remove(conn.tracker_id);
    }
    debug!("Reader loop stopped");
    Ok(())
}

/// Read every complete frame off a readable connection.
///
/// Returns false when the connection should be dropped.
fn drain_readable(conn: &mut ReadConn, shared: &Arc<Shared>) -> bool {
    loop {
        match conn.state.read_from(&mut conn.stream) {
            Ok(ReadOutcome::Frame(message)) => {
                if !dispatch(conn, message, shared) {
                    return false;
                }
            }
            Ok(ReadOutcome::WouldBlock) => return true,
            Ok(ReadOutcome::Closed) => {
                trace!(conn_id = conn.conn_id, "Connection closed by peer");
                return false;
            }
            Err(e) => {
                log_connection_end(conn.conn_id, &e);
                let _ = conn.write_half.shutdown(Shutdown::Both);
                return false;
            }
        }
    }
}

/// Capture `contextStart` and queue the rest of the pipeline on the pool.
fn dispatch(conn: &ReadConn, message: Message, shared: &Arc<Shared>) -> bool {
    let context = ProcessingContext::begin(message);
    let conn_id = conn.conn_id;
    let stream = Arc::clone(&conn.write_half);
    let job_shared = Arc::clone(shared);

    let submitted = shared.pool.submit(move || {
        let response = match context.process() {
            Ok(processed) => processed.end(),
            Err(e) => {
                warn!(conn_id, error = %e, "Request failed, closing connection");
                let _ = stream.shutdown(Shutdown::Both);
                return;
            }
        };

        let command = WriterCommand::Respond {
            conn_id,
            stream,
            response,
        };
        if let Err(e) = job_shared.writer.post(command) {
            warn!(conn_id, error = %e, "Failed to wake writer loop");
        }
    });

    if submitted.is_err() {
        debug!(conn_id, "Worker pool closed, dropping connection");
        return false;
    }
    true
}

/// Poll for writable connections and flush their queued responses.
///
/// A connection is registered here only while it has something to write.
/// Tokens are connection ids, which are never reused.
pub(super) fn writer_loop(mut poll: Poll, shared: Arc<Shared>) -> io::Result<()> {
    let mut events = Events::with_capacity(EVENTS_CAPACITY);
    let mut connections: HashMap<usize, WriteConn> = HashMap::new();

    loop {
        for command in shared.writer.drain() {
            let WriterCommand::Respond {
                conn_id,
                stream,
                response,
            } = command;

            if let Some(conn) = connections.get_mut(&conn_id) {
                conn.state.push(response);
                continue;
            }

            let fd = stream.as_raw_fd();
            if let Err(e) =
                poll.registry()
                    .register(&mut SourceFd(&fd), Token(conn_id), Interest::WRITABLE)
            {
                warn!(conn_id, error = %e, "Failed to register connection for writing");
                let _ = stream.shutdown(Shutdown::Both);
                continue;
            }

            let mut state = WriteState::new();
            state.push(response);
            connections.insert(conn_id, WriteConn { stream, state });
        }

        if shared.is_shutdown() {
            break;
        }

        if let Err(e) = poll.poll(&mut events, None) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(e);
        }

        for event in events.iter() {
            if event.token() == WAKE_TOKEN {
                continue;
            }

            let conn_id = event.token().0;
            let Some(conn) = connections.get_mut(&conn_id) else {
                continue;
            };

            let done = match conn.state.write_to(&mut &*conn.stream) {
                Ok(WriteOutcome::WouldBlock) => false,
                Ok(WriteOutcome::Flushed) => true,
                Err(e) => {
                    log_connection_end(conn_id, &e);
                    let _ = conn.stream.shutdown(Shutdown::Both);
                    true
                }
            };

            if done {
                if let Some(conn) = connections.remove(&conn_id) {
                    let fd = conn.stream.as_raw_fd();
                    let _ = poll.registry().deregister(&mut SourceFd(&fd));
                }
            }
        }
    }

    for (_, conn) in connections.drain() {
        let fd = conn.stream.as_raw_fd();
        let _ = poll.registry().deregister(&mut SourceFd(&fd));
    }
    debug!("Writer loop stopped");
    Ok(())
}
