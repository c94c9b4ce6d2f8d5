//! Single-connection client.
//!
//! The protocol carries no request id, so a response is matched to its
//! request only by order. `sort_array` takes `&mut self` and reads the reply
//! before returning, which keeps exactly one request in flight on the
//! connection.

use crate::protocol::{read_frame_async, write_frame_async, Message, ProtocolError};
use std::io;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, ToSocketAddrs};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The server answered with something other than a sort response.
    #[error("unexpected message from server: {0}")]
    UnexpectedMessage(&'static str),
}

/// A sorted array and the server's timings for it.
#[derive(Debug, Clone, PartialEq)]
pub struct SortResponse {
    pub items: Vec<i32>,
    pub process_time_request_ms: f32,
    pub process_time_client_ms: f32,
}

pub struct Client {
    stream: TcpStream,
}

impl Client {
    /// Open a connection to a sort server.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    /// Send `items` and wait for the sorted reply.
    pub async fn sort_array(&mut self, items: &[i32]) -> Result<SortResponse, ClientError> {
        let request = Message::SortArrayRequest {
            items: items.to_vec(),
        };
        write_frame_async(&mut self.stream, &request).await?;

        match read_frame_async(&mut self.stream).await? {
            Message::SortArrayResponse {
                items,
                process_time_request_ms,
                process_time_client_ms,
            } => Ok(SortResponse {
                items,
                process_time_request_ms,
                process_time_client_ms,
            }),
            other => Err(ClientError::UnexpectedMessage(other.kind())),
        }
    }

    /// Shut the connection down.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode, read_frame, write_frame};
    use std::net::TcpListener;
    use std::thread;

    fn response(items: Vec<i32>) -> Message {
        Message::SortArrayResponse {
            items,
            process_time_request_ms: 0.5,
            process_time_client_ms: 1.0,
        }
    }

    #[tokio::test]
    async fn test_sort_array_decodes_response() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let request = read_frame(&mut stream).unwrap();
            assert_eq!(request, Message::SortArrayRequest { items: vec![2, 1] });
            write_frame(&mut stream, &response(vec![1, 2])).unwrap();
        });

        let mut client = Client::connect(addr).await.unwrap();
        let reply = client.sort_array(&[2, 1]).await.unwrap();
        assert_eq!(reply.items, vec![1, 2]);
        assert_eq!(reply.process_time_request_ms, 0.5);
        assert_eq!(reply.process_time_client_ms, 1.0);

        client.close().await.unwrap();
        peer.join().unwrap();
    }

    #[tokio::test]
    async fn test_request_echoed_back_is_unexpected() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let request = read_frame(&mut stream).unwrap();
            std::io::Write::write_all(&mut stream, &encode(&request).unwrap()).unwrap();
        });

        let mut client = Client::connect(addr).await.unwrap();
        let err = client.sort_array(&[1]).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::UnexpectedMessage("sort_array_request")
        ));
        peer.join().unwrap();
    }

    #[tokio::test]
    async fn test_server_hangup_is_framing_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let _ = read_frame(&mut stream).unwrap();
        });

        let mut client = Client::connect(addr).await.unwrap();
        let err = client.sort_array(&[1, 2, 3]).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::Framing(_))
        ));
        peer.join().unwrap();
    }
}
