//! End-to-end behaviour shared by every server architecture.

mod common;

use common::{random_items, sorted, start};
use sortbench::client::Client;
use sortbench::protocol::{encode, Message};
use sortbench::server::ServerKind;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

#[tokio::test(flavor = "multi_thread")]
async fn test_round_trip_small_arrays() {
    for kind in ServerKind::ALL {
        let running = start(kind);
        let mut client = Client::connect(running.addr()).await.unwrap();

        for len in [0, 1, 1000] {
            let items = random_items(len);
            let reply = client.sort_array(&items).await.unwrap();
            assert_eq!(reply.items.len(), len, "{kind}");
            assert_eq!(reply.items, sorted(&items), "{kind}");
        }

        client.close().await.unwrap();
        running.stop().await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_round_trip_million_elements() {
    // Ascending input: one pass of the quadratic sort, but a multi-megabyte frame
    // each way.
    let items: Vec<i32> = (0..1_000_000).map(|i| i * 3 - 1_500_000).collect();

    for kind in ServerKind::ALL {
        let running = start(kind);
        let mut client = Client::connect(running.addr()).await.unwrap();

        let reply = client.sort_array(&items).await.unwrap();
        assert_eq!(reply.items.len(), items.len(), "{kind}");
        assert!(reply.items == items, "{kind}: response differs from input");

        client.close().await.unwrap();
        running.stop().await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_timings_are_positive_and_nested() {
    for kind in ServerKind::ALL {
        let running = start(kind);
        let mut client = Client::connect(running.addr()).await.unwrap();

        for _ in 0..3 {
            let reply = client.sort_array(&random_items(1000)).await.unwrap();
            assert!(reply.process_time_request_ms > 0.0, "{kind}");
            assert!(reply.process_time_client_ms > 0.0, "{kind}");
            assert!(
                reply.process_time_client_ms >= reply.process_time_request_ms,
                "{kind}"
            );
        }

        running.stop().await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_sequential_requests_answered_in_order() {
    for kind in ServerKind::ALL {
        let running = start(kind);
        let mut client = Client::connect(running.addr()).await.unwrap();

        // Alternate large and small arrays so processing times differ.
        for k in 0..20usize {
            let len = if k % 2 == 0 { 2000 } else { k };
            let items: Vec<i32> = random_items(len);
            let reply = client.sort_array(&items).await.unwrap();
            assert_eq!(reply.items, sorted(&items), "{kind}: request {k}");
        }

        running.stop().await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_clients() {
    for kind in ServerKind::ALL {
        let running = start(kind);
        let addr = running.addr();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                tokio::spawn(async move {
                    let mut client = Client::connect(addr).await.unwrap();
                    for _ in 0..5 {
                        let items = random_items(300);
                        let reply = client.sort_array(&items).await.unwrap();
                        assert_eq!(reply.items, sorted(&items));
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        running.stop().await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_truncated_frame_only_closes_its_connection() {
    let frame = encode(&Message::SortArrayRequest {
        items: random_items(50),
    })
    .unwrap();

    for kind in ServerKind::ALL {
        let running = start(kind);

        let mut broken = TcpStream::connect(running.addr()).unwrap();
        broken.write_all(&frame[..frame.len() / 2]).unwrap();
        broken.shutdown(Shutdown::Write).unwrap();

        let mut healthy = Client::connect(running.addr()).await.unwrap();
        let items = random_items(100);
        let reply = healthy.sort_array(&items).await.unwrap();
        assert_eq!(reply.items, sorted(&items), "{kind}");

        // The server must have hung up on the truncated connection.
        broken.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        match broken.read(&mut [0u8; 1]) {
            Ok(0) => {}
            Err(e) if !matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            other => panic!("{kind}: truncated connection still open: {other:?}"),
        }

        running.stop().await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_close_stops_run_and_refuses_connections() {
    for kind in ServerKind::ALL {
        let running = start(kind);
        let addr = running.addr();

        // An idle connection must not keep the server alive.
        let _idle = Client::connect(addr).await.unwrap();

        tokio::time::timeout(Duration::from_secs(10), running.stop())
            .await
            .expect("run() did not return after close()")
            .unwrap();

        assert!(TcpStream::connect(addr).is_err(), "{kind}");
    }
}
