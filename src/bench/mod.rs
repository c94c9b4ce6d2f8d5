//! Benchmark harness.
//!
//! A scenario is `(element_count, client_count, interval_ms)`. Every client
//! opens its own connection and sends the same shuffled array
//! `request_count` times, sleeping `interval_ms` after each reply before
//! sending the next request.
//!
//! The observed latency of a client is measured over a window:
//!
//! - it opens with the request that completes once every client has
//!   completed its first request, so all clients are known to be loaded
//! - it closes with the client's last reply before the first client to
//!   finish its whole chain does so
//!
//! Only requests inside the window contribute to the averages. A client
//! whose window never opens makes the whole scenario unusable; the
//! scenario is skipped with a warning.

mod report;

pub use report::{to_csv, write_csv, CSV_HEADER};

use crate::client::{Client, ClientError};
use rand::seq::SliceRandom;
use serde::Serialize;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

/// Array size of the untimed warm-up request.
pub const WARM_UP_ELEMENTS: usize = 2000;

#[derive(Debug, Error)]
pub enum BenchError {
    #[error(transparent)]
    Client(#[from] ClientError),

    /// A client task panicked or was cancelled.
    #[error("client task failed: {0}")]
    Join(#[from] JoinError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// One aggregated measurement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Point {
    pub element_count: usize,
    pub client_count: usize,
    pub interval_ms: u64,
    /// Mean server time spent sorting.
    pub avg_request_process_time_ms: f64,
    /// Mean server time from request read to response ready.
    pub avg_client_process_time_ms: f64,
    /// Mean latency per request as observed by the clients.
    pub avg_response_time_ms: f64,
}

/// Server timings reported for one response.
#[derive(Debug, Clone, Copy)]
struct Timing {
    request_ms: f32,
    client_ms: f32,
}

/// What one client measured during a scenario.
#[derive(Debug, Default)]
struct ClientRun {
    timings: Vec<Timing>,
    window: Option<(Instant, Instant)>,
}

/// Counters shared by every client of one scenario.
struct Progress {
    clients: usize,
    started: AtomicUsize,
    first_finished: AtomicBool,
}

pub struct Benchmark {
    host: String,
    port: u16,
}

impl Benchmark {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Send one untimed request so the server is warm before measuring.
    pub async fn warm_up(&self) -> Result<(), BenchError> {
        let mut client = self.connect().await?;
        let items = shuffled_items(WARM_UP_ELEMENTS);
        client.sort_array(&items).await?;
        client.close().await?;
        debug!(elements = WARM_UP_ELEMENTS, "Warm-up finished");
        Ok(())
    }

    /// Run one scenario per index, up to the shortest of the three lists.
    ///
    /// Scenarios whose measurement window never opens are skipped, so the
    /// result may hold fewer points than scenarios.
    pub async fn evaluate(
        &self,
        request_count: usize,
        element_counts: &[usize],
        client_counts: &[usize],
        intervals_ms: &[u64],
    ) -> Result<Vec<Point>, BenchError> {
        let scenarios = element_counts
            .len()
            .min(client_counts.len())
            .min(intervals_ms.len());

        let mut points = Vec::with_capacity(scenarios);
        for i in 0..scenarios {
            let (elements, clients, interval) = (element_counts[i], client_counts[i], intervals_ms[i]);
            match self.run_scenario(request_count, elements, clients, interval).await? {
                Some(point) => {
                    info!(
                        elements,
                        clients,
                        interval,
                        request_ms = point.avg_request_process_time_ms,
                        client_ms = point.avg_client_process_time_ms,
                        response_ms = point.avg_response_time_ms,
                        "Scenario finished"
                    );
                    points.push(point);
                }
                None => {
                    warn!(elements, clients, interval, "Incorrect result, skipping scenario");
                }
            }
        }

        Ok(points)
    }

    async fn run_scenario(
        &self,
        request_count: usize,
        elements: usize,
        clients: usize,
        interval: u64,
    ) -> Result<Option<Point>, BenchError> {
        let items = Arc::new(shuffled_items(elements));
        let progress = Arc::new(Progress {
            clients,
            started: AtomicUsize::new(0),
            first_finished: AtomicBool::new(false),
        });

        let mut connections = Vec::with_capacity(clients);
        for _ in 0..clients {
            connections.push(self.connect().await?);
        }

        let tasks: Vec<JoinHandle<Result<ClientRun, ClientError>>> = connections
            .into_iter()
            .map(|client| {
                tokio::spawn(run_client(
                    client,
                    Arc::clone(&items),
                    Arc::clone(&progress),
                    request_count,
                    Duration::from_millis(interval),
                ))
            })
            .collect();

        let mut runs = Vec::with_capacity(clients);
        for task in tasks {
            runs.push(task.await??);
        }

        Ok(aggregate(elements, clients, interval, &runs))
    }

    async fn connect(&self) -> Result<Client, ClientError> {
        Client::connect((self.host.as_str(), self.port)).await
    }
}

async fn run_client(
    mut client: Client,
    items: Arc<Vec<i32>>,
    progress: Arc<Progress>,
    request_count: usize,
    interval: Duration,
) -> Result<ClientRun, ClientError> {
    let mut run = ClientRun::default();

    for request in 0..request_count {
        if request != 0 {
            tokio::time::sleep(interval).await;
        }
        if progress.first_finished.load(Ordering::SeqCst) {
            break;
        }

        let sent_at = Instant::now();
        let response = client.sort_array(&items).await?;

        if request == 0 {
            progress.started.fetch_add(1, Ordering::SeqCst);
        }
        if request + 1 == request_count {
            progress.first_finished.store(true, Ordering::SeqCst);
        }

        let opened_at = match run.window {
            Some((opened_at, _)) => opened_at,
            None if progress.started.load(Ordering::SeqCst) == progress.clients => sent_at,
            None => continue,
        };

        run.timings.push(Timing {
            request_ms: response.process_time_request_ms,
            client_ms: response.process_time_client_ms,
        });
        run.window = Some((opened_at, Instant::now()));
    }

    if let Err(e) = client.close().await {
        debug!(error = %e, "Failed to close benchmark client");
    }
    Ok(run)
}

/// Average the runs of one scenario. `None` if any window never opened.
fn aggregate(elements: usize, clients: usize, interval: u64, runs: &[ClientRun]) -> Option<Point> {
    if runs.is_empty() {
        return None;
    }

    let mut latencies = Vec::with_capacity(runs.len());
    for run in runs {
        let (opened_at, closed_at) = run.window?;
        let count = run.timings.len() as f64;
        let elapsed_ms = closed_at.duration_since(opened_at).as_secs_f64() * 1000.0;
        latencies.push((elapsed_ms - (count - 1.0) * interval as f64) / count);
    }

    let timings: Vec<Timing> = runs.iter().flat_map(|run| run.timings.iter().copied()).collect();

    Some(Point {
        element_count: elements,
        client_count: clients,
        interval_ms: interval,
        avg_request_process_time_ms: mean(timings.iter().map(|t| t.request_ms as f64)),
        avg_client_process_time_ms: mean(timings.iter().map(|t| t.client_ms as f64)),
        avg_response_time_ms: mean(latencies.into_iter()),
    })
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        -1.0
    } else {
        sum / count as f64
    }
}

/// `i * 7 - 2020` for every index, shuffled.
fn shuffled_items(len: usize) -> Vec<i32> {
    let mut items: Vec<i32> = (0..len)
        .map(|i| (i as i32).wrapping_mul(7).wrapping_sub(2020))
        .collect();
    items.shuffle(&mut rand::thread_rng());
    items
}
