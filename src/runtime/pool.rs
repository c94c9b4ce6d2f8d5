//! Fixed-size worker pool with a bounded job queue.
//!
//! Submitting blocks while the queue is full, which pushes back on whatever
//! thread reads requests off the network. Once the pool is shut down every
//! submission fails with [`PoolError::Closed`].

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, error};

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Errors returned when handing work to a pool or executor.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    /// The pool no longer accepts work.
    #[error("worker pool is closed")]
    Closed,
}

/// A fixed set of threads draining one bounded queue.
pub struct WorkerPool {
    name: String,
    threads: usize,
    sender: Mutex<Option<SyncSender<Job>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `threads` workers sharing a queue of `queue_capacity` jobs.
    ///
    /// Zero values are raised to one.
    pub fn new(name: &str, threads: usize, queue_capacity: usize) -> io::Result<Self> {
        let threads = threads.max(1);
        let (sender, receiver) = mpsc::sync_channel::<Job>(queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let mut handles = Vec::with_capacity(threads);
        for worker_id in 0..threads {
            let receiver = Arc::clone(&receiver);
            let handle = thread::Builder::new()
                .name(format!("{name}-{worker_id}"))
                .spawn(move || worker_loop(receiver))?;
            handles.push(handle);
        }

        debug!(pool = name, threads, queue_capacity, "Worker pool started");

        Ok(Self {
            name: name.to_string(),
            threads,
            sender: Mutex::new(Some(sender)),
            handles: Mutex::new(handles),
        })
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Queue a job, blocking while the queue is full.
    pub fn submit<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        // Clone the sender so a full queue never blocks `shutdown`.
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(PoolError::Closed)?;

        sender.send(Box::new(job)).map_err(|_| PoolError::Closed)
    }

    /// Stop accepting jobs, let queued jobs finish, and join the workers.
    ///
    /// Safe to call more than once and from inside a job.
    pub fn shutdown(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let handles = std::mem::take(&mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner));
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }

        debug!(pool = %self.name, "Worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(receiver: Arc<Mutex<Receiver<Job>>>) {
    loop {
        let job = receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recv();

        match job {
            Ok(job) => run_job(job),
            Err(_) => break,
        }
    }
}

/// Run a job, keeping the calling thread alive if it panics.
pub(crate) fn run_job(job: Job) {
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!(
            thread = thread::current().name().unwrap_or("unnamed"),
            "Job panicked"
        );
    }
}
