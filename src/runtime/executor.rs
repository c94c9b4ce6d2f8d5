//! Single-threaded executor.
//!
//! Jobs run one at a time, in submission order, on one dedicated thread.
//! The thread exits once every handle is dropped and the queue is empty.

use super::pool::{run_job, Job, PoolError};
use std::io;
use std::sync::mpsc::{self, Sender};
use std::thread;

/// Handle to a single-threaded executor. Clones share the same thread.
#[derive(Clone)]
pub struct SerialExecutor {
    sender: Sender<Job>,
}

impl SerialExecutor {
    /// Spawn the executor thread.
    pub fn spawn(name: String) -> io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        thread::Builder::new().name(name).spawn(move || {
            for job in receiver {
                run_job(job);
            }
        })?;
        Ok(Self { sender })
    }

    /// Queue a job behind every job submitted before it.
    pub fn execute<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender
            .send(Box::new(job))
            .map_err(|_| PoolError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[test]
    fn test_jobs_run_in_order_on_one_thread() {
        let executor = SerialExecutor::spawn("test-serial".to_string()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = mpsc::channel();

        for i in 0..50 {
            let seen = Arc::clone(&seen);
            // Submit from a clone to show clones share the queue.
            executor
                .clone()
                .execute(move || {
                    let name = thread::current().name().map(str::to_string);
                    seen.lock().unwrap().push((i, name));
                })
                .unwrap();
        }
        executor.execute(move || done_tx.send(()).unwrap()).unwrap();
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let seen = seen.lock().unwrap();
        let order: Vec<i32> = seen.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, (0..50).collect::<Vec<_>>());
        assert!(seen
            .iter()
            .all(|(_, name)| name.as_deref() == Some("test-serial")));
    }
}
