//! Cross-thread registration for a `Poll` owned by another thread.
//!
//! A `Poll` is only touched by the thread that polls it. Other threads
//! take the mailbox lock, queue a command, wake the poller and release the
//! lock. At the top of its next iteration the poller takes the same lock,
//! drains the queue, and performs the registrations itself.

use mio::{Registry, Token, Waker};
use std::io;
use std::sync::{Mutex, PoisonError};

pub(super) struct Mailbox<T> {
    queue: Mutex<Vec<T>>,
    waker: Waker,
}

impl<T> Mailbox<T> {
    /// Create a mailbox whose waker fires `token` on `registry`'s poll.
    pub fn new(registry: &Registry, token: Token) -> io::Result<Self> {
        Ok(Self {
            queue: Mutex::new(Vec::new()),
            waker: Waker::new(registry, token)?,
        })
    }

    /// Queue a command and wake the owning poll.
    pub fn post(&self, command: T) -> io::Result<()> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        queue.push(command);
        self.waker.wake()
    }

    /// Wake the owning poll without queuing anything.
    pub fn wake(&self) -> io::Result<()> {
        self.waker.wake()
    }

    /// Take every queued command, in posting order.
    pub fn drain(&self) -> Vec<T> {
        std::mem::take(&mut *self.queue.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::{Events, Poll};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    const WAKE: Token = Token(usize::MAX);

    #[test]
    fn test_post_wakes_poll_and_preserves_order() {
        let mut poll = Poll::new().unwrap();
        let mailbox = Arc::new(Mailbox::new(poll.registry(), WAKE).unwrap());

        let poster = {
            let mailbox = Arc::clone(&mailbox);
            thread::spawn(move || {
                for i in 0..10 {
                    mailbox.post(i).unwrap();
                }
            })
        };
        poster.join().unwrap();

        let mut events = Events::with_capacity(8);
        poll.poll(&mut events, Some(Duration::from_secs(5))).unwrap();
        assert!(events.iter().any(|e| e.token() == WAKE));

        assert_eq!(mailbox.drain(), (0..10).collect::<Vec<_>>());
        assert!(mailbox.drain().is_empty());
    }
}
