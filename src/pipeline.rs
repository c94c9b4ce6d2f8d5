//! Request processing shared by every server architecture.
//!
//! A request moves through three stages, each consuming the previous one:
//!
//! ```text
//! ProcessingContext::begin(message)   contextStart
//!     .process()?                     requestStart .. sort .. requestEnd
//!     .end()                          contextEnd -> response message
//! ```
//!
//! Whichever thread holds the context owns it outright. Servers hand it from
//! reader to worker to writer by move, so no stage ever runs twice.

use crate::protocol::Message;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors raised while processing a decoded message.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The message is not something a server knows how to process.
    #[error("unsupported request kind: {0}")]
    UnsupportedRequestKind(&'static str),
}

/// A request whose bytes have been read, waiting to be processed.
#[derive(Debug)]
pub struct ProcessingContext {
    message: Message,
    context_start: Instant,
}

/// A processed request, waiting for its response to be built.
#[derive(Debug)]
pub struct ProcessedContext {
    items: Vec<i32>,
    context_start: Instant,
    request_start: Instant,
    request_end: Instant,
}

impl ProcessingContext {
    /// Start the lifecycle of `message`, recording `contextStart`.
    pub fn begin(message: Message) -> Self {
        Self {
            message,
            context_start: Instant::now(),
        }
    }

    /// Kind of the message this context carries.
    pub fn kind(&self) -> &'static str {
        self.message.kind()
    }

    /// Run the sort stage, recording `requestStart` and `requestEnd` around it.
    pub fn process(self) -> Result<ProcessedContext, PipelineError> {
        let request_start = Instant::now();
        let mut items = match self.message {
            Message::SortArrayRequest { items } => items,
            other => return Err(PipelineError::UnsupportedRequestKind(other.kind())),
        };
        sort(&mut items);
        let request_end = Instant::now();

        Ok(ProcessedContext {
            items,
            context_start: self.context_start,
            request_start,
            request_end,
        })
    }
}

impl ProcessedContext {
    /// Record `contextEnd` and build the response.
    pub fn end(self) -> Message {
        let context_end = Instant::now();
        Message::SortArrayResponse {
            items: self.items,
            process_time_request_ms: millis(self.request_end - self.request_start),
            process_time_client_ms: millis(context_end - self.context_start),
        }
    }
}

/// Sort in place with adjacent compare-exchange passes.
///
/// Quadratic on purpose: the benchmark wants a predictable, non-trivial
/// processing cost. A pass with no exchanges ends the sort early.
pub fn sort(items: &mut [i32]) {
    let n = items.len();
    for pass in 0..n {
        let mut swapped = false;
        for i in 0..n - 1 - pass {
            if items[i] > items[i + 1] {
                items.swap(i, i + 1);
                swapped = true;
            }
        }
        if !swapped {
            break;
        }
    }
}

fn millis(duration: Duration) -> f32 {
    (duration.as_nanos() as f64 / 1_000_000.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort() {
        let mut items = vec![5, -1, 3, 3, i32::MIN, 0, i32::MAX, 2];
        let mut expected = items.clone();
        expected.sort();

        sort(&mut items);
        assert_eq!(items, expected);
    }

    #[test]
    fn test_sort_edge_sizes() {
        let mut empty: Vec<i32> = vec![];
        sort(&mut empty);
        assert!(empty.is_empty());

        let mut single = vec![42];
        sort(&mut single);
        assert_eq!(single, vec![42]);

        let mut descending: Vec<i32> = (0..200).rev().collect();
        sort(&mut descending);
        assert_eq!(descending, (0..200).collect::<Vec<_>>());
    }

    #[test]
    fn test_pipeline_produces_sorted_response() {
        let context = ProcessingContext::begin(Message::SortArrayRequest {
            items: vec![9, 7, 8],
        });
        assert_eq!(context.kind(), "sort_array_request");

        let response = context.process().unwrap().end();
        match response {
            Message::SortArrayResponse { items, .. } => assert_eq!(items, vec![7, 8, 9]),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_timings_are_ordered_and_positive() {
        let items: Vec<i32> = (0..1000).rev().collect();
        let response = ProcessingContext::begin(Message::SortArrayRequest { items })
            .process()
            .unwrap()
            .end();

        match response {
            Message::SortArrayResponse {
                process_time_request_ms,
                process_time_client_ms,
                ..
            } => {
                assert!(process_time_request_ms > 0.0);
                assert!(process_time_client_ms > 0.0);
                assert!(process_time_client_ms >= process_time_request_ms);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_response_message_is_unsupported() {
        let context = ProcessingContext::begin(Message::SortArrayResponse {
            items: vec![],
            process_time_request_ms: 0.0,
            process_time_client_ms: 0.0,
        });

        match context.process() {
            Err(PipelineError::UnsupportedRequestKind(kind)) => {
                assert_eq!(kind, "sort_array_response")
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
