//! Sort protocol implementation.
//!
//! A length-prefixed binary protocol carrying exactly one request type:
//! - Client sends: `SortArrayRequest { items }`
//! - Server responds: `SortArrayResponse { items, process_time_request_ms, process_time_client_ms }`
//!
//! ## Protocol Format
//!
//! ```text
//! ┌──────────────────┬──────────────────────────────┐
//! │ Length           │ Payload                      │
//! │ 4 bytes u32 BE   │ `length` bytes of MessagePack│
//! └──────────────────┴──────────────────────────────┘
//! ```
//!
//! One frame carries one message. There is no request identifier, so a
//! connection pairs responses with requests purely by order.

mod codec;
mod error;

pub use codec::{
    decode_payload, encode, parse_header, read_frame, read_frame_async, write_frame,
    write_frame_async, HEADER_SIZE, MAX_FRAME_LEN,
};
pub use error::ProtocolError;
pub(crate) use error::{PARTIAL_HEADER, SHORT_BODY};

use serde::{Deserialize, Serialize};

/// A message carried in one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Ask the server to sort `items`.
    SortArrayRequest { items: Vec<i32> },
    /// Sorted items plus the server-side timings for the request.
    SortArrayResponse {
        items: Vec<i32>,
        /// Time spent in the sort stage only.
        process_time_request_ms: f32,
        /// Time from the request's bytes being read to the response being ready.
        process_time_client_ms: f32,
    },
}

impl Message {
    /// Short name of the variant, for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::SortArrayRequest { .. } => "sort_array_request",
            Message::SortArrayResponse { .. } => "sort_array_response",
        }
    }
}
