//! HTTP/1.1 head parsing, the body data model, and the chunked codec used
//! by the streaming forwarder.

pub mod chunked;
pub mod message;
pub mod parse;

pub use chunked::{next_chunk, BodyCursor, BodySource, ChunkedError};
pub use message::{declared_framing, Framing, RequestHead, ResponseHead};
pub use parse::{read_request_head, read_response_head, HeadBuffer, ParseError};
