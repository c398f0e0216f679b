//! Request decoding and response serialisation.
//!
//! [`request_parser`] decodes one request from the accumulated ingress
//! bytes; [`response_writer`] serialises one response to the egress
//! stream. Both sides of the codec are one-shot per request rather than
//! streaming: the connection loop owns the buffering in between.

pub mod request_parser;
pub mod response_writer;

pub use request_parser::{parse, ParseContext, ParseResult, MAX_LINE_BYTES};
pub use response_writer::{ResponseWriter, WriteOutcome};
