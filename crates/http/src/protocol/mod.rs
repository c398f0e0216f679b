//! Protocol data model: the reusable request and response values exchanged
//! between the parser, the handler chain and the response writer.
//!
//! Both [`Request`] and [`Response`] are designed for pooling: they are
//! plain owned values with a reset operation that returns them to their
//! parser/writer defaults while keeping their allocations alive, so the
//! keep-alive path of a connection does not allocate per request.

mod error;
mod http_version;
mod method;
mod request;
mod response;

pub use error::{HttpError, ParseFailure, SendError};
pub use http_version::HttpVersion;
pub use method::{Method, METHOD_COUNT};
pub use request::Request;
pub use response::{Response, ResponseStream};

pub(crate) use response::canonical_reason;
