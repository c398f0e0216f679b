//! Error types for request parsing, response sending and connection
//! processing.
//!
//! [`ParseFailure`] is the closed set of fatal parser outcomes; any of them
//! terminates the connection. [`SendError`] covers response serialisation,
//! and [`HttpError`] is the top-level error the connection loop reports to
//! the acceptor, which only logs it.

use std::io;
use thiserror::Error;

/// The top-level error type for connection processing.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The parser rejected the request stream.
    #[error("request error: {source}")]
    RequestError {
        #[from]
        source: ParseFailure,
    },

    /// The response writer failed.
    #[error("response error: {source}")]
    ResponseError {
        #[from]
        source: SendError,
    },

    /// A middleware or handler returned an error; the connection is closed
    /// without writing a response.
    #[error("handler error: {source}")]
    HandlerError { source: Box<dyn std::error::Error + Send + Sync> },

    /// The ingress stream failed.
    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl HttpError {
    pub fn handler(source: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self::HandlerError { source }
    }
}

/// Fatal parser outcomes.
///
/// Every variant closes the connection; `Incomplete` is not an error and is
/// reported through [`ParseResult`](crate::codec::ParseResult) instead.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ParseFailure {
    /// The request line exceeds the per-line byte limit.
    #[error("request line exceeds the per-line limit")]
    RequestLineTooLong,

    /// A header line exceeds the per-line byte limit.
    #[error("header line exceeds the per-line limit")]
    HeaderLineTooLong,

    /// More headers than the configured maximum.
    #[error("header count exceeds the configured limit")]
    TooManyHeaders,

    /// The version token is not the literal `HTTP/1.1`.
    #[error("unsupported http version")]
    UnsupportedHttpVersion,

    /// Declared `Content-Length` exceeds the configured body limit.
    #[error("declared body size exceeds the configured limit")]
    RequestBodyTooLarge,

    /// Anything else: malformed request line, unknown method, malformed
    /// `Content-Length`.
    #[error("invalid request")]
    InvalidRequest,
}

/// Errors raised while serialising a response to the egress stream.
#[derive(Debug, Error)]
pub enum SendError {
    /// The response body stream failed mid-read.
    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    /// I/O error during sending.
    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SendError {
    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }
}
