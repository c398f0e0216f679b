use tokio::io::AsyncRead;

/// Default status for a fresh or reset response; a handler that never
/// touches the response produces a routing-miss shaped answer.
const DEFAULT_STATUS: u16 = 404;

/// A reusable HTTP/1.1 response value.
///
/// Handlers mutate the pooled value in place. The body is either the owned
/// byte buffer or, when set, a [`ResponseStream`] which takes precedence
/// over the buffer at write time.
pub struct Response {
    status: u16,
    reason: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    stream: Option<ResponseStream>,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: DEFAULT_STATUS,
            reason: String::new(),
            headers: Vec::new(),
            body: Vec::new(),
            stream: None,
        }
    }
}

impl Response {
    pub fn new() -> Self {
        Default::default()
    }

    /// Returns the value to writer defaults, keeping allocations.
    pub fn reset(&mut self) {
        self.status = DEFAULT_STATUS;
        self.reason.clear();
        self.headers.clear();
        self.body.clear();
        self.stream = None;
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    /// The reason phrase; when left empty the writer substitutes the
    /// canonical phrase for the status code.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn set_reason(&mut self, reason: &str) {
        self.reason.clear();
        self.reason.push_str(reason);
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Appends a header pair; pairs are written in insertion order.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_body(&mut self, body: &[u8]) {
        self.body.clear();
        self.body.extend_from_slice(body);
    }

    /// Installs a streamed body; it takes precedence over the byte buffer.
    pub fn set_stream(&mut self, stream: ResponseStream) {
        self.stream = Some(stream);
    }

    pub fn has_stream(&self) -> bool {
        self.stream.is_some()
    }

    pub(crate) fn take_stream(&mut self) -> Option<ResponseStream> {
        self.stream.take()
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .field("stream", &self.stream.as_ref().map(|s| s.remaining()))
            .finish()
    }
}

/// A lazy, finite source of response body bytes.
///
/// A sized stream carries the number of bytes remaining to be read, which
/// becomes the `Content-Length` of the response. An unsized stream has no
/// length the writer can frame, so the writer omits `Content-Length` and
/// forces the connection closed after the body.
pub struct ResponseStream {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    remaining: Option<u64>,
}

impl ResponseStream {
    /// A stream whose remaining length is known up front.
    pub fn sized(reader: impl AsyncRead + Send + Unpin + 'static, remaining: u64) -> Self {
        Self { reader: Box::new(reader), remaining: Some(remaining) }
    }

    /// A stream read until end-of-input; the response cannot be framed
    /// with a `Content-Length` and closes the connection.
    pub fn unsized_stream(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self { reader: Box::new(reader), remaining: None }
    }

    pub fn remaining(&self) -> Option<u64> {
        self.remaining
    }

    pub(crate) fn reader_mut(&mut self) -> &mut (dyn AsyncRead + Send + Unpin) {
        &mut *self.reader
    }
}

/// The canonical reason phrase for well-known status codes; everything
/// else is the literal `Unknown`.
pub(crate) fn canonical_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_restores_writer_defaults() {
        let mut response = Response::new();
        response.set_status(200);
        response.set_reason("OK");
        response.add_header("X-Test", "1");
        response.set_body(b"hello");
        response.set_stream(ResponseStream::sized(std::io::Cursor::new(b"abc".to_vec()), 3));

        response.reset();

        assert_eq!(response.status(), 404);
        assert_eq!(response.reason(), "");
        assert!(response.headers().is_empty());
        assert!(response.body().is_empty());
        assert!(!response.has_stream());
    }

    #[test]
    fn canonical_reasons() {
        assert_eq!(canonical_reason(200), "OK");
        assert_eq!(canonical_reason(400), "Bad Request");
        assert_eq!(canonical_reason(404), "Not Found");
        assert_eq!(canonical_reason(500), "Internal Server Error");
        assert_eq!(canonical_reason(302), "Unknown");
        assert_eq!(canonical_reason(503), "Unknown");
    }
}
