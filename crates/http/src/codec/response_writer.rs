//! Response serialisation.
//!
//! The writer owns the framing headers: `Content-Length` and `Connection`
//! are always emitted by the server and stripped from user headers. A
//! sized body (byte buffer, or stream with a known remaining length) keeps
//! the connection open; a stream without a length cannot be framed for
//! keep-alive, so the writer omits `Content-Length` and forces the
//! connection closed. The caller learns the effective keep-alive from the
//! returned [`WriteOutcome`].

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::protocol::{canonical_reason, Response, SendError};

const INIT_HEADER_SIZE: usize = 4 * 1024;

/// Chunk size for draining a streamed body.
const STREAM_CHUNK_SIZE: usize = 8 * 1024;

/// Egress bytes accumulated before an intermediate flush.
const FLUSH_WATERMARK: usize = 64 * 1024;

/// What a completed write tells the connection loop.
#[derive(Debug, Clone, Copy)]
pub struct WriteOutcome {
    /// Keep-alive after the writer's framing override.
    pub keep_alive: bool,
    /// Body bytes put on the wire.
    pub body_bytes: u64,
}

/// Serialises responses to an egress stream.
///
/// One writer lives per connection; its scratch buffer is reused across
/// the keep-alive request sequence.
pub struct ResponseWriter {
    scratch: BytesMut,
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self { scratch: BytesMut::with_capacity(INIT_HEADER_SIZE) }
    }

    /// Writes one response and flushes the egress stream.
    pub async fn write<W>(
        &mut self,
        response: &mut Response,
        keep_alive: bool,
        writer: &mut W,
    ) -> Result<WriteOutcome, SendError>
    where
        W: AsyncWrite + Unpin,
    {
        let stream = response.take_stream();

        // a body stream takes precedence over the byte buffer; without a
        // known remaining length the response cannot be framed for reuse
        let (content_length, keep_alive) = match &stream {
            Some(stream) => match stream.remaining() {
                Some(remaining) => (Some(remaining), keep_alive),
                None => (None, false),
            },
            None => (Some(response.body().len() as u64), keep_alive),
        };

        self.encode_head(response, content_length, keep_alive);
        writer.write_all(&self.scratch).await?;
        let mut unflushed = self.scratch.len();

        let body_bytes = match stream {
            Some(mut stream) => {
                self.drain_stream(&mut stream, content_length, writer, &mut unflushed).await?
            }
            None => {
                writer.write_all(response.body()).await?;
                response.body().len() as u64
            }
        };

        writer.flush().await?;
        trace!(status = response.status(), body_bytes, keep_alive, "response written");

        Ok(WriteOutcome { keep_alive, body_bytes })
    }

    /// Status line, server-owned framing headers, then user headers minus
    /// the reserved names, in insertion order.
    fn encode_head(&mut self, response: &Response, content_length: Option<u64>, keep_alive: bool) {
        let dst = &mut self.scratch;
        dst.clear();
        dst.reserve(INIT_HEADER_SIZE);

        let reason = match response.reason() {
            "" => canonical_reason(response.status()),
            reason => reason,
        };
        dst.put_slice(format!("HTTP/1.1 {} {}\r\n", response.status(), reason).as_bytes());

        if let Some(length) = content_length {
            dst.put_slice(format!("Content-Length: {length}\r\n").as_bytes());
        }
        dst.put_slice(if keep_alive {
            b"Connection: keep-alive\r\n".as_slice()
        } else {
            b"Connection: close\r\n".as_slice()
        });

        for (name, value) in response.headers() {
            if name.eq_ignore_ascii_case("content-length") || name.eq_ignore_ascii_case("connection") {
                continue;
            }
            dst.put_slice(name.as_bytes());
            dst.put_slice(b": ");
            dst.put_slice(value.as_bytes());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");
    }

    /// Pumps the body stream to the egress in chunks, flushing once the
    /// unflushed egress passes the watermark. A sized stream is cut off
    /// at its declared length so the wire always matches `Content-Length`.
    async fn drain_stream<W>(
        &mut self,
        stream: &mut crate::protocol::ResponseStream,
        content_length: Option<u64>,
        writer: &mut W,
        unflushed: &mut usize,
    ) -> Result<u64, SendError>
    where
        W: AsyncWrite + Unpin,
    {
        use tokio::io::AsyncReadExt;

        self.scratch.clear();
        self.scratch.resize(STREAM_CHUNK_SIZE, 0);

        let mut written: u64 = 0;
        loop {
            // never read past the declared length of a sized stream
            let budget = match content_length {
                Some(length) => {
                    let left = length - written;
                    if left == 0 {
                        break;
                    }
                    left.min(STREAM_CHUNK_SIZE as u64) as usize
                }
                None => STREAM_CHUNK_SIZE,
            };

            let read = stream
                .reader_mut()
                .read(&mut self.scratch[..budget])
                .await
                .map_err(|e| SendError::invalid_body(format!("response stream failed: {e}")))?;
            if read == 0 {
                break;
            }

            writer.write_all(&self.scratch[..read]).await?;
            written += read as u64;

            *unflushed += read;
            if *unflushed >= FLUSH_WATERMARK {
                writer.flush().await?;
                *unflushed = 0;
            }
        }

        Ok(written)
    }
}

impl Default for ResponseWriter {
    fn default() -> Self {
        Self::new()
    }
}
