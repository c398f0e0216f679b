//! HTTP/1.1 request parser.
//!
//! [`parse`] decodes at most one request from the front of the accumulated
//! ingress buffer. The buffer is only advanced on success; `Incomplete`
//! and every failure leave it untouched, so the caller can retry once more
//! bytes arrive or tear the connection down with the offending prefix
//! still in place.
//!
//! The grammar is deliberately narrow: `METHOD SP path SP HTTP/1.1`, LF
//! line endings with an optional CR stripped, `name: value` header lines,
//! a blank line, then exactly `Content-Length` body bytes. Header lines
//! without a colon (or with a colon in position zero) are skipped rather
//! than rejected. Only the first `Content-Length` is authoritative.

use std::net::SocketAddr;

use bytes::{Buf, BytesMut};
use memchr::memchr;

use crate::ensure;
use crate::pool::Pool;
use crate::protocol::{HttpVersion, Method, ParseFailure, Request};

/// Per-line byte limit for the request line and each header line.
pub const MAX_LINE_BYTES: usize = 8 * 1024;

/// Inputs the parser needs besides the bytes themselves.
pub struct ParseContext<'a> {
    /// Whether the transport under the connection is secured.
    pub secure: bool,
    /// Remote endpoint, when known.
    pub remote: Option<SocketAddr>,
    /// Port of the accepting endpoint.
    pub local_port: u16,
    /// Request pool to draw the output value from; allocates when absent.
    pub pool: Option<&'a Pool<Request>>,
    pub max_header_count: usize,
    pub max_request_body_size: usize,
}

/// Outcome of one parse attempt.
pub enum ParseResult {
    /// More bytes are needed; the input was not consumed.
    Incomplete,
    /// One request was decoded and consumed from the input.
    Success { request: Request, keep_alive: bool },
    /// The request stream is unusable; the connection must close.
    Failed(ParseFailure),
}

/// Attempts to decode one request from the front of `src`.
pub fn parse(src: &mut BytesMut, ctx: &ParseContext<'_>) -> ParseResult {
    let outline = match scan(&src[..], ctx) {
        Ok(Some(outline)) => outline,
        Ok(None) => return ParseResult::Incomplete,
        Err(failure) => return ParseResult::Failed(failure),
    };

    let request = materialize(&src[..], &outline, ctx);
    let keep_alive = outline.keep_alive;
    src.advance(outline.consumed);

    ParseResult::Success { request, keep_alive }
}

/// Byte ranges into the unconsumed input; nothing is copied until the
/// whole request is known to be present.
struct Outline {
    method: Method,
    version: HttpVersion,
    path: (usize, usize),
    query: (usize, usize),
    headers: Vec<HeaderSpan>,
    content_length: usize,
    content_type: Option<(usize, usize)>,
    keep_alive: bool,
    body_start: usize,
    consumed: usize,
}

struct HeaderSpan {
    name: (usize, usize),
    value: (usize, usize),
}

enum Line {
    /// Bytes of the line (CR/LF stripped) and the offset just past its LF.
    Complete { start: usize, end: usize, next: usize },
    Missing,
    TooLong,
}

/// Scans for the LF terminating the line at `from`.
fn scan_line(buf: &[u8], from: usize) -> Line {
    match memchr(b'\n', &buf[from..]) {
        Some(offset) => {
            let mut end = from + offset;
            let next = end + 1;
            if end > from && buf[end - 1] == b'\r' {
                end -= 1;
            }
            if end - from > MAX_LINE_BYTES {
                Line::TooLong
            } else {
                Line::Complete { start: from, end, next }
            }
        }
        None if buf.len() - from > MAX_LINE_BYTES => Line::TooLong,
        None => Line::Missing,
    }
}

fn scan(buf: &[u8], ctx: &ParseContext<'_>) -> Result<Option<Outline>, ParseFailure> {
    let (request_line, mut pos) = match scan_line(buf, 0) {
        Line::Complete { start, end, next } => ((start, end), next),
        Line::Missing => return Ok(None),
        Line::TooLong => return Err(ParseFailure::RequestLineTooLong),
    };

    let (method, version, path, query) = scan_request_line(buf, request_line)?;

    let mut headers = Vec::new();
    let mut content_length: Option<usize> = None;
    let mut content_type = None;
    let mut keep_alive = true;

    loop {
        let (line, next) = match scan_line(buf, pos) {
            Line::Complete { start, end, next } => ((start, end), next),
            Line::Missing => return Ok(None),
            Line::TooLong => return Err(ParseFailure::HeaderLineTooLong),
        };
        pos = next;

        if line.0 == line.1 {
            // blank line: end of headers
            break;
        }

        let span = match scan_header_line(buf, line) {
            Some(span) => span,
            // no colon, or colon in position zero: skip silently
            None => continue,
        };

        ensure!(headers.len() < ctx.max_header_count, ParseFailure::TooManyHeaders);

        let name = &buf[span.name.0..span.name.1];
        let value = &buf[span.value.0..span.value.1];

        if name.eq_ignore_ascii_case(b"content-length") {
            if content_length.is_none() {
                let declared = std::str::from_utf8(value)
                    .ok()
                    .and_then(|v| v.parse::<u64>().ok())
                    .ok_or(ParseFailure::InvalidRequest)?;
                ensure!(
                    declared <= ctx.max_request_body_size as u64,
                    ParseFailure::RequestBodyTooLarge
                );
                content_length = Some(declared as usize);
            }
        } else if name.eq_ignore_ascii_case(b"content-type") {
            content_type = Some(span.value);
        } else if name.eq_ignore_ascii_case(b"connection") && value.eq_ignore_ascii_case(b"close") {
            keep_alive = false;
        }

        headers.push(span);
    }

    let content_length = content_length.unwrap_or(0);
    let body_start = pos;
    if buf.len() - body_start < content_length {
        return Ok(None);
    }

    Ok(Some(Outline {
        method,
        version,
        path,
        query,
        headers,
        content_length,
        content_type,
        keep_alive,
        body_start,
        consumed: body_start + content_length,
    }))
}

/// `METHOD SP target SP HTTP/1.1`, exactly two single-space separators.
fn scan_request_line(
    buf: &[u8],
    (start, end): (usize, usize),
) -> Result<(Method, HttpVersion, (usize, usize), (usize, usize)), ParseFailure> {
    let line = &buf[start..end];

    let sp1 = memchr(b' ', line).ok_or(ParseFailure::InvalidRequest)?;
    let sp2 = memchr(b' ', &line[sp1 + 1..])
        .map(|offset| sp1 + 1 + offset)
        .ok_or(ParseFailure::InvalidRequest)?;

    let version = &line[sp2 + 1..];
    ensure!(
        memchr(b' ', version).is_none() && sp1 != 0 && sp2 > sp1 + 1,
        ParseFailure::InvalidRequest
    );
    let version = HttpVersion::try_from(version)?;

    let method = Method::from_bytes(&line[..sp1])?;

    let target_start = start + sp1 + 1;
    let target_end = start + sp2;
    let (path, query) = match memchr(b'?', &buf[target_start..target_end]) {
        Some(offset) => {
            let question = target_start + offset;
            ((target_start, question), (question + 1, target_end))
        }
        None => ((target_start, target_end), (target_end, target_end)),
    };

    Ok((method, version, path, query))
}

/// `name: value` with both sides trimmed of space and tab. Returns `None`
/// for lines the parser skips.
fn scan_header_line(buf: &[u8], (start, end): (usize, usize)) -> Option<HeaderSpan> {
    let line = &buf[start..end];
    let colon = memchr(b':', line)?;
    if colon == 0 {
        return None;
    }

    let name = trim_span(buf, (start, start + colon));
    let value = trim_span(buf, (start + colon + 1, end));
    Some(HeaderSpan { name, value })
}

fn trim_span(buf: &[u8], (mut start, mut end): (usize, usize)) -> (usize, usize) {
    while start < end && (buf[start] == b' ' || buf[start] == b'\t') {
        start += 1;
    }
    while end > start && (buf[end - 1] == b' ' || buf[end - 1] == b'\t') {
        end -= 1;
    }
    (start, end)
}

/// Copies the outlined request out of the input into a (pooled) value.
/// The body lands in the request's own buffer so the ingress memory can
/// be reclaimed.
fn materialize(buf: &[u8], outline: &Outline, ctx: &ParseContext<'_>) -> Request {
    let mut request = match ctx.pool {
        Some(pool) => pool.acquire(),
        None => Request::new(),
    };

    request.set_method(outline.method);
    request.set_version(outline.version);
    request.set_local_port(ctx.local_port);
    request.set_path(&decode(buf, outline.path));
    request.set_query(&decode(buf, outline.query));
    request.set_content_length(outline.content_length);
    request.set_content_type(outline.content_type.map(|span| decode(buf, span)).as_deref().unwrap_or(""));
    request.set_secure(ctx.secure);
    request.set_remote(ctx.remote);
    request.set_keep_alive(outline.keep_alive);
    for span in &outline.headers {
        request.push_header(decode(buf, span.name).into_owned(), decode(buf, span.value).into_owned());
    }
    request.set_body(&buf[outline.body_start..outline.body_start + outline.content_length]);

    request
}

fn decode(buf: &[u8], (start, end): (usize, usize)) -> std::borrow::Cow<'_, str> {
    String::from_utf8_lossy(&buf[start..end])
}
