use std::net::SocketAddr;

use crate::protocol::{HttpVersion, Method};

/// A reusable HTTP/1.1 request value.
///
/// The parser populates every field on success; [`Request::reset`] returns
/// the value to parser defaults so it can go back to the pool without
/// leaking the previous request's headers or body. Header names and values
/// are stored as ASCII strings in insertion order.
#[derive(Debug)]
pub struct Request {
    method: Method,
    local_port: u16,
    path: String,
    query: String,
    version: HttpVersion,
    headers: Vec<(String, String)>,
    content_length: usize,
    content_type: String,
    secure: bool,
    remote: Option<SocketAddr>,
    keep_alive: bool,
    body: Vec<u8>,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            method: Method::Get,
            local_port: 0,
            path: String::from("/"),
            query: String::new(),
            version: HttpVersion::Http1_1,
            headers: Vec::new(),
            content_length: 0,
            content_type: String::new(),
            secure: false,
            remote: None,
            keep_alive: true,
            body: Vec::new(),
        }
    }
}

impl Request {
    pub fn new() -> Self {
        Default::default()
    }

    /// Returns the value to parser defaults, keeping allocations.
    ///
    /// Headers and body are cleared so a pooled value never exposes data
    /// from an earlier request.
    pub fn reset(&mut self) {
        self.method = Method::Get;
        self.local_port = 0;
        self.path.clear();
        self.path.push('/');
        self.query.clear();
        self.version = HttpVersion::Http1_1;
        self.headers.clear();
        self.content_length = 0;
        self.content_type.clear();
        self.secure = false;
        self.remote = None;
        self.keep_alive = true;
        self.body.clear();
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn version(&self) -> HttpVersion {
        self.version
    }

    /// All header pairs in insertion order.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// First header value whose name matches case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_length(&self) -> usize {
        self.content_length
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// True when the transport under this request is secured (TLS).
    pub fn secure(&self) -> bool {
        self.secure
    }

    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    /// Whether the client asked to keep the connection open.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// Field installation used by the parser when it finalises a request.
/// Not part of the public surface.
impl Request {
    pub(crate) fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    pub(crate) fn set_local_port(&mut self, port: u16) {
        self.local_port = port;
    }

    pub(crate) fn set_path(&mut self, path: &str) {
        self.path.clear();
        self.path.push_str(path);
    }

    pub(crate) fn set_query(&mut self, query: &str) {
        self.query.clear();
        self.query.push_str(query);
    }

    pub(crate) fn set_version(&mut self, version: HttpVersion) {
        self.version = version;
    }

    pub(crate) fn push_header(&mut self, name: String, value: String) {
        self.headers.push((name, value));
    }

    pub(crate) fn set_content_length(&mut self, content_length: usize) {
        self.content_length = content_length;
    }

    pub(crate) fn set_content_type(&mut self, content_type: &str) {
        self.content_type.clear();
        self.content_type.push_str(content_type);
    }

    pub(crate) fn set_secure(&mut self, secure: bool) {
        self.secure = secure;
    }

    pub(crate) fn set_remote(&mut self, remote: Option<SocketAddr>) {
        self.remote = remote;
    }

    pub(crate) fn set_keep_alive(&mut self, keep_alive: bool) {
        self.keep_alive = keep_alive;
    }

    pub(crate) fn set_body(&mut self, body: &[u8]) {
        self.body.clear();
        self.body.extend_from_slice(body);
    }
}
