//! The connection loop.
//!
//! Each connection runs as two cooperating tasks joined by a bounded byte
//! pipe: the *ingress filler* moves bytes from the stream into the pipe,
//! the *request processor* drains the pipe, parses requests and drives the
//! application. Requests on one connection are strictly sequential:
//! request N is parsed, dispatched and fully written before request N+1 is
//! parsed. Parallelism lives across connections, not inside one.
//!
//! Teardown is processor-led: whatever ends the connection (parser fatal,
//! `Connection: close`, an unframeable body, stream EOF, cancellation or a
//! handler error), the processor finishes first, cancels the filler
//! through the connection token, awaits it, then shuts the egress down.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::select;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::codec::request_parser::{parse, ParseContext, ParseResult};
use crate::codec::response_writer::ResponseWriter;
use crate::context::HandlerContext;
use crate::handler::Handler;
use crate::metrics::{ErrorLabels, RequestLabels, ServerMetrics};
use crate::pool::Pools;
use crate::protocol::{HttpError, ParseFailure, Request, Response};
use crate::service::ServiceProvider;

/// Minimum size of one pipe-owned ingress segment.
const INGRESS_SEGMENT_SIZE: usize = 4 * 1024;

/// Bound of the ingress pipe, in segments.
const INGRESS_PIPE_DEPTH: usize = 16;

/// Per-connection inputs that do not change across its requests.
pub struct ConnectionConfig {
    /// Whether the transport under this connection is secured.
    pub secure: bool,
    /// Remote endpoint, when known.
    pub remote: Option<SocketAddr>,
    /// Port of the accepting endpoint.
    pub local_port: u16,
    pub max_header_count: usize,
    pub max_request_body_size: usize,
    pub metrics_enabled: bool,
}

/// The per-connection state machine.
///
/// Owns nothing of the transport: the caller splits the duplex stream and
/// hands both halves to [`HttpConnection::process`], then closes the
/// stream when it returns.
pub struct HttpConnection<H> {
    app: Arc<H>,
    pools: Arc<Pools>,
    services: ServiceProvider,
    metrics: Arc<ServerMetrics>,
    config: ConnectionConfig,
    token: CancellationToken,
    writer_state: ResponseWriter,
}

impl<H> HttpConnection<H>
where
    H: Handler,
{
    pub fn new(
        app: Arc<H>,
        pools: Arc<Pools>,
        services: ServiceProvider,
        metrics: Arc<ServerMetrics>,
        config: ConnectionConfig,
        token: CancellationToken,
    ) -> Self {
        Self { app, pools, services, metrics, config, token, writer_state: ResponseWriter::new() }
    }

    /// Processes every request the connection carries, then returns.
    ///
    /// Errors are reported for logging only; by the time this returns the
    /// filler is stopped and the egress is flushed and shut down.
    pub async fn process<R, W>(mut self, reader: R, mut writer: W) -> Result<(), HttpError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Unpin,
    {
        let (ingress_tx, ingress_rx) = mpsc::channel(INGRESS_PIPE_DEPTH);
        let filler = tokio::spawn(fill_ingress(reader, ingress_tx, self.token.clone()));

        let result = self.process_requests(ingress_rx, &mut writer).await;

        // processor first, then the filler, then the egress
        self.token.cancel();
        let _ = filler.await;
        let _ = writer.shutdown().await;

        result
    }

    async fn process_requests<W>(
        &mut self,
        mut ingress: mpsc::Receiver<Result<Bytes, io::Error>>,
        writer: &mut W,
    ) -> Result<(), HttpError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut buffer = BytesMut::with_capacity(2 * INGRESS_SEGMENT_SIZE);

        loop {
            let parse_context = ParseContext {
                secure: self.config.secure,
                remote: self.config.remote,
                local_port: self.config.local_port,
                pool: Some(&self.pools.requests),
                max_header_count: self.config.max_header_count,
                max_request_body_size: self.config.max_request_body_size,
            };

            match parse(&mut buffer, &parse_context) {
                ParseResult::Success { request, keep_alive } => {
                    let keep_alive = self.dispatch(request, keep_alive, writer).await?;
                    if !keep_alive {
                        return Ok(());
                    }
                }

                ParseResult::Incomplete => {
                    let chunk = select! {
                        _ = self.token.cancelled() => return Ok(()),
                        chunk = ingress.recv() => chunk,
                    };
                    match chunk {
                        Some(Ok(bytes)) => buffer.extend_from_slice(&bytes),
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            if !buffer.is_empty() {
                                debug!(pending = buffer.len(), "connection closed mid-request");
                            }
                            return Ok(());
                        }
                    }
                }

                ParseResult::Failed(failure) => {
                    debug!(%failure, "rejecting request stream");
                    self.reject(failure, writer).await;
                    return Err(failure.into());
                }
            }
        }
    }

    /// Runs one parsed request through the application and writes the
    /// response. Returns the effective keep-alive.
    async fn dispatch<W>(&mut self, request: Request, keep_alive: bool, writer: &mut W) -> Result<bool, HttpError>
    where
        W: AsyncWrite + Unpin,
    {
        let method = request.method();
        let secure = request.secure();
        let request_bytes = request.content_length() as u64;

        let response = self.pools.responses.acquire();
        let mut ctx = self.pools.contexts.acquire();
        ctx.install(request, response, self.services.create_scope());

        let started = self.config.metrics_enabled.then(Instant::now);

        let called = select! {
            _ = self.token.cancelled() => None,
            result = self.app.call(&mut ctx, &self.token) => Some(result),
        };

        match called {
            Some(Ok(())) => {
                // the request is done with: back to its pool before the write
                if let Some(request) = ctx.take_request() {
                    self.pools.requests.release(request);
                }

                let mut response = ctx.take_response().unwrap_or_default();
                let status = response.status();

                let written = select! {
                    _ = self.token.cancelled() => None,
                    outcome = self.writer_state.write(&mut response, keep_alive, writer) => Some(outcome),
                };
                let outcome = match written {
                    Some(Ok(outcome)) => Some(outcome),
                    Some(Err(e)) => {
                        self.recycle(ctx, Some(response));
                        return Err(e.into());
                    }
                    None => None,
                };

                if let (Some(started), Some(outcome)) = (started, &outcome) {
                    let labels =
                        RequestLabels { method, status, secure, keep_alive: outcome.keep_alive };
                    self.metrics.record_request(labels, started.elapsed(), request_bytes, outcome.body_bytes);
                }

                self.recycle(ctx, Some(response));
                Ok(outcome.map(|o| o.keep_alive).unwrap_or(false))
            }

            Some(Err(e)) => {
                if self.config.metrics_enabled {
                    self.metrics.record_error(ErrorLabels { method, secure });
                }
                self.recycle(ctx, None);
                Err(HttpError::handler(e))
            }

            // cancelled mid-handler: close quietly, pools still settled
            None => {
                self.recycle(ctx, None);
                Ok(false)
            }
        }
    }

    /// Returns every pooled value still held by the context, releasing
    /// the service scope first.
    fn recycle(&self, mut ctx: HandlerContext, response: Option<Response>) {
        ctx.release_services();
        if let Some(request) = ctx.take_request() {
            self.pools.requests.release(request);
        }
        if let Some(response) = response.or_else(|| ctx.take_response()) {
            self.pools.responses.release(response);
        }
        self.pools.contexts.release(ctx);
    }

    /// Best-effort minimal error response before closing on a protocol
    /// fault. Failures here are irrelevant: the connection is going down.
    async fn reject<W>(&mut self, failure: ParseFailure, writer: &mut W)
    where
        W: AsyncWrite + Unpin,
    {
        let mut response = self.pools.responses.acquire();
        match failure {
            ParseFailure::RequestBodyTooLarge => {
                response.set_status(413);
                response.set_reason("Payload Too Large");
            }
            ParseFailure::TooManyHeaders | ParseFailure::HeaderLineTooLong => {
                response.set_status(431);
                response.set_reason("Request Header Fields Too Large");
            }
            _ => {
                response.set_status(400);
            }
        }

        let rejected = select! {
            _ = self.token.cancelled() => Ok(None),
            outcome = self.writer_state.write(&mut response, false, writer) => outcome.map(Some),
        };
        if let Err(e) = rejected {
            trace!("failed to write reject response: {e}");
        }
        self.pools.responses.release(response);
    }
}

/// The ingress filler: moves stream bytes into pipe-owned segments until
/// end-of-input, pipe closure or cancellation. Read errors are forwarded
/// into the pipe so the processor observes them in order.
async fn fill_ingress<R>(mut reader: R, pipe: mpsc::Sender<Result<Bytes, io::Error>>, token: CancellationToken)
where
    R: AsyncRead + Unpin,
{
    loop {
        let mut segment = BytesMut::with_capacity(INGRESS_SEGMENT_SIZE);
        let read = select! {
            _ = token.cancelled() => return,
            read = reader.read_buf(&mut segment) => read,
        };

        match read {
            Ok(0) => return,
            Ok(n) => {
                trace!(bytes = n, "ingress segment filled");
                if pipe.send(Ok(segment.freeze())).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                error!("ingress read failed: {e}");
                let _ = pipe.send(Err(e)).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::BoxError;
    use crate::protocol::Method;
    use crate::service::Services;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::AsyncWriteExt;

    struct EchoPath;

    #[async_trait]
    impl Handler for EchoPath {
        async fn call(&self, ctx: &mut HandlerContext, _token: &CancellationToken) -> Result<(), BoxError> {
            let path = ctx.request().path().to_owned();
            let response = ctx.response_mut();
            response.set_status(200);
            response.set_body(path.as_bytes());
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Handler for Failing {
        async fn call(&self, _ctx: &mut HandlerContext, _token: &CancellationToken) -> Result<(), BoxError> {
            Err("boom".into())
        }
    }

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            secure: false,
            remote: Some("127.0.0.1:4321".parse().unwrap()),
            local_port: 80,
            max_header_count: 100,
            max_request_body_size: 10 * 1024 * 1024,
            metrics_enabled: true,
        }
    }

    fn connection<H: Handler>(app: H) -> (HttpConnection<H>, Arc<ServerMetrics>) {
        let metrics = Arc::new(ServerMetrics::new());
        let connection = HttpConnection::new(
            Arc::new(app),
            Arc::new(Pools::default()),
            ServiceProvider::new(Services::new(), None),
            metrics.clone(),
            config(),
            CancellationToken::new(),
        );
        (connection, metrics)
    }

    /// Runs a connection against a scripted client and returns everything
    /// the server wrote.
    async fn run_against<H: Handler + 'static>(app: H, client_bytes: &[u8]) -> (Vec<u8>, Result<(), HttpError>) {
        let (connection, _metrics) = connection(app);
        run_connection(connection, client_bytes).await
    }

    async fn run_connection<H: Handler + 'static>(
        connection: HttpConnection<H>,
        client_bytes: &[u8],
    ) -> (Vec<u8>, Result<(), HttpError>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let (mut client_read, mut client_write) = tokio::io::split(client);

        let client_bytes = client_bytes.to_vec();
        let driver = tokio::spawn(async move {
            client_write.write_all(&client_bytes).await.unwrap();
            client_write.shutdown().await.unwrap();
            let mut received = Vec::new();
            client_read.read_to_end(&mut received).await.unwrap();
            received
        });

        let result = connection.process(server_read, server_write).await;
        let received = driver.await.unwrap();
        (received, result)
    }

    #[tokio::test]
    async fn keep_alive_pipelining_processes_in_order() {
        let input = b"GET /a HTTP/1.1\r\nHost: x\r\n\r\nGET /b HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n";
        let (received, result) = run_against(EchoPath, input).await;
        let wire = String::from_utf8(received).unwrap();

        assert!(result.is_ok());
        let first = wire.find("\r\n\r\n/a").expect("first response body");
        let second = wire.find("\r\n\r\n/b").expect("second response body");
        assert!(first < second);
        assert!(wire.contains("Connection: keep-alive"));
        assert!(wire.contains("Connection: close"));
    }

    #[tokio::test]
    async fn parse_failure_answers_with_minimal_response_and_closes() {
        let input = b"BREW /coffee HTTP/1.1\r\n\r\n";
        let (received, result) = run_against(EchoPath, input).await;
        let wire = String::from_utf8(received).unwrap();

        assert!(matches!(result, Err(HttpError::RequestError { .. })));
        assert!(wire.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(wire.contains("Connection: close"));
    }

    #[tokio::test]
    async fn body_over_limit_answers_413() {
        let (connection, _metrics) = connection(EchoPath);
        let mut connection = connection;
        connection.config.max_request_body_size = 16;
        let input = b"POST / HTTP/1.1\r\nContent-Length: 64\r\n\r\n";
        let (received, result) = run_connection(connection, input).await;
        let wire = String::from_utf8(received).unwrap();

        assert!(matches!(result, Err(HttpError::RequestError { source: ParseFailure::RequestBodyTooLarge })));
        assert!(wire.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
    }

    #[tokio::test]
    async fn handler_error_drops_connection_without_response() {
        let input = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n";
        let (received, result) = run_against(Failing, input).await;

        assert!(matches!(result, Err(HttpError::HandlerError { .. })));
        assert!(received.is_empty(), "no bytes reach the client on a handler fault");
    }

    #[tokio::test]
    async fn handler_error_records_error_metric() {
        let (connection, metrics) = connection(Failing);
        let input = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n";
        let _ = run_connection(connection, input).await;

        assert_eq!(metrics.error_count(ErrorLabels { method: Method::Get, secure: false }), 1);
    }

    #[tokio::test]
    async fn request_metrics_are_tagged() {
        let (connection, metrics) = connection(EchoPath);
        let input = b"GET /a HTTP/1.1\r\nConnection: close\r\n\r\n";
        let _ = run_connection(connection, input).await;

        let labels = RequestLabels { method: Method::Get, status: 200, secure: false, keep_alive: false };
        assert_eq!(metrics.request_count(labels), 1);
        assert_eq!(metrics.response_body_bytes(), 2);
    }

    #[tokio::test]
    async fn fragmented_request_is_reassembled() {
        struct CountCalls(Arc<AtomicUsize>);

        #[async_trait]
        impl Handler for CountCalls {
            async fn call(&self, ctx: &mut HandlerContext, _token: &CancellationToken) -> Result<(), BoxError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                assert_eq!(ctx.request().body(), b"hello");
                ctx.response_mut().set_status(200);
                Ok(())
            }
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let (connection, _metrics) = connection(CountCalls(calls.clone()));

        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let (mut client_read, mut client_write) = tokio::io::split(client);

        let driver = tokio::spawn(async move {
            let input: &[u8] = b"POST / HTTP/1.1\r\nConnection: close\r\nContent-Length: 5\r\n\r\nhello";
            for chunk in input.chunks(7) {
                client_write.write_all(chunk).await.unwrap();
                client_write.flush().await.unwrap();
                tokio::task::yield_now().await;
            }
            client_write.shutdown().await.unwrap();
            let mut received = Vec::new();
            client_read.read_to_end(&mut received).await.unwrap();
            received
        });

        let result = connection.process(server_read, server_write).await;
        let received = driver.await.unwrap();

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(String::from_utf8(received).unwrap().starts_with("HTTP/1.1 200 OK\r\n"));
    }

    #[tokio::test]
    async fn cancellation_stops_the_connection() {
        struct Hang;

        #[async_trait]
        impl Handler for Hang {
            async fn call(&self, _ctx: &mut HandlerContext, token: &CancellationToken) -> Result<(), BoxError> {
                token.cancelled().await;
                Err("cancelled".into())
            }
        }

        let (connection, _metrics) = connection(Hang);
        let token = connection.token.clone();

        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let (mut client_read, mut client_write) = tokio::io::split(client);

        let driver = tokio::spawn(async move {
            client_write.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            token.cancel();
            let mut received = Vec::new();
            let _ = client_read.read_to_end(&mut received).await;
            received
        });

        let result = connection.process(server_read, server_write).await;
        let received = driver.await.unwrap();

        assert!(result.is_ok(), "cancellation is a clean close");
        assert!(received.is_empty());
    }
}
