//! The server core: options, listener, accept loop and shutdown.
//!
//! A [`Server`] owns the global pipeline, the route table, the service
//! registrations and the pools. Registration happens before `start`;
//! `start` snapshots everything into shared handles, binds the listener
//! and spawns one connection loop per accepted stream. TLS negotiation is
//! deliberately not performed here: an embedding acceptor terminates TLS
//! and hands the negotiated stream to [`Server::serve_stream`] with the
//! `secure` flag set.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::select;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use brisk_http::connection::{ConnectionConfig, HttpConnection};
use brisk_http::handler::Handler;
use brisk_http::metrics::ServerMetrics;
use brisk_http::pool::Pools;
use brisk_http::protocol::{HttpError, Method};
use brisk_http::service::{ScopeFactory, ServiceProvider, Services};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::pipeline::{Middleware, Pipeline, PipelineBuilder};
use crate::router::Router;

/// Listen backlog of the acceptor.
const LISTEN_BACKLOG: i32 = 1024;

/// Certificate material for an embedding TLS acceptor.
///
/// The core never opens these files; they are carried so the layer that
/// terminates TLS can find them next to the rest of the configuration.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Server configuration.
///
/// Defaults are production-shaped: wildcard bind (dual-stack when the
/// platform allows it), port 80, pooling at 1024 values per pool, metrics
/// on, 100 headers and a 10 MiB body per request.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Bind address; the IPv4 wildcard requests a dual-stack socket.
    pub addr: IpAddr,
    pub port: u16,
    /// Present when the embedding acceptor terminates TLS.
    pub tls: Option<TlsConfig>,
    /// Retention bound of the request/response/context pools.
    pub pool_retention: usize,
    pub metrics_enabled: bool,
    /// Maximum accepted headers per request.
    pub max_header_count: usize,
    /// Maximum declared request body size in bytes.
    pub max_request_body_size: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 80,
            tls: None,
            pool_retention: 1024,
            metrics_enabled: true,
            max_header_count: 100,
            max_request_body_size: 10 * 1024 * 1024,
        }
    }
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("bind {addr}:{port} failed: {source}")]
    Bind { addr: IpAddr, port: u16, source: io::Error },
}

/// The server core: pipeline, route table, services, pools and the
/// acceptor that spawns connection loops.
pub struct Server {
    options: ServerOptions,
    pipeline: PipelineBuilder,
    router: Router,
    services: Services,
    scope_factory: Option<Arc<ScopeFactory>>,
    pools: Arc<Pools>,
    metrics: Arc<ServerMetrics>,
    shutdown: CancellationToken,
}

impl Server {
    pub fn new(options: ServerOptions) -> Self {
        let pools = Arc::new(Pools::new(options.pool_retention));
        Self {
            options,
            pipeline: PipelineBuilder::new(),
            router: Router::new(),
            services: Services::new(),
            scope_factory: None,
            pools,
            metrics: Arc::new(ServerMetrics::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Appends a middleware to the global pipeline; the first registered
    /// is the outermost.
    pub fn use_middleware(&mut self, middleware: impl Middleware + 'static) -> &mut Self {
        self.pipeline.add(middleware);
        self
    }

    /// Registers a route; the last registration for `(method, path)` wins.
    pub fn with_handler(&mut self, method: Method, path: impl Into<String>, handler: impl Handler + 'static) -> &mut Self {
        self.router.insert(method, path, handler);
        self
    }

    /// Registers a process-wide service available from every request scope.
    pub fn register_service<T: Send + Sync + 'static>(&mut self, value: T) -> &mut Self {
        self.services.register(value);
        self
    }

    /// Installs the factory that builds each request's service scope.
    pub fn with_scope_factory(
        &mut self,
        factory: impl Fn(&Services) -> Services + Send + Sync + 'static,
    ) -> &mut Self {
        self.scope_factory = Some(Arc::new(factory));
        self
    }

    /// The server's instrument set.
    pub fn metrics(&self) -> Arc<ServerMetrics> {
        self.metrics.clone()
    }

    /// Stops the listener; in-flight connections drain via cancellation.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Binds, listens and accepts until `token` or [`Server::stop`] fires.
    pub async fn start(&self, token: CancellationToken) -> Result<(), ServerError> {
        let app = self.compose();
        let provider = self.provider();

        let listener = bind_listener(&self.options)
            .map_err(|source| ServerError::Bind { addr: self.options.addr, port: self.options.port, source })?;
        if self.options.tls.is_some() {
            debug!("tls material configured; negotiation is delegated to the embedding acceptor");
        }
        info!(addr = %self.options.addr, port = self.options.port, "listening");

        // one parent for every connection, linked to both cancel sources
        let conn_parent = CancellationToken::new();
        {
            let external = token.clone();
            let shutdown = self.shutdown.clone();
            let conn_parent = conn_parent.clone();
            tokio::spawn(async move {
                select! {
                    _ = external.cancelled() => {}
                    _ = shutdown.cancelled() => {}
                }
                conn_parent.cancel();
            });
        }

        loop {
            let accepted = select! {
                _ = conn_parent.cancelled() => {
                    info!("listener stopped");
                    return Ok(());
                }
                accepted = listener.accept() => accepted,
            };

            let (stream, remote) = match accepted {
                Ok(stream_and_addr) => stream_and_addr,
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    continue;
                }
            };

            let local_port = stream.local_addr().map(|addr| addr.port()).unwrap_or(self.options.port);
            let connection = HttpConnection::new(
                app.clone(),
                self.pools.clone(),
                provider.clone(),
                self.metrics.clone(),
                self.connection_config(false, Some(remote), local_port),
                conn_parent.child_token(),
            );

            let metrics = self.options.metrics_enabled.then(|| self.metrics.clone());
            tokio::spawn(async move {
                if let Some(metrics) = &metrics {
                    metrics.connection_opened();
                }

                let (reader, writer) = stream.into_split();
                match connection.process(reader, writer).await {
                    Ok(()) => debug!("connection finished"),
                    Err(e) => error!("connection failed: {e}"),
                }

                if let Some(metrics) = &metrics {
                    metrics.connection_closed();
                }
            });
        }
    }

    /// Processes one externally-established duplex stream, e.g. a
    /// TLS-terminated connection handed over by an embedding acceptor.
    pub async fn serve_stream<S>(
        &self,
        stream: S,
        secure: bool,
        remote: Option<SocketAddr>,
        local_port: u16,
    ) -> Result<(), HttpError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let connection = HttpConnection::new(
            self.compose(),
            self.pools.clone(),
            self.provider(),
            self.metrics.clone(),
            self.connection_config(secure, remote, local_port),
            self.shutdown.child_token(),
        );

        if self.options.metrics_enabled {
            self.metrics.connection_opened();
        }
        let (reader, writer) = tokio::io::split(stream);
        let result = connection.process(reader, writer).await;
        if self.options.metrics_enabled {
            self.metrics.connection_closed();
        }
        result
    }

    /// Snapshots the pipeline around the route table.
    fn compose(&self) -> Arc<Pipeline> {
        Arc::new(self.pipeline.clone().build(Arc::new(self.router.clone())))
    }

    fn provider(&self) -> ServiceProvider {
        ServiceProvider::new(self.services.clone(), self.scope_factory.clone())
    }

    fn connection_config(&self, secure: bool, remote: Option<SocketAddr>, local_port: u16) -> ConnectionConfig {
        ConnectionConfig {
            secure,
            remote,
            local_port,
            max_header_count: self.options.max_header_count,
            max_request_body_size: self.options.max_request_body_size,
            metrics_enabled: self.options.metrics_enabled,
        }
    }
}

/// Binds the listen socket with the configured backlog.
///
/// The IPv4 wildcard asks for an IPv6 socket with dual-mode enabled so
/// one socket serves both families; platforms that refuse dual-mode fall
/// back to plain IPv4.
fn bind_listener(options: &ServerOptions) -> io::Result<TcpListener> {
    if options.addr == IpAddr::V4(Ipv4Addr::UNSPECIFIED) {
        match bind_socket(IpAddr::V6(Ipv6Addr::UNSPECIFIED), options.port, true) {
            Ok(listener) => return Ok(listener),
            Err(e) => debug!(cause = %e, "dual-stack bind unavailable, falling back to ipv4"),
        }
    }
    bind_socket(options.addr, options.port, false)
}

fn bind_socket(addr: IpAddr, port: u16, dual_stack: bool) -> io::Result<TcpListener> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    if dual_stack {
        socket.set_only_v6(false)?;
    }
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::new(addr, port).into())?;
    socket.listen(LISTEN_BACKLOG)?;
    TcpListener::from_std(socket.into())
}

/// Installs a plain fmt subscriber at the given level. Embedders with
/// their own subscriber simply skip this; a second call is a no-op.
pub fn init_tracing(level: Level) {
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        debug!("tracing subscriber already installed");
    }
}
