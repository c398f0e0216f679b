//! The server surface over the `brisk-http` engine: a composable
//! middleware pipeline, an exact method+path router, and the server core
//! that binds them to a listener.
//!
//! # Example
//!
//! ```no_run
//! use brisk_http::context::HandlerContext;
//! use brisk_http::handler::{BoxError, Handler};
//! use brisk_http::protocol::Method;
//! use brisk_web::{Server, ServerOptions};
//! use async_trait::async_trait;
//! use tokio_util::sync::CancellationToken;
//!
//! struct Hello;
//!
//! #[async_trait]
//! impl Handler for Hello {
//!     async fn call(&self, ctx: &mut HandlerContext, _token: &CancellationToken) -> Result<(), BoxError> {
//!         let response = ctx.response_mut();
//!         response.set_status(200);
//!         response.set_body(b"hello world");
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut server = Server::new(ServerOptions { port: 8080, ..Default::default() });
//!     server.with_handler(Method::Get, "/", Hello);
//!     server.start(CancellationToken::new()).await.unwrap();
//! }
//! ```

pub mod pipeline;
pub mod router;
pub mod server;

pub use pipeline::{Middleware, Next, Pipeline, PipelineBuilder};
pub use router::Router;
pub use server::{init_tracing, Server, ServerError, ServerOptions, TlsConfig};

pub use brisk_http::context::HandlerContext;
pub use brisk_http::handler::{handler_fn, BoxError, Handler};
pub use brisk_http::protocol::Method;
