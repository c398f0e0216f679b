//! The middleware pipeline.
//!
//! A middleware wraps everything registered after it plus the terminal:
//! the first registered is the outermost layer. Control moves inward only
//! when a middleware calls [`Next::run`]; not calling it short-circuits
//! the chain and the terminal never runs. The built [`Pipeline`] is
//! itself a [`Handler`], so an empty pipeline is just the terminal.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use brisk_http::context::HandlerContext;
use brisk_http::handler::{BoxError, Handler};

/// One layer of the pipeline.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(
        &self,
        ctx: &mut HandlerContext,
        next: Next<'_>,
        token: &CancellationToken,
    ) -> Result<(), BoxError>;
}

/// The remainder of the chain after the current middleware.
pub struct Next<'a> {
    rest: &'a [Arc<dyn Middleware>],
    terminal: &'a dyn Handler,
}

impl<'a> Next<'a> {
    /// Passes control to the next inner layer.
    pub async fn run(self, ctx: &mut HandlerContext, token: &CancellationToken) -> Result<(), BoxError> {
        match self.rest.split_first() {
            Some((middleware, rest)) => {
                middleware.handle(ctx, Next { rest, terminal: self.terminal }, token).await
            }
            None => self.terminal.call(ctx, token).await,
        }
    }
}

/// Append-only middleware registration; [`PipelineBuilder::build`]
/// composes the chain around a terminal.
#[derive(Default, Clone)]
pub struct PipelineBuilder {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    /// Appends a middleware; registration order is outermost-first.
    pub fn add(&mut self, middleware: impl Middleware + 'static) {
        self.middlewares.push(Arc::new(middleware));
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    pub fn build(self, terminal: Arc<dyn Handler>) -> Pipeline {
        Pipeline { middlewares: self.middlewares.into(), terminal }
    }
}

/// The composed chain: a single callable over context and token.
pub struct Pipeline {
    middlewares: Arc<[Arc<dyn Middleware>]>,
    terminal: Arc<dyn Handler>,
}

#[async_trait]
impl Handler for Pipeline {
    async fn call(&self, ctx: &mut HandlerContext, token: &CancellationToken) -> Result<(), BoxError> {
        Next { rest: &self.middlewares, terminal: self.terminal.as_ref() }.run(ctx, token).await
    }
}
