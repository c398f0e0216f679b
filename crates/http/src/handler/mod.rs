use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::context::HandlerContext;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The application seam of the engine: anything that turns a populated
/// context into a completed response.
///
/// The connection loop drives a `Handler` per parsed request; the web
/// layer's composed middleware pipeline, its router and individual route
/// handlers all implement this one trait.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, ctx: &mut HandlerContext, token: &CancellationToken) -> Result<(), BoxError>;
}

/// Adapts a plain function to a [`Handler`].
#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

#[async_trait]
impl<F> Handler for HandlerFn<F>
where
    F: for<'a> Fn(&'a mut HandlerContext, &'a CancellationToken) -> BoxFuture<'a, Result<(), BoxError>>,
    F: Send + Sync,
{
    async fn call(&self, ctx: &mut HandlerContext, token: &CancellationToken) -> Result<(), BoxError> {
        (self.f)(ctx, token).await
    }
}

pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: for<'a> Fn(&'a mut HandlerContext, &'a CancellationToken) -> BoxFuture<'a, Result<(), BoxError>>,
    F: Send + Sync,
{
    HandlerFn { f }
}
