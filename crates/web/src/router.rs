//! Exact method+path routing.
//!
//! One map per supported method; a later registration for the same route
//! replaces the earlier one. The router is the default terminal of the
//! pipeline: a miss is not an error but a `404 Not Found` response on the
//! normal path.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use brisk_http::context::HandlerContext;
use brisk_http::handler::{BoxError, Handler};
use brisk_http::protocol::{Method, METHOD_COUNT};

const NOT_FOUND: &str = "Not Found";

/// The route table: seven independent exact-path maps.
#[derive(Default, Clone)]
pub struct Router {
    tables: [HashMap<String, Arc<dyn Handler>>; METHOD_COUNT],
}

impl Router {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers a handler for `(method, path)`; the last registration
    /// for a route wins.
    pub fn insert(&mut self, method: Method, path: impl Into<String>, handler: impl Handler + 'static) {
        self.tables[method.index()].insert(path.into(), Arc::new(handler));
    }

    pub fn is_empty(&self) -> bool {
        self.tables.iter().all(|table| table.is_empty())
    }

    fn lookup(&self, method: Method, path: &str) -> Option<Arc<dyn Handler>> {
        self.tables[method.index()].get(path).cloned()
    }
}

#[async_trait]
impl Handler for Router {
    async fn call(&self, ctx: &mut HandlerContext, token: &CancellationToken) -> Result<(), BoxError> {
        let handler = {
            let request = ctx.request();
            self.lookup(request.method(), request.path())
        };

        match handler {
            Some(handler) => handler.call(ctx, token).await,
            None => {
                let response = ctx.response_mut();
                response.set_status(404);
                response.set_reason(NOT_FOUND);
                response.set_body(NOT_FOUND.as_bytes());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brisk_http::codec::{parse, ParseContext, ParseResult};
    use brisk_http::protocol::{Request, Response};
    use brisk_http::service::{ServiceProvider, Services};
    use bytes::BytesMut;

    struct Tag(&'static str);

    #[async_trait]
    impl Handler for Tag {
        async fn call(&self, ctx: &mut HandlerContext, _token: &CancellationToken) -> Result<(), BoxError> {
            let response = ctx.response_mut();
            response.set_status(200);
            response.set_body(self.0.as_bytes());
            Ok(())
        }
    }

    /// Requests are fabricated the way the engine does it: through the
    /// parser.
    fn request_for(method: Method, path: &str) -> Request {
        let raw = format!("{} {} HTTP/1.1\r\nHost: test\r\n\r\n", method.as_str(), path);
        let mut buf = BytesMut::from(raw.as_str());
        let parse_context = ParseContext {
            secure: false,
            remote: None,
            local_port: 80,
            pool: None,
            max_header_count: 100,
            max_request_body_size: 1024,
        };
        match parse(&mut buf, &parse_context) {
            ParseResult::Success { request, .. } => request,
            _ => panic!("fixture request must parse"),
        }
    }

    fn context_for(method: Method, path: &str) -> HandlerContext {
        let mut ctx = HandlerContext::new();
        let provider = ServiceProvider::new(Services::new(), None);
        ctx.install(request_for(method, path), Response::new(), provider.create_scope());
        ctx
    }

    #[tokio::test]
    async fn each_method_dispatches_independently() {
        let methods = [
            Method::Get,
            Method::Post,
            Method::Put,
            Method::Delete,
            Method::Head,
            Method::Patch,
            Method::Options,
        ];

        let mut router = Router::new();
        for method in methods {
            router.insert(method, "/p", Tag(method.as_str()));
        }

        for method in methods {
            let mut ctx = context_for(method, "/p");
            router.call(&mut ctx, &CancellationToken::new()).await.unwrap();
            assert_eq!(ctx.response().status(), 200);
            assert_eq!(ctx.response().body(), method.as_str().as_bytes());
        }
    }

    #[tokio::test]
    async fn miss_is_a_plain_not_found_response() {
        let mut router = Router::new();
        router.insert(Method::Get, "/present", Tag("present"));

        for (method, path) in [(Method::Get, "/absent"), (Method::Post, "/present")] {
            let mut ctx = context_for(method, path);
            let result = router.call(&mut ctx, &CancellationToken::new()).await;

            assert!(result.is_ok(), "a miss is not an error");
            assert_eq!(ctx.response().status(), 404);
            assert_eq!(ctx.response().reason(), "Not Found");
            assert_eq!(ctx.response().body(), b"Not Found");
        }
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let mut router = Router::new();
        router.insert(Method::Get, "/p", Tag("first"));
        router.insert(Method::Get, "/p", Tag("second"));

        let mut ctx = context_for(Method::Get, "/p");
        router.call(&mut ctx, &CancellationToken::new()).await.unwrap();
        assert_eq!(ctx.response().body(), b"second");
    }

    #[tokio::test]
    async fn matching_is_exact() {
        let mut router = Router::new();
        router.insert(Method::Get, "/p", Tag("p"));

        for path in ["/p/", "/P", "/p/x", "/"] {
            let mut ctx = context_for(Method::Get, path);
            router.call(&mut ctx, &CancellationToken::new()).await.unwrap();
            assert_eq!(ctx.response().status(), 404, "{path:?} must not match");
        }
    }
}
