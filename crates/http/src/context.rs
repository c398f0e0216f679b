use crate::protocol::{Request, Response};
use crate::service::ServiceScope;

/// The per-request value handed through the middleware chain to the
/// terminal handler: the parsed request, the mutable response, and the
/// request's service scope.
///
/// Contexts are pooled. The dispatch path installs all three parts before
/// the chain runs and strips them again on every exit path, so a pooled
/// context never carries state between requests.
#[derive(Default)]
pub struct HandlerContext {
    request: Option<Request>,
    response: Option<Response>,
    services: Option<ServiceScope>,
}

impl HandlerContext {
    pub fn new() -> Self {
        Default::default()
    }

    /// The parsed request. Panics outside a dispatch, where the context
    /// is always populated.
    pub fn request(&self) -> &Request {
        self.request.as_ref().expect("context used outside a dispatch")
    }

    /// The response under construction. Panics outside a dispatch.
    pub fn response_mut(&mut self) -> &mut Response {
        self.response.as_mut().expect("context used outside a dispatch")
    }

    pub fn response(&self) -> &Response {
        self.response.as_ref().expect("context used outside a dispatch")
    }

    /// The per-request service scope. Panics outside a dispatch.
    pub fn services(&self) -> &ServiceScope {
        self.services.as_ref().expect("context used outside a dispatch")
    }

    /// Populates the context for one dispatch. The engine's connection
    /// loop does this per request; embedders driving the pipeline
    /// directly (or tests) use it the same way.
    pub fn install(&mut self, request: Request, response: Response, services: ServiceScope) {
        self.request = Some(request);
        self.response = Some(response);
        self.services = Some(services);
    }

    pub(crate) fn take_request(&mut self) -> Option<Request> {
        self.request.take()
    }

    pub(crate) fn take_response(&mut self) -> Option<Response> {
        self.response.take()
    }

    pub(crate) fn release_services(&mut self) {
        self.services = None;
    }

    /// Strips whatever is still installed.
    pub(crate) fn clear(&mut self) {
        self.request = None;
        self.response = None;
        self.services = None;
    }
}
