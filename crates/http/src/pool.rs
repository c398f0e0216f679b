//! Bounded object pools for the per-request values.
//!
//! Acquire always succeeds: an empty pool allocates a fresh value. Return
//! is best-effort: the value is recycled first and silently dropped when
//! the pool is at its retention bound. The queues are multi-producer,
//! multi-consumer, so pools can be shared across connection tasks.

use crossbeam::queue::ArrayQueue;

use crate::context::HandlerContext;
use crate::protocol::{Request, Response};

/// Default retention bound per pool.
pub const DEFAULT_RETENTION: usize = 1024;

/// Implemented by values that can live in a [`Pool`].
pub trait Recycle: Default {
    /// Returns the value to its pristine state, keeping allocations.
    fn recycle(&mut self);
}

impl Recycle for Request {
    fn recycle(&mut self) {
        self.reset();
    }
}

impl Recycle for Response {
    fn recycle(&mut self) {
        self.reset();
    }
}

impl Recycle for HandlerContext {
    fn recycle(&mut self) {
        self.clear();
    }
}

/// A bounded pool of reusable values.
pub struct Pool<T: Recycle> {
    queue: ArrayQueue<T>,
}

impl<T: Recycle> Pool<T> {
    pub fn new(retention: usize) -> Self {
        Self { queue: ArrayQueue::new(retention.max(1)) }
    }

    /// Pops a pooled value or allocates a fresh one.
    pub fn acquire(&self) -> T {
        self.queue.pop().unwrap_or_default()
    }

    /// Recycles the value and offers it back; drops it when full.
    pub fn release(&self, mut value: T) {
        value.recycle();
        let _ = self.queue.push(value);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.queue.len()
    }
}

/// The three pools a server shares across its connections.
pub struct Pools {
    pub requests: Pool<Request>,
    pub responses: Pool<Response>,
    pub contexts: Pool<HandlerContext>,
}

impl Pools {
    pub fn new(retention: usize) -> Self {
        Self {
            requests: Pool::new(retention),
            responses: Pool::new(retention),
            contexts: Pool::new(retention),
        }
    }
}

impl Default for Pools {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}
