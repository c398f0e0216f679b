//! In-process measurement instruments for the server.
//!
//! The engine records; export is the embedder's job via the snapshot
//! accessors. All instruments are atomics, so recording never fails and
//! never blocks the request path. Tagged instruments live in a map that
//! takes its write lock only the first time a tag combination shows up;
//! steady-state recording is a read-lock and a couple of atomic adds.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::protocol::Method;

/// Name prefix shared by every instrument of the engine.
pub const METER_GROUP: &str = "brisk.http.server";

/// Millisecond bucket upper bounds of the request-duration histogram;
/// an implicit overflow bucket follows the last bound.
pub const DURATION_BUCKETS_MS: [u64; 10] = [1, 2, 5, 10, 25, 50, 100, 250, 500, 1000];

/// Tag set for the request counter and duration histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestLabels {
    pub method: Method,
    pub status: u16,
    pub secure: bool,
    pub keep_alive: bool,
}

impl RequestLabels {
    pub fn scheme(&self) -> &'static str {
        if self.secure {
            "https"
        } else {
            "http"
        }
    }
}

/// Tag set for the request-error counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorLabels {
    pub method: Method,
    pub secure: bool,
}

#[derive(Default)]
struct RequestRecord {
    count: AtomicU64,
    duration_sum_micros: AtomicU64,
    duration_buckets: [AtomicU64; DURATION_BUCKETS_MS.len() + 1],
}

impl RequestRecord {
    fn observe(&self, elapsed: Duration) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.duration_sum_micros.fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);

        let millis = elapsed.as_millis() as u64;
        let slot = DURATION_BUCKETS_MS
            .iter()
            .position(|&bound| millis <= bound)
            .unwrap_or(DURATION_BUCKETS_MS.len());
        self.duration_buckets[slot].fetch_add(1, Ordering::Relaxed);
    }
}

/// The instrument set of one server instance.
pub struct ServerMetrics {
    open_connections: AtomicI64,
    request_body_bytes: AtomicU64,
    response_body_bytes: AtomicU64,
    requests: RwLock<HashMap<RequestLabels, Arc<RequestRecord>>>,
    errors: RwLock<HashMap<ErrorLabels, Arc<AtomicU64>>>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            open_connections: AtomicI64::new(0),
            request_body_bytes: AtomicU64::new(0),
            response_body_bytes: AtomicU64::new(0),
            requests: RwLock::new(HashMap::new()),
            errors: RwLock::new(HashMap::new()),
        }
    }

    pub fn connection_opened(&self) {
        self.open_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.open_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Records one completed request: count, duration, body volumes.
    pub fn record_request(&self, labels: RequestLabels, elapsed: Duration, request_bytes: u64, response_bytes: u64) {
        self.request_body_bytes.fetch_add(request_bytes, Ordering::Relaxed);
        self.response_body_bytes.fetch_add(response_bytes, Ordering::Relaxed);
        self.request_record(labels).observe(elapsed);
    }

    /// Records a request that failed in the middleware chain or handler.
    pub fn record_error(&self, labels: ErrorLabels) {
        let counter = {
            let errors = self.errors.read().unwrap_or_else(std::sync::PoisonError::into_inner);
            errors.get(&labels).cloned()
        };
        let counter = counter.unwrap_or_else(|| {
            let mut errors = self.errors.write().unwrap_or_else(std::sync::PoisonError::into_inner);
            errors.entry(labels).or_default().clone()
        });
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn request_record(&self, labels: RequestLabels) -> Arc<RequestRecord> {
        {
            let requests = self.requests.read().unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(record) = requests.get(&labels) {
                return record.clone();
            }
        }
        let mut requests = self.requests.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        requests.entry(labels).or_default().clone()
    }

    /// Currently open connections.
    pub fn open_connections(&self) -> i64 {
        self.open_connections.load(Ordering::Relaxed)
    }

    pub fn request_body_bytes(&self) -> u64 {
        self.request_body_bytes.load(Ordering::Relaxed)
    }

    pub fn response_body_bytes(&self) -> u64 {
        self.response_body_bytes.load(Ordering::Relaxed)
    }

    /// Requests observed for one tag combination.
    pub fn request_count(&self, labels: RequestLabels) -> u64 {
        self.requests
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&labels)
            .map(|record| record.count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Mean request duration for one tag combination.
    pub fn average_duration(&self, labels: RequestLabels) -> Duration {
        let requests = self.requests.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(record) = requests.get(&labels) else {
            return Duration::ZERO;
        };
        let count = record.count.load(Ordering::Relaxed);
        if count == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(record.duration_sum_micros.load(Ordering::Relaxed) / count)
        }
    }

    /// Duration histogram (per-bucket counts) for one tag combination.
    pub fn duration_buckets(&self, labels: RequestLabels) -> [u64; DURATION_BUCKETS_MS.len() + 1] {
        let requests = self.requests.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut snapshot = [0; DURATION_BUCKETS_MS.len() + 1];
        if let Some(record) = requests.get(&labels) {
            for (slot, bucket) in record.duration_buckets.iter().enumerate() {
                snapshot[slot] = bucket.load(Ordering::Relaxed);
            }
        }
        snapshot
    }

    pub fn error_count(&self, labels: ErrorLabels) -> u64 {
        self.errors
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&labels)
            .map(|counter| counter.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> RequestLabels {
        RequestLabels { method: Method::Get, status: 200, secure: false, keep_alive: true }
    }

    #[test]
    fn open_connections_is_up_down() {
        let metrics = ServerMetrics::new();
        metrics.connection_opened();
        metrics.connection_opened();
        metrics.connection_closed();
        assert_eq!(metrics.open_connections(), 1);
    }

    #[test]
    fn request_recording_accumulates() {
        let metrics = ServerMetrics::new();
        metrics.record_request(labels(), Duration::from_millis(4), 10, 100);
        metrics.record_request(labels(), Duration::from_millis(8), 5, 50);

        assert_eq!(metrics.request_count(labels()), 2);
        assert_eq!(metrics.request_body_bytes(), 15);
        assert_eq!(metrics.response_body_bytes(), 150);
        assert_eq!(metrics.average_duration(labels()), Duration::from_millis(6));

        let buckets = metrics.duration_buckets(labels());
        // 4ms lands in the <=5ms bucket, 8ms in the <=10ms bucket
        assert_eq!(buckets[2], 1);
        assert_eq!(buckets[3], 1);
    }

    #[test]
    fn tag_combinations_are_independent() {
        let metrics = ServerMetrics::new();
        let https = RequestLabels { secure: true, ..labels() };
        metrics.record_request(labels(), Duration::from_millis(1), 0, 0);
        metrics.record_request(https, Duration::from_millis(1), 0, 0);
        metrics.record_request(https, Duration::from_millis(1), 0, 0);

        assert_eq!(metrics.request_count(labels()), 1);
        assert_eq!(metrics.request_count(https), 2);
        assert_eq!(labels().scheme(), "http");
        assert_eq!(https.scheme(), "https");
    }

    #[test]
    fn errors_are_tagged_by_method_and_scheme() {
        let metrics = ServerMetrics::new();
        let labels = ErrorLabels { method: Method::Post, secure: false };
        metrics.record_error(labels);
        metrics.record_error(labels);
        assert_eq!(metrics.error_count(labels), 2);
        assert_eq!(metrics.error_count(ErrorLabels { method: Method::Get, secure: false }), 0);
    }

    #[test]
    fn concurrent_recording_is_consistent() {
        let metrics = Arc::new(ServerMetrics::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let metrics = metrics.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    metrics.record_request(labels(), Duration::from_millis(1), 1, 1);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(metrics.request_count(labels()), 8000);
        assert_eq!(metrics.request_body_bytes(), 8000);
    }
}
