//! Per-connection processing: the ingress filler / request processor task
//! pair and the dispatch path between them.

mod http_connection;

pub use http_connection::{ConnectionConfig, HttpConnection};
