//! HTTP status endpoint
//!
//! Health, session snapshot and Prometheus metrics for monitoring.

pub mod http_server;
pub use http_server::{run_http_server, StatusState};
