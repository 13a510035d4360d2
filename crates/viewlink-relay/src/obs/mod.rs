//! Lightweight in-process metrics (dependency-free).
//!
//! Rendered in Prometheus text format by the `/metrics` handler.

pub mod metrics;

pub use metrics::RelayMetrics;
