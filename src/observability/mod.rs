//! Observability helpers: routing metrics.

pub mod metrics;
