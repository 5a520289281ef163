//! Logging and metrics for the subscription mirror.
//!
//! Metrics live in the process-wide Prometheus registry; [`MetricsCollector`]
//! is a cheap handle for recording them and rendering the text exposition.

pub mod collector;
pub mod http;
pub mod metrics;
pub mod logging;

pub use collector::{MetricsCollector, MetricsError, TenantResult};
pub use http::metrics_routes;
pub use logging::{init_tracing, LogFormat, RunSpan, TracingError};
