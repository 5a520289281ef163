//! HTTP surface, scheduler and startup wiring for the renewal reconciliation service

pub mod api;
pub mod app;
pub mod scheduler;

pub use api::router;
pub use app::{build_job, job_builder, provider_gateway};
pub use scheduler::build_scheduler;
