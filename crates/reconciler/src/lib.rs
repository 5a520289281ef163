pub mod context;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod selector;
pub mod service;
pub mod tracker;
pub mod writer;


// Re-export main types
pub use context::{RunContext, RunLimits};
pub use engine::{
    evaluate, ReconcileOutcome, ReconciliationEngine, ReconciliationPolicy, SkipReason,
};
pub use error::ReconcileError;
pub use orchestrator::{
    OrchestratorConfig, PipelineFailure, RunSummary, StaticTenantRegistry, StoreTenantRegistry,
    TenantFailure, TenantOrchestrator, TenantRegistry,
};
pub use selector::{CandidateSelector, CandidateStream};
pub use service::{BuilderError, RenewalReconciliationJob, RenewalReconciliationJobBuilder};
pub use tracker::{ExecutionTracker, DEFAULT_STALE_AFTER_SECS};
pub use writer::ChunkWriter;
