pub mod execution;
pub mod snapshot;
pub mod subscription;
pub mod trigger;

pub use execution::*;
pub use snapshot::*;
pub use subscription::*;
pub use trigger::*;

/// Job name under which renewal reconciliation runs are audited
pub const RENEWAL_RECONCILIATION_JOB: &str = "renewal-reconciliation";
