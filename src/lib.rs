//! Subscription billing mirror
//!
//! Mirrors subscription state from an external billing provider and
//! reconciles renewals against it. The workspace crates are re-exported
//! here under short names.

pub use billing_mirror_config as config;
pub use billing_mirror_provider as provider;
pub use billing_mirror_reconciler as reconciler;
pub use billing_mirror_store as store;
pub use billing_mirror_telemetry as telemetry;
pub use billing_mirror_types as types;
