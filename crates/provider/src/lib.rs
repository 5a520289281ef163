//! Billing provider access for the subscription mirror.
//!
//! The reconciler only ever talks to [`ProviderGateway`], which resolves the
//! tenant's credential, calls the provider and bounds the call with a timeout.

pub mod client;
pub mod credentials;
pub mod error;
pub mod gateway;
pub mod mock;

pub use client::*;
pub use credentials::*;
pub use error::*;
pub use gateway::*;
pub use mock::*;
