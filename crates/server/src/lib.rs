//! HTTP surface of the perle-env provisioning orchestrator.

pub mod api;
pub mod metrics;
pub mod state;
