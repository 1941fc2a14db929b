//! Deployment module

pub mod convert;
pub mod lifecycle;
pub mod query;
pub mod ranking;
pub mod status;
pub mod store;

pub use store::DeploymentStore;
