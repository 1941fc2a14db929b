//! HTTP API over the deployment store

pub mod handlers;
pub mod serve;
pub mod state;
