//! HTTP clients for remote services

pub mod client;
pub mod storage_adapter;
