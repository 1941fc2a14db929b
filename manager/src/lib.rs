//! IoT Manager Library
//!
//! Deployment priority reconciliation and tenant resource lifecycle for the
//! IoT solution plane.

pub mod app;
pub mod clients;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod models;
pub mod server;
pub mod storage;
pub mod utils;
pub mod workers;
