//! Data models

pub mod configuration;
pub mod deployment;
pub mod device;
pub mod package;
pub mod tenant;
