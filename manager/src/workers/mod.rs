//! Background workers

pub mod hub_monitor;
pub mod reconciler;
