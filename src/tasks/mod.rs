//! Background Tasks Module
//!
//! Contains background tasks that run periodically during server operation.
//!
//! # Tasks
//! - Reconnect supervisor: re-establishes the shared store after a give-up

mod reconnect;

pub use reconnect::spawn_reconnect_task;
