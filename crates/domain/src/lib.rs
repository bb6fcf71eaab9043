//! Dropper domain: inventory, schedule matching, allocation and dispatch

/// Dropper aggregate, read models and service
pub mod droppers;

/// Due-schedule matching
pub mod matcher;

/// Pill to position allocation
pub mod allocator;

/// Dispatch loop and outbound commands
pub mod dispatch;

/// Domain errors
pub mod errors;

pub use errors::{Error, ErrorKind};
