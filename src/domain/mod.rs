//! Core Domain Module
//!
//! Remote-object identity model, per-operation context types and the
//! port traits that bound the orchestrator against the array's
//! management interface.

pub mod ports;
pub mod types;

#[cfg(test)]
pub(crate) mod fake;

pub use ports::*;
pub use types::*;
