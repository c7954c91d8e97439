//! Shared data types for the tablock workspace.

pub mod config;
pub mod handoff;
pub mod lease;
pub mod peer;
pub mod validate;
