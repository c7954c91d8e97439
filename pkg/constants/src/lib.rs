//! Centralized constants for the tablock project.
//!
//! All project-wide constant values live here.
//! Change a value in one place and it applies everywhere.

pub mod api;
pub mod paths;
pub mod state;
