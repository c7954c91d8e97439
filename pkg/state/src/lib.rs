//! Primary-peer coordination over a shared key-value medium.

pub mod client;
pub mod handoff;
pub mod identity;
pub mod leader;
pub mod lease_store;
pub mod medium;
pub mod remote;
pub mod watch;
