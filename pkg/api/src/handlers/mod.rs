pub mod host;
pub mod kv;
pub mod lease;
pub mod peers;
pub mod watch;
