//! Multi-session messaging gateway core.
//!
//! Manages many independent, long-lived authenticated connections to a
//! messaging transport. Each session runs as its own actor; a registry
//! indexes live sessions and republishes their lifecycle events, and a
//! dispatcher sends and tracks outbound messages.

pub mod config;
pub mod dispatch;
pub mod session;
pub mod store;
pub mod sync;
