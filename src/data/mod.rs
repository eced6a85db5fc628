//! Persisted and process-wide state: configuration, sessions and setup.

pub mod config_store;
pub mod secret;
pub mod session_store;
pub mod setup;
