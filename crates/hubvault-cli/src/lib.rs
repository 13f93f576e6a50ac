//! hubvault-cli library: HTTP clients and configuration behind the `hubvault` binary.
//!
//! Kept as a library so integration tests can drive the real clients
//! against fake servers.

pub mod config;
pub mod hubspot;
pub mod mfiles;

pub use config::{Config, ConfigError};
pub use hubspot::HubSpotClient;
pub use mfiles::{Credentials, MFilesClient};
