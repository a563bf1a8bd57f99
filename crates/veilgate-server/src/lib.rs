//! Reverse-tunnel onion gateway: dispatch engine, HTTP surfaces, overlay
//! bootstrap, and the CLI/runtime wiring that assembles them into the
//! `veilgate` binary.

pub mod bootstrap;
pub mod connection;
pub mod core;
pub mod error;
pub mod http;
pub mod keepalive;
pub mod registry;
pub mod system_env;

#[cfg(test)]
mod test_support;

pub use core::{spawn, CoreCommand, CoreHandle, DispatchResult};
pub use error::GatewayError;
pub use registry::{PublishedUrl, UrlRegistry};
pub use system_env::SystemEnv;
