//! Shared type definitions for tunnelkit.
//!
//! Lightweight configuration records and parsing helpers used by the core
//! runtime, the SSH client crate and the CLI. Nothing in here performs I/O.

pub mod duration;
pub mod net;
pub mod tunnel;

pub use duration::{DurationParseError, parse_duration};
pub use net::{Endpoint, EndpointParseError, Protocol, parse_endpoint, parse_listen_endpoint, parse_remote_endpoint};
pub use tunnel::{CommandOutput, CredentialOptions, ProxyConfig, TunnelConfig, WaitConfig};
