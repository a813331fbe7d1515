//! Network/endpoint parsing helpers shared across tunnelkit binaries.
//!
//! These types stay dependency-light so they can be reused by CLI tools,
//! the runtime crates, and tests without dragging in heavyweight parsing crates.

use std::{error::Error, fmt, str::FromStr};

/// Host used when a listen address omits the host part (`:8080`).
pub const ANY_HOST: &str = "0.0.0.0";

/// Transport protocol for listeners and forwarded channels.
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Stream sockets.
    #[default]
    Tcp,
    /// Datagram sockets.
    Udp,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = EndpointParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(EndpointParseError::UnknownProtocol(other.to_string())),
        }
    }
}

/// A `host:port` pair as typed by the user.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Hostname or IP literal, without IPv6 brackets. May be empty for listeners.
    pub host: String,
    /// Port number.
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    /// Tuple form accepted by `tokio::net` bind/connect helpers.
    pub fn as_pair(&self) -> (&str, u16) {
        (self.host.as_str(), self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Errors that can occur while parsing an endpoint string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EndpointParseError {
    /// The input was empty or only whitespace.
    EmptyEndpoint,
    /// Host portion was empty where one is required.
    EmptyHost,
    /// No `:port` suffix and no default port applies.
    MissingPort(String),
    /// Port failed to parse into a valid `u16`.
    InvalidPort(String),
    /// An IPv6 literal was given without brackets.
    UnbracketedIpv6(String),
    /// Protocol name other than `tcp` or `udp`.
    UnknownProtocol(String),
}

impl fmt::Display for EndpointParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointParseError::EmptyEndpoint => write!(f, "address must not be empty"),
            EndpointParseError::EmptyHost => write!(f, "address host is missing"),
            EndpointParseError::MissingPort(input) => write!(f, "address {input} is missing a :port suffix"),
            EndpointParseError::InvalidPort(p) => write!(f, "invalid port: {p}"),
            EndpointParseError::UnbracketedIpv6(input) => write!(f, "IPv6 address {input} must be wrapped in brackets"),
            EndpointParseError::UnknownProtocol(p) => write!(f, "unknown protocol {p} (expected tcp or udp)"),
        }
    }
}

impl Error for EndpointParseError {}

/// Parse `host:port`, `[v6]:port`, `:port`, or a bare host when `default_port` is set.
///
/// The host may come back empty; callers decide whether that is acceptable.
pub fn parse_endpoint(input: &str, default_port: Option<u16>) -> Result<Endpoint, EndpointParseError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(EndpointParseError::EmptyEndpoint);
    }

    if input.starts_with('[') {
        return parse_bracketed(input, default_port);
    }

    match input.rsplit_once(':') {
        Some((host, _)) if host.contains(':') => Err(EndpointParseError::UnbracketedIpv6(input.to_string())),
        Some((host, port)) => Ok(Endpoint::new(host, parse_port(port)?)),
        None => {
            let port = default_port.ok_or_else(|| EndpointParseError::MissingPort(input.to_string()))?;
            Ok(Endpoint::new(input, port))
        }
    }
}

/// Parse a local bind address; an omitted host means every interface.
pub fn parse_listen_endpoint(input: &str) -> Result<Endpoint, EndpointParseError> {
    let mut endpoint = parse_endpoint(input, None)?;
    if endpoint.host.is_empty() {
        endpoint.host = ANY_HOST.to_string();
    }
    Ok(endpoint)
}

/// Parse an address that will be dialed; the host is mandatory.
pub fn parse_remote_endpoint(input: &str, default_port: Option<u16>) -> Result<Endpoint, EndpointParseError> {
    let endpoint = parse_endpoint(input, default_port)?;
    if endpoint.host.is_empty() {
        return Err(EndpointParseError::EmptyHost);
    }
    Ok(endpoint)
}

fn parse_bracketed(input: &str, default_port: Option<u16>) -> Result<Endpoint, EndpointParseError> {
    if let Some((host, port)) = input.rsplit_once("]:") {
        let host = host.trim_start_matches('[');
        return Ok(Endpoint::new(host, parse_port(port)?));
    }
    let host = input.trim_start_matches('[').trim_end_matches(']');
    let port = default_port.ok_or_else(|| EndpointParseError::MissingPort(input.to_string()))?;
    Ok(Endpoint::new(host, port))
}

fn parse_port(port: &str) -> Result<u16, EndpointParseError> {
    port.parse::<u16>().map_err(|_| EndpointParseError::InvalidPort(port.to_string()))
}

#[cfg(test)]
#[path = "net_tests.rs"]
mod tests;
