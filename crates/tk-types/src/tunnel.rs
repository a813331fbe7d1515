//! Immutable configuration records for the tunnel, proxy and wait tools.
//!
//! Built once by a frontend (CLI, tests) and then shared read-only for the
//! lifetime of the process.

use std::{path::PathBuf, time::Duration};

use secrecy::SecretString;

use crate::net::{Endpoint, Protocol};

/// Keep-alive command started on every new SSH session.
pub const DEFAULT_REMOTE_COMMAND: &str = "vmstat 5";
/// Dial timeout used when none is configured.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(30);
/// Port assumed for the SSH endpoint when none is given.
pub const DEFAULT_SSH_PORT: u16 = 22;
/// Delay between `waitconn` attempts.
pub const DEFAULT_WAIT_DELAY: Duration = Duration::from_secs(1);

/// Where the remote keep-alive command's output goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandOutput {
    /// Copy to the local stdout/stderr.
    Inherit,
    /// Drop it.
    Discard,
}

/// Credentials the SSH client may try, in order: password first, then keys.
#[derive(Clone, Debug)]
pub struct CredentialOptions {
    /// Remote username.
    pub username: String,
    /// Optional password supplied up front.
    pub password: Option<SecretString>,
    /// Explicit private key; when absent the default key locations are probed.
    pub key_file: Option<PathBuf>,
}

/// Settings for the on-demand SSH tunnel.
#[derive(Clone, Debug)]
pub struct TunnelConfig {
    /// Local bind address.
    pub listen: Endpoint,
    /// SSH server to tunnel through.
    pub ssh: Endpoint,
    /// Destination reachable from the SSH server.
    pub target: Endpoint,
    /// Protocol of the listener and of the forwarded channels.
    pub protocol: Protocol,
    /// Timeout for establishing the SSH connection.
    pub dial_timeout: Duration,
    /// Command kept running on the SSH server for the session lifetime.
    pub remote_command: String,
    pub credentials: CredentialOptions,
    /// Drop the failing connection instead of exiting on session/channel failures.
    pub force: bool,
    /// Suppress logs and the remote command output.
    pub quiet: bool,
}

impl TunnelConfig {
    pub fn command_output(&self) -> CommandOutput {
        if self.quiet { CommandOutput::Discard } else { CommandOutput::Inherit }
    }
}

/// Settings for the plain dial-and-copy proxy.
#[derive(Clone, Debug)]
pub struct ProxyConfig {
    pub listen: Endpoint,
    pub target: Endpoint,
    pub protocol: Protocol,
    pub dial_timeout: Duration,
}

/// Settings for polling until a socket accepts connections.
#[derive(Clone, Debug)]
pub struct WaitConfig {
    pub address: Endpoint,
    pub protocol: Protocol,
    /// Number of attempts; `0` retries forever.
    pub tries: u32,
    pub wait_delay: Duration,
    pub connect_timeout: Duration,
}
