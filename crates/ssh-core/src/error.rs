use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tk_types::Protocol;

/// Errors that can occur in tunnel core operations
#[derive(Error, Debug)]
pub enum SshCoreError {
    /// Local listener could not be bound
    #[error("failed to listen on {address}/{protocol}: {source}")]
    BindFailed {
        address: String,
        protocol: Protocol,
        #[source]
        source: std::io::Error,
    },

    /// Local listener stopped accepting
    #[error("error during accept on {address}: {source}")]
    AcceptFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Outbound dial failed
    #[error("failed to connect to {address}: {source}")]
    ConnectionFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Outbound dial or handshake exceeded the configured timeout
    #[error("timed out after {timeout:?} connecting to {address}")]
    ConnectTimeout { address: String, timeout: Duration },

    /// SSH protocol error
    #[error("SSH protocol error: {0}")]
    Ssh(#[from] russh::Error),

    /// No configured credential was accepted
    #[error("no authentication method succeeded for {username}@{address}")]
    AuthExhausted { username: String, address: String },

    /// The SSH server refused or could not reach the channel target
    #[error("failed to dial {target}/{protocol}: {message}")]
    ChannelOpen {
        target: String,
        protocol: Protocol,
        message: String,
    },

    /// Protocol not available for this operation
    #[error("{protocol} is not supported for {operation}")]
    UnsupportedProtocol { protocol: Protocol, operation: &'static str },

    /// Keep-alive command could not be started or failed mid-flight
    #[error("error running {command:?}: {message}")]
    CommandFailed { command: String, message: String },

    /// A shared session attempt failed; every caller waiting on it receives this
    #[error("session to {endpoint} unavailable: {source}")]
    SessionFailed {
        endpoint: String,
        #[source]
        source: Arc<SshCoreError>,
    },

    /// The session owner task is gone
    #[error("session manager has shut down")]
    ManagerClosed,

    /// Socket never answered within the try budget
    #[error("no reply from {address}/{protocol} after {attempts} attempts")]
    NoReply {
        address: String,
        protocol: Protocol,
        attempts: u32,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for tunnel core operations
pub type SshResult<T> = Result<T, SshCoreError>;

impl SshCoreError {
    /// Listener failures: nothing can recover these, the process has to stop.
    pub fn is_process_fatal(&self) -> bool {
        matches!(self, Self::BindFailed { .. } | Self::AcceptFailed { .. })
    }

    /// True when no credential produced a successful handshake.
    pub fn is_auth_exhausted(&self) -> bool {
        match self {
            Self::AuthExhausted { .. } => true,
            Self::SessionFailed { source, .. } => source.is_auth_exhausted(),
            _ => false,
        }
    }

    /// Create a channel open error
    pub fn channel_open(target: impl ToString, protocol: Protocol, message: impl Into<String>) -> Self {
        Self::ChannelOpen {
            target: target.to_string(),
            protocol,
            message: message.into(),
        }
    }
}

/// I/O error kinds that show up when the other side of a relay was closed on purpose.
pub fn is_benign_teardown(err: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        err.kind(),
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::NotConnected
    )
}
