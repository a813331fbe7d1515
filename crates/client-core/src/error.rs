use std::path::PathBuf;

use ssh_core::SshCoreError;
use thiserror::Error;

/// Errors that can occur in client-core operations
#[derive(Error, Debug)]
pub enum ClientError {
    /// SSH error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A private key could not be read or decoded
    #[error("failed to load key {}: {message}", .path.display())]
    KeyLoad { path: PathBuf, message: String },
}

/// Result type alias for client-core operations
pub type ClientResult<T> = Result<T, ClientError>;

impl ClientError {
    pub(crate) fn key_load(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::KeyLoad {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Map a handshake-time failure into the core taxonomy.
    pub(crate) fn into_core(self, address: &str) -> SshCoreError {
        match self {
            ClientError::Ssh(err) => SshCoreError::Ssh(err),
            ClientError::Io(source) => SshCoreError::ConnectionFailed {
                address: address.to_string(),
                source,
            },
            other => SshCoreError::Other(other.to_string()),
        }
    }
}
