//! Seams between the tunnel core and the secure transport that carries it.
//!
//! The core only needs two things from a transport: a way to establish one
//! authenticated session, and, on that session, a way to open channels and
//! run the keep-alive command. `client-core` implements both on russh; tests
//! implement them with in-memory duplex streams.

use std::net::SocketAddr;

use async_trait::async_trait;
use tk_types::{CommandOutput, Endpoint, Protocol};
use tokio::io::{AsyncRead, AsyncWrite};

// Internal Result type alias for convenience
type Result<T> = crate::SshResult<T>;

/// Trait for streams that can be used for forwarding.
pub trait ForwardStreamIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ForwardStreamIo for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Type alias for boxed forward streams.
pub type ForwardStream = Box<dyn ForwardStreamIo>;

/// One live, authenticated connection to the remote endpoint.
#[async_trait]
pub trait TunnelSession: Send + Sync + 'static {
    /// Open a logical channel to `target`, as seen from the remote endpoint.
    async fn open_channel(&self, protocol: Protocol, target: &Endpoint, origin: SocketAddr) -> Result<ForwardStream>;

    /// Run `command` remotely and resolve once it exits, with its exit status when reported.
    async fn run_command(&self, command: &str, output: CommandOutput) -> Result<Option<u32>>;

    /// Close the underlying connection. Called once per session.
    async fn close(&self);
}

/// Dials and authenticates new sessions on demand.
#[async_trait]
pub trait SessionConnector: Send + Sync + 'static {
    type Session: TunnelSession;

    /// Human-readable remote endpoint, used in logs and errors.
    fn endpoint(&self) -> String;

    async fn connect(&self) -> Result<Self::Session>;
}
