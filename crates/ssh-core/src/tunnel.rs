//! Local listener that forwards every accepted connection through the shared SSH session.

use std::{net::SocketAddr, sync::Arc};

use tk_types::TunnelConfig;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
};
use tracing::{debug, error, info, warn};

use crate::{
    error::{SshCoreError, SshResult},
    manager::{PendingLease, SessionManager},
    relay::relay,
    socket::bind_listener,
    transport::{SessionConnector, TunnelSession},
};

pub struct TunnelServer<S> {
    config: Arc<TunnelConfig>,
    sessions: SessionManager<S>,
}

impl<S: TunnelSession> TunnelServer<S> {
    /// Create the server and its session owner. Must be called from within a tokio runtime.
    pub fn new<C>(config: TunnelConfig, connector: C) -> Self
    where
        C: SessionConnector<Session = S>,
    {
        let sessions = SessionManager::spawn(connector, config.remote_command.clone(), config.command_output());
        Self {
            config: Arc::new(config),
            sessions,
        }
    }

    pub fn sessions(&self) -> &SessionManager<S> {
        &self.sessions
    }

    pub async fn bind(&self) -> SshResult<TcpListener> {
        bind_listener(&self.config.listen, self.config.protocol).await
    }

    /// Bind the configured listener and serve it until a fatal error.
    pub async fn run(&self) -> SshResult<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept connections forever.
    ///
    /// Returns on accept failure, or on the first session/channel failure
    /// unless `force` is set, in which case only that connection is dropped.
    pub async fn serve(&self, listener: TcpListener) -> SshResult<()> {
        let address = listener
            .local_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| self.config.listen.to_string());
        info!(
            listen = %address,
            ssh = %self.config.ssh,
            target = %self.config.target,
            protocol = %self.config.protocol,
            "tunnel listening"
        );

        let (fatal_tx, mut fatal_rx) = mpsc::channel::<SshCoreError>(1);
        loop {
            tokio::select! {
                Some(err) = fatal_rx.recv() => {
                    error!(error = %err, "tunnel connection failed; stopping listener");
                    return Err(err);
                }
                accepted = listener.accept() => {
                    let (stream, origin) = accepted.map_err(|source| SshCoreError::AcceptFailed {
                        address: address.clone(),
                        source,
                    })?;
                    debug!(%origin, "accepted tunnel connection");
                    // Count the reference before the handler runs.
                    let pending = self.sessions.acquire();
                    let config = Arc::clone(&self.config);
                    let fatal_tx = fatal_tx.clone();
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(stream, origin, pending, &config).await {
                            if keeps_listening(&err, config.force) {
                                warn!(%origin, error = %err, "dropping tunnel connection");
                            } else {
                                let _ = fatal_tx.send(err).await;
                            }
                        }
                    });
                }
            }
        }
    }
}

/// Whether the listener survives a failed connection. `--force` covers
/// connection-scoped errors only.
fn keeps_listening(err: &SshCoreError, force: bool) -> bool {
    force && !err.is_process_fatal()
}

async fn handle_connection<S: TunnelSession>(
    stream: TcpStream,
    origin: SocketAddr,
    pending: PendingLease<S>,
    config: &TunnelConfig,
) -> SshResult<()> {
    stream.set_nodelay(true).ok();
    let lease = pending.wait().await?;
    let channel = lease
        .session()
        .open_channel(config.protocol, &config.target, origin)
        .await?;
    debug!(%origin, target = %config.target, generation = lease.generation(), "tunnel channel open");

    let outcome = relay(stream, channel, lease.relay_token()).await;
    info!(
        %origin,
        sent = outcome.sent,
        received = outcome.received,
        "closing tunnel"
    );
    Ok(())
}
