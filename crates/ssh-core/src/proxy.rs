//! Direct dial-and-copy proxy: no SSH, no sharing, one relay per accepted connection.

use std::{net::SocketAddr, sync::Arc};

use tk_types::ProxyConfig;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    error::{SshCoreError, SshResult},
    relay::relay,
    socket::{bind_listener, dial_tcp},
};

pub struct ProxyServer {
    config: Arc<ProxyConfig>,
}

impl ProxyServer {
    pub fn new(config: ProxyConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub async fn bind(&self) -> SshResult<TcpListener> {
        bind_listener(&self.config.listen, self.config.protocol).await
    }

    pub async fn run(&self) -> SshResult<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept connections until the listener fails or a target dial fails.
    pub async fn serve(&self, listener: TcpListener) -> SshResult<()> {
        let address = listener
            .local_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| self.config.listen.to_string());
        info!(listen = %address, target = %self.config.target, "proxy listening");

        let (fatal_tx, mut fatal_rx) = mpsc::channel::<SshCoreError>(1);
        loop {
            tokio::select! {
                Some(err) = fatal_rx.recv() => {
                    error!(error = %err, "proxy dial failed; stopping listener");
                    return Err(err);
                }
                accepted = listener.accept() => {
                    let (stream, origin) = accepted.map_err(|source| SshCoreError::AcceptFailed {
                        address: address.clone(),
                        source,
                    })?;
                    let config = Arc::clone(&self.config);
                    let fatal_tx = fatal_tx.clone();
                    tokio::spawn(async move {
                        if let Err(err) = proxy_connection(stream, origin, &config).await {
                            let _ = fatal_tx.send(err).await;
                        }
                    });
                }
            }
        }
    }
}

async fn proxy_connection(stream: TcpStream, origin: SocketAddr, config: &ProxyConfig) -> SshResult<()> {
    stream.set_nodelay(true).ok();
    let remote = dial_tcp(&config.target, config.dial_timeout).await?;
    debug!(%origin, target = %config.target, "proxy connection open");

    let outcome = relay(stream, remote, CancellationToken::new()).await;
    info!(%origin, sent = outcome.sent, received = outcome.received, "closing proxy connection");
    Ok(())
}
