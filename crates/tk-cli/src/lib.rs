pub mod cli;

use anyhow::{Context, Result};
use client_core::{Credentials, SshConnector};
use ssh_core::{ProxyServer, TunnelServer, Verbosity, init_logging, wait_for_socket};
use tk_types::{ProxyConfig, TunnelConfig, WaitConfig};
use tracing::debug;

pub use cli::{Action, Cli};

pub fn init_tracing(verbosity: Verbosity) {
    init_logging(verbosity);
}

pub async fn run(action: Action) -> Result<()> {
    match action {
        Action::Tunnel(config) => run_tunnel(config).await,
        Action::Proxy(config) => run_proxy(config).await,
        Action::Waitconn(config) => run_waitconn(config).await,
    }
}

pub async fn run_tunnel(config: TunnelConfig) -> Result<()> {
    let credentials = Credentials::load(&config.credentials)
        .await
        .context("failed to prepare SSH credentials")?;
    debug!(methods = ?credentials.methods(), "credentials loaded");
    let connector = SshConnector::new(config.ssh.clone(), credentials, config.dial_timeout);
    let server = TunnelServer::new(config, connector);
    server.run().await?;
    Ok(())
}

pub async fn run_proxy(config: ProxyConfig) -> Result<()> {
    ProxyServer::new(config).run().await?;
    Ok(())
}

pub async fn run_waitconn(config: WaitConfig) -> Result<()> {
    wait_for_socket(&config).await?;
    Ok(())
}
