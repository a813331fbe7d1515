use std::net::SocketAddr;

use async_trait::async_trait;
use russh::{ChannelMsg, Disconnect, client::Handle};
use ssh_core::{ForwardStream, SshCoreError, SshResult, TunnelSession};
use tk_types::{CommandOutput, Endpoint, Protocol};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::hostkeys::ClientHandler;

/// An authenticated russh connection.
pub struct SshSession {
    handle: Handle<ClientHandler>,
    address: String,
}

impl SshSession {
    pub(crate) fn new(handle: Handle<ClientHandler>, address: String) -> Self {
        Self { handle, address }
    }
}

#[async_trait]
impl TunnelSession for SshSession {
    async fn open_channel(&self, protocol: Protocol, target: &Endpoint, origin: SocketAddr) -> SshResult<ForwardStream> {
        if protocol != Protocol::Tcp {
            return Err(SshCoreError::UnsupportedProtocol {
                protocol,
                operation: "SSH forwarding channels",
            });
        }
        let channel = self
            .handle
            .channel_open_direct_tcpip(
                target.host.clone(),
                target.port.into(),
                origin.ip().to_string(),
                origin.port().into(),
            )
            .await
            .map_err(|err| SshCoreError::channel_open(target, protocol, err.to_string()))?;
        Ok(Box::new(channel.into_stream()))
    }

    async fn run_command(&self, command: &str, output: CommandOutput) -> SshResult<Option<u32>> {
        let failed = |err: russh::Error| SshCoreError::CommandFailed {
            command: command.to_string(),
            message: err.to_string(),
        };
        let mut channel = self.handle.channel_open_session().await.map_err(failed)?;
        channel.exec(true, command.as_bytes()).await.map_err(failed)?;
        debug!(address = %self.address, command, "remote command started");

        let mut stdout = tokio::io::stdout();
        let mut stderr = tokio::io::stderr();
        let mut exit_code = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } if output == CommandOutput::Inherit => {
                    stdout.write_all(&data).await?;
                    stdout.flush().await?;
                }
                ChannelMsg::ExtendedData { data, .. } if output == CommandOutput::Inherit => {
                    stderr.write_all(&data).await?;
                    stderr.flush().await?;
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    exit_code = Some(exit_status);
                }
                // Exit status usually arrives after EOF, so only Close ends the loop.
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        if let Some(code) = exit_code {
            info!(address = %self.address, command, code, "remote exit status");
        }
        Ok(exit_code)
    }

    async fn close(&self) {
        debug!(address = %self.address, "disconnecting SSH session");
        let _ = self.handle.disconnect(Disconnect::ByApplication, "", "").await;
    }
}
