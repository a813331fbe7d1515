//! Poll an address until something accepts a connection on it.

use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    time::Duration,
};

use tk_types::{Endpoint, Protocol, WaitConfig};
use tokio::{
    net::{UdpSocket, lookup_host},
    time::sleep,
};
use tracing::{debug, info};

use crate::{
    error::{SshCoreError, SshResult},
    socket::{dial_tcp, within},
};

/// Try to reach `config.address` until it answers, returning the number of attempts made.
///
/// `tries == 0` retries forever.
pub async fn wait_for_socket(config: &WaitConfig) -> SshResult<u32> {
    let mut attempts = 0u32;
    loop {
        attempts = attempts.saturating_add(1);
        match probe(&config.address, config.protocol, config.connect_timeout).await {
            Ok(()) => {
                info!(address = %config.address, protocol = %config.protocol, attempts, "socket is accepting connections");
                return Ok(attempts);
            }
            Err(err) => info!(address = %config.address, attempt = attempts, error = %err, "no reply"),
        }
        if config.tries != 0 && attempts >= config.tries {
            return Err(SshCoreError::NoReply {
                address: config.address.to_string(),
                protocol: config.protocol,
                attempts,
            });
        }
        sleep(config.wait_delay).await;
    }
}

async fn probe(address: &Endpoint, protocol: Protocol, connect_timeout: Duration) -> SshResult<()> {
    match protocol {
        Protocol::Tcp => {
            dial_tcp(address, connect_timeout).await?;
            Ok(())
        }
        Protocol::Udp => within(connect_timeout, probe_udp(address))
            .await
            .ok_or_else(|| SshCoreError::ConnectTimeout {
                address: address.to_string(),
                timeout: connect_timeout,
            })?
            .map_err(|source| SshCoreError::ConnectionFailed {
                address: address.to_string(),
                source,
            }),
    }
}

// Datagram "connections" only need a resolvable peer and a local socket.
async fn probe_udp(address: &Endpoint) -> io::Result<()> {
    let peer = lookup_host(address.as_pair())
        .await?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "address did not resolve"))?;
    let local: SocketAddr = if peer.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(peer).await?;
    debug!(%peer, "datagram socket connected");
    Ok(())
}
