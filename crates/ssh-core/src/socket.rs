use std::{future::IntoFuture, time::Duration};

use tk_types::{Endpoint, Protocol};
use tokio::{
    net::{TcpListener, TcpStream},
    time::timeout,
};

use crate::error::{SshCoreError, SshResult};

/// Bind the local listener for a tunnel or proxy. Only stream listeners are supported.
pub async fn bind_listener(endpoint: &Endpoint, protocol: Protocol) -> SshResult<TcpListener> {
    if protocol != Protocol::Tcp {
        return Err(SshCoreError::UnsupportedProtocol {
            protocol,
            operation: "local listeners",
        });
    }
    TcpListener::bind(endpoint.as_pair())
        .await
        .map_err(|source| SshCoreError::BindFailed {
            address: endpoint.to_string(),
            protocol,
            source,
        })
}

/// Await `future` for at most `limit`. A zero limit means no timeout.
///
/// Returns `None` when the limit ran out first.
pub async fn within<F: IntoFuture>(limit: Duration, future: F) -> Option<F::Output> {
    if limit.is_zero() {
        Some(future.await)
    } else {
        timeout(limit, future).await.ok()
    }
}

/// Open a TCP connection, giving up after `dial_timeout` (zero waits indefinitely).
pub async fn dial_tcp(endpoint: &Endpoint, dial_timeout: Duration) -> SshResult<TcpStream> {
    let address = endpoint.to_string();
    let stream = within(dial_timeout, TcpStream::connect(endpoint.as_pair()))
        .await
        .ok_or_else(|| SshCoreError::ConnectTimeout {
            address: address.clone(),
            timeout: dial_timeout,
        })?
        .map_err(|source| SshCoreError::ConnectionFailed { address, source })?;
    stream.set_nodelay(true).ok();
    Ok(stream)
}
