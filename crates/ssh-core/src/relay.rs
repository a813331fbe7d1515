//! Bidirectional byte relay between a local connection and a remote channel.
//!
//! Both directions share one cancellation token. Whichever direction ends
//! first (clean EOF, error, or an outside cancel) fires the token, which stops
//! the other direction at its next suspension point. Errors seen after the
//! token already fired are teardown noise and are not reported.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::is_benign_teardown;

const RELAY_BUFFER: usize = 16 * 1024;

/// Result of one finished relay.
#[derive(Debug, Default)]
pub struct RelayOutcome {
    /// Bytes copied local -> remote.
    pub sent: u64,
    /// Bytes copied remote -> local.
    pub received: u64,
    /// First reportable copy error, if any.
    pub error: Option<io::Error>,
}

/// Copy `local` <-> `remote` until either side ends or `cancel` fires.
///
/// On return `cancel` has been fired and both write sides were shut down; the
/// streams themselves are dropped, which closes them.
pub async fn relay<L, R>(local: L, remote: R, cancel: CancellationToken) -> RelayOutcome
where
    L: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + AsyncWrite + Unpin,
{
    let (mut local_read, mut local_write) = tokio::io::split(local);
    let (mut remote_read, mut remote_write) = tokio::io::split(remote);

    let (outbound, inbound) = tokio::join!(
        pump(&mut local_read, &mut remote_write, &cancel, "local->remote"),
        pump(&mut remote_read, &mut local_write, &cancel, "remote->local"),
    );

    RelayOutcome {
        sent: outbound.bytes,
        received: inbound.bytes,
        error: outbound.error.or(inbound.error),
    }
}

struct Pumped {
    bytes: u64,
    error: Option<io::Error>,
}

async fn pump<Rd, Wr>(reader: &mut Rd, writer: &mut Wr, cancel: &CancellationToken, direction: &'static str) -> Pumped
where
    Rd: AsyncRead + Unpin,
    Wr: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER];
    let mut bytes = 0u64;

    let result: io::Result<()> = loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            read = reader.read(&mut buf) => read,
        };
        let n = match read {
            Ok(0) => break Ok(()),
            Ok(n) => n,
            Err(err) => break Err(err),
        };
        let written = tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            written = writer.write_all(&buf[..n]) => written,
        };
        if let Err(err) = written {
            break Err(err);
        }
        bytes += n as u64;
    };

    // Observe before firing: anything that failed after the token fired is teardown.
    let torn_down = cancel.is_cancelled();
    cancel.cancel();
    let _ = writer.shutdown().await;

    let error = match result {
        Ok(()) => {
            debug!(direction, bytes, "relay direction finished");
            None
        }
        Err(err) if torn_down || is_benign_teardown(&err) => {
            debug!(direction, bytes, error = %err, "relay direction closed during teardown");
            None
        }
        Err(err) => {
            warn!(direction, bytes, error = %err, "error during copy");
            Some(err)
        }
    };
    Pumped { bytes, error }
}

#[cfg(test)]
#[path = "relay_tests.rs"]
mod tests;
