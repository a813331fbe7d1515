//! Unit tests for the stream relay.

use std::{pin::Pin, task::{Context, Poll}, time::Duration};

use tokio::{
    io::{self, AsyncReadExt, AsyncWriteExt, ReadBuf},
    time::timeout,
};

use super::*;

#[tokio::test]
async fn round_trips_bytes_in_both_directions() {
    let (local, mut local_peer) = io::duplex(4096);
    let (remote, mut remote_peer) = io::duplex(4096);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(relay(local, remote, cancel.clone()));

    local_peer.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    remote_peer.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");

    remote_peer.write_all(b"pong!").await.unwrap();
    let mut buf = [0u8; 5];
    local_peer.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"pong!");

    drop(local_peer);
    let outcome = timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert_eq!(outcome.sent, 4);
    assert_eq!(outcome.received, 5);
    assert!(outcome.error.is_none());
    assert!(cancel.is_cancelled());
}

#[tokio::test]
async fn clean_eof_on_empty_stream_ends_relay_without_error() {
    let (local, local_peer) = io::duplex(64);
    let (remote, mut remote_peer) = io::duplex(64);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(relay(local, remote, cancel.clone()));

    drop(local_peer);
    let outcome = timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert_eq!((outcome.sent, outcome.received), (0, 0));
    assert!(outcome.error.is_none());

    // The remote side observes EOF once the relay shuts it down.
    let mut rest = Vec::new();
    remote_peer.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn multi_megabyte_payload_arrives_unmodified_and_in_order() {
    let payload: Vec<u8> = (0..3 * 1024 * 1024u32).map(|i| (i % 251) as u8).collect();
    let (local, mut local_peer) = io::duplex(8192);
    let (remote, mut remote_peer) = io::duplex(8192);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(relay(local, remote, cancel));

    let expected = payload.clone();
    let reader = tokio::spawn(async move {
        let mut got = vec![0u8; expected.len()];
        remote_peer.read_exact(&mut got).await.unwrap();
        assert!(got == expected, "payload corrupted in transit");
        remote_peer
    });
    local_peer.write_all(&payload).await.unwrap();
    let remote_peer = reader.await.unwrap();

    drop(local_peer);
    let outcome = timeout(Duration::from_secs(10), task).await.unwrap().unwrap();
    assert_eq!(outcome.sent, payload.len() as u64);
    drop(remote_peer);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn multi_megabyte_reply_reaches_the_local_side_intact() {
    let payload: Vec<u8> = (0..4 * 1024 * 1024u32).map(|i| (i.wrapping_mul(31) % 253) as u8).collect();
    let (local, mut local_peer) = io::duplex(8192);
    let (remote, mut remote_peer) = io::duplex(8192);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(relay(local, remote, cancel));

    let expected = payload.clone();
    let reader = tokio::spawn(async move {
        let mut got = vec![0u8; expected.len()];
        local_peer.read_exact(&mut got).await.unwrap();
        assert!(got == expected, "reply corrupted in transit");
        local_peer
    });
    remote_peer.write_all(&payload).await.unwrap();
    let local_peer = reader.await.unwrap();

    drop(remote_peer);
    let outcome = timeout(Duration::from_secs(10), task).await.unwrap().unwrap();
    assert_eq!(outcome.received, payload.len() as u64);
    assert_eq!(outcome.sent, 0);
    assert!(outcome.error.is_none());
    drop(local_peer);
}

#[tokio::test]
async fn external_cancel_unblocks_idle_relay() {
    let (local, _local_peer) = io::duplex(64);
    let (remote, _remote_peer) = io::duplex(64);
    let session = CancellationToken::new();
    let task = tokio::spawn(relay(local, remote, session.child_token()));

    tokio::task::yield_now().await;
    session.cancel();
    let outcome = timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert!(outcome.error.is_none());
}

#[tokio::test]
async fn reports_copy_errors_that_happen_before_teardown() {
    let (remote, _remote_peer) = io::duplex(64);
    let cancel = CancellationToken::new();
    let outcome = timeout(Duration::from_secs(5), relay(FailingRead, remote, cancel))
        .await
        .unwrap();
    let err = outcome.error.expect("read failure should be reported");
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
}

/// Stream whose reads fail immediately and whose writes are swallowed.
struct FailingRead;

impl tokio::io::AsyncRead for FailingRead {
    fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "corrupt frame")))
    }
}

impl tokio::io::AsyncWrite for FailingRead {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
