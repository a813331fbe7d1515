use std::{
    net::SocketAddr,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tk_types::{Endpoint, Protocol};
use tokio::time::{sleep, timeout};

use super::*;
use crate::transport::ForwardStream;

#[derive(Default)]
struct Probe {
    connects: AtomicUsize,
    closes: AtomicUsize,
    failures_left: AtomicUsize,
    exits: Mutex<Vec<CancellationToken>>,
}

impl Probe {
    fn exit_of(&self, session: usize) -> CancellationToken {
        self.exits.lock().unwrap()[session].clone()
    }
}

struct MockConnector {
    probe: Arc<Probe>,
    connect_delay: Duration,
    close_delay: Duration,
}

struct MockSession {
    probe: Arc<Probe>,
    exit: CancellationToken,
    close_delay: Duration,
}

#[async_trait]
impl SessionConnector for MockConnector {
    type Session = MockSession;

    fn endpoint(&self) -> String {
        "bastion.test:22".into()
    }

    async fn connect(&self) -> SshResult<MockSession> {
        sleep(self.connect_delay).await;
        self.probe.connects.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .probe
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SshCoreError::AuthExhausted {
                username: "ops".into(),
                address: self.endpoint(),
            });
        }
        let exit = CancellationToken::new();
        self.probe.exits.lock().unwrap().push(exit.clone());
        Ok(MockSession {
            probe: Arc::clone(&self.probe),
            exit,
            close_delay: self.close_delay,
        })
    }
}

#[async_trait]
impl TunnelSession for MockSession {
    async fn open_channel(&self, protocol: Protocol, target: &Endpoint, _origin: SocketAddr) -> SshResult<ForwardStream> {
        Err(SshCoreError::channel_open(target, protocol, "not used here"))
    }

    async fn run_command(&self, _command: &str, _output: CommandOutput) -> SshResult<Option<u32>> {
        self.exit.cancelled().await;
        Ok(Some(0))
    }

    async fn close(&self) {
        sleep(self.close_delay).await;
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
    }
}

fn manager(probe: &Arc<Probe>, connect_delay: Duration, close_delay: Duration) -> SessionManager<MockSession> {
    let connector = MockConnector {
        probe: Arc::clone(probe),
        connect_delay,
        close_delay,
    };
    SessionManager::spawn(connector, "vmstat 5", CommandOutput::Discard)
}

async fn wait_for_phase(manager: &SessionManager<MockSession>, phase: SessionPhase) -> SessionStatus {
    timeout(Duration::from_secs(5), async {
        loop {
            let status = manager.status().await.unwrap();
            if status.phase == phase {
                return status;
            }
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("session never reached {phase:?}"))
}

#[tokio::test]
async fn concurrent_acquires_share_one_session() {
    let probe = Arc::new(Probe::default());
    let manager = manager(&probe, Duration::from_millis(50), Duration::ZERO);

    let pending: Vec<_> = (0..5).map(|_| manager.acquire()).collect();
    let connecting = manager.status().await.unwrap();
    assert_eq!(connecting.phase, SessionPhase::Connecting);
    assert_eq!(connecting.references, 5);

    let mut leases = Vec::new();
    for lease in pending {
        leases.push(lease.wait().await.unwrap());
    }

    assert_eq!(probe.connects.load(Ordering::SeqCst), 1);
    assert!(leases.iter().all(|lease| lease.generation() == 1));
    let status = manager.status().await.unwrap();
    assert_eq!(status.phase, SessionPhase::Connected);
    assert_eq!(status.references, 5);
    assert_eq!(status.sessions_created, 1);

    // A late caller joins the live session instead of dialing again.
    let late = manager.acquire().wait().await.unwrap();
    assert_eq!(late.generation(), 1);
    assert_eq!(manager.status().await.unwrap().references, 6);
    assert_eq!(probe.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn last_release_closes_the_session() {
    let probe = Arc::new(Probe::default());
    let manager = manager(&probe, Duration::ZERO, Duration::ZERO);

    let first = manager.acquire().wait().await.unwrap();
    let second = manager.acquire().wait().await.unwrap();
    let token = first.relay_token();

    drop(second);
    sleep(Duration::from_millis(20)).await;
    let status = manager.status().await.unwrap();
    assert_eq!(status.phase, SessionPhase::Connected);
    assert_eq!(status.references, 1);
    assert_eq!(probe.closes.load(Ordering::SeqCst), 0);

    drop(first);
    assert!(token.is_cancelled());
    wait_for_phase(&manager, SessionPhase::Absent).await;
    assert_eq!(probe.closes.load(Ordering::SeqCst), 1);

    // The next connection starts from scratch.
    let again = manager.acquire().wait().await.unwrap();
    assert_eq!(again.generation(), 2);
    assert_eq!(probe.connects.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failed_connect_fails_every_waiter_and_next_acquire_retries() {
    let probe = Arc::new(Probe::default());
    probe.failures_left.store(1, Ordering::SeqCst);
    let manager = manager(&probe, Duration::from_millis(30), Duration::ZERO);

    let pending: Vec<_> = (0..3).map(|_| manager.acquire()).collect();
    for lease in pending {
        let err = lease.wait().await.err().expect("connect should fail");
        assert!(err.is_auth_exhausted(), "unexpected error: {err}");
        assert!(matches!(err, SshCoreError::SessionFailed { .. }));
    }
    let status = manager.status().await.unwrap();
    assert_eq!(status.phase, SessionPhase::Absent);
    assert_eq!(status.sessions_created, 0);

    let lease = manager.acquire().wait().await.unwrap();
    assert_eq!(lease.generation(), 2);
    assert_eq!(probe.connects.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn command_exit_cancels_every_relay_token() {
    let probe = Arc::new(Probe::default());
    let manager = manager(&probe, Duration::ZERO, Duration::ZERO);

    let first = manager.acquire().wait().await.unwrap();
    let second = manager.acquire().wait().await.unwrap();
    let tokens = [first.relay_token(), second.relay_token()];

    probe.exit_of(0).cancel();
    for token in &tokens {
        timeout(Duration::from_secs(2), token.cancelled())
            .await
            .expect("relay token should fire when the command exits");
    }
    wait_for_phase(&manager, SessionPhase::Absent).await;
    assert_eq!(probe.closes.load(Ordering::SeqCst), 1);

    // Leases from the dead session release into nothing.
    drop(first);
    drop(second);
    let fresh = manager.acquire().wait().await.unwrap();
    assert_eq!(fresh.generation(), 2);
    assert_eq!(manager.status().await.unwrap().references, 1);
}

#[tokio::test]
async fn acquire_while_closing_waits_for_a_new_session() {
    let probe = Arc::new(Probe::default());
    let manager = manager(&probe, Duration::ZERO, Duration::from_millis(100));

    let lease = manager.acquire().wait().await.unwrap();
    drop(lease);
    wait_for_phase(&manager, SessionPhase::Closing).await;

    let pending = manager.acquire();
    let closing = manager.status().await.unwrap();
    assert_eq!(closing.phase, SessionPhase::Closing);
    assert_eq!(closing.references, 1);

    let lease = pending.wait().await.unwrap();
    assert_eq!(lease.generation(), 2);
    assert_eq!(probe.closes.load(Ordering::SeqCst), 1);
    assert_eq!(manager.status().await.unwrap().sessions_created, 2);
}

#[tokio::test]
async fn abandoned_acquire_does_not_keep_the_session_alive() {
    let probe = Arc::new(Probe::default());
    let manager = manager(&probe, Duration::from_millis(30), Duration::ZERO);

    let kept = manager.acquire();
    let abandoned = manager.acquire();
    drop(abandoned);

    let lease = kept.wait().await.unwrap();
    sleep(Duration::from_millis(20)).await;
    assert_eq!(manager.status().await.unwrap().references, 1);

    drop(lease);
    wait_for_phase(&manager, SessionPhase::Absent).await;
}

#[tokio::test]
async fn acquire_right_after_command_exit_gets_a_fresh_session() {
    let probe = Arc::new(Probe::default());
    let manager = manager(&probe, Duration::ZERO, Duration::from_millis(100));

    let old = manager.acquire().wait().await.unwrap();
    let old_token = old.relay_token();
    probe.exit_of(0).cancel();
    timeout(Duration::from_secs(2), old_token.cancelled())
        .await
        .expect("relay token should fire when the command exits");

    // Cancelled, but the slow close has not reported back yet.
    let status = manager.status().await.unwrap();
    assert_eq!(status.phase, SessionPhase::Connected);
    assert_eq!(probe.closes.load(Ordering::SeqCst), 0);

    let pending = manager.acquire();
    let closing = manager.status().await.unwrap();
    assert_eq!(closing.phase, SessionPhase::Closing);
    assert_eq!(closing.references, 1);

    let fresh = pending.wait().await.unwrap();
    assert_eq!(fresh.generation(), 2);
    assert!(!fresh.relay_token().is_cancelled());
    assert_eq!(probe.closes.load(Ordering::SeqCst), 1);
    assert_eq!(probe.connects.load(Ordering::SeqCst), 2);

    // Releasing the stale lease leaves the new session untouched.
    drop(old);
    sleep(Duration::from_millis(20)).await;
    let status = manager.status().await.unwrap();
    assert_eq!(status.phase, SessionPhase::Connected);
    assert_eq!(status.references, 1);
    assert_eq!(status.sessions_created, 2);
}
