//! Lifecycle owner for the single shared SSH session.
//!
//! One task owns the session handle and the reference count. Everything else
//! talks to it through [`SessionManager`], a cheap clonable mailbox handle:
//!
//! ```text
//! Absent --acquire--> Connecting --ok--> Connected --refs == 0 / cancel--> Closing --closed--> Absent
//!                          \--err--> Absent (every waiter gets the failure)
//! ```
//!
//! Only the owner mutates state, so creation is naturally exclusive: callers
//! arriving while a session is connecting (or still closing) queue up and are
//! answered when that transition resolves. Each live session has one
//! cancellation token; firing it is the only way a session ends. Leases hand
//! out child tokens of it, so a session ending unblocks every relay bound to it.

use std::{mem, sync::Arc};

use tk_types::CommandOutput;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::{SshCoreError, SshResult},
    transport::{SessionConnector, TunnelSession},
};

type Waiter<S> = oneshot::Sender<SshResult<SessionLease<S>>>;

enum SessionCommand<S> {
    Acquire { reply: Waiter<S> },
    Release { generation: u64 },
    Established { generation: u64, result: SshResult<S> },
    Closed { generation: u64 },
    Status { reply: oneshot::Sender<SessionStatus> },
}

/// Coarse lifecycle phase of the shared session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    Absent,
    Connecting,
    Connected,
    Closing,
}

/// Point-in-time view of the session owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    /// Connections currently depending on the session (or waiting for it).
    pub references: usize,
    /// Sessions successfully established since startup.
    pub sessions_created: u64,
}

/// Handle to the session owner task.
pub struct SessionManager<S> {
    mailbox: mpsc::UnboundedSender<SessionCommand<S>>,
}

impl<S> Clone for SessionManager<S> {
    fn clone(&self) -> Self {
        Self {
            mailbox: self.mailbox.clone(),
        }
    }
}

impl<S: TunnelSession> SessionManager<S> {
    /// Spawn the owner task. Must be called from within a tokio runtime.
    pub fn spawn<C>(connector: C, command: impl Into<String>, output: CommandOutput) -> Self
    where
        C: SessionConnector<Session = S>,
    {
        let (mailbox, commands) = mpsc::unbounded_channel();
        let owner = SessionOwner {
            connector: Arc::new(connector),
            command: Arc::from(command.into()),
            output,
            phase: Phase::Absent,
            generation: 0,
            established: 0,
            commands,
            mailbox: mailbox.downgrade(),
        };
        tokio::spawn(owner.run());
        Self { mailbox }
    }

    /// Count one more connection against the session and ask for it.
    ///
    /// The reference is taken as soon as this returns, before the session is
    /// known to exist, so a concurrent teardown cannot slip in between.
    pub fn acquire(&self) -> PendingLease<S> {
        let (reply, lease) = oneshot::channel();
        // A closed mailbox drops `reply`, which `wait` reports as ManagerClosed.
        let _ = self.mailbox.send(SessionCommand::Acquire { reply });
        PendingLease { lease }
    }

    pub async fn status(&self) -> SshResult<SessionStatus> {
        let (reply, status) = oneshot::channel();
        self.mailbox
            .send(SessionCommand::Status { reply })
            .map_err(|_| SshCoreError::ManagerClosed)?;
        status.await.map_err(|_| SshCoreError::ManagerClosed)
    }
}

/// A reference taken by [`SessionManager::acquire`] that is waiting for the session.
pub struct PendingLease<S> {
    lease: oneshot::Receiver<SshResult<SessionLease<S>>>,
}

impl<S> PendingLease<S> {
    /// Wait until the shared session is connected (or failed to connect).
    pub async fn wait(self) -> SshResult<SessionLease<S>> {
        self.lease.await.map_err(|_| SshCoreError::ManagerClosed)?
    }
}

/// One connection's claim on the shared session. Dropping it releases the reference.
pub struct SessionLease<S> {
    session: Arc<S>,
    generation: u64,
    cancel: CancellationToken,
    release: Option<mpsc::UnboundedSender<SessionCommand<S>>>,
}

impl<S> SessionLease<S> {
    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Private token for this connection's relay; fires when the session ends.
    pub fn relay_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl<S> Drop for SessionLease<S> {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(release) = self.release.take() {
            let _ = release.send(SessionCommand::Release {
                generation: self.generation,
            });
        }
    }
}

enum Phase<S> {
    Absent,
    Connecting {
        generation: u64,
        waiters: Vec<Waiter<S>>,
    },
    Connected {
        generation: u64,
        session: Arc<S>,
        cancel: CancellationToken,
        references: usize,
    },
    Closing {
        generation: u64,
        waiters: Vec<Waiter<S>>,
    },
}

struct SessionOwner<C: SessionConnector> {
    connector: Arc<C>,
    command: Arc<str>,
    output: CommandOutput,
    phase: Phase<C::Session>,
    generation: u64,
    established: u64,
    commands: mpsc::UnboundedReceiver<SessionCommand<C::Session>>,
    // Weak so the owner stops once every handle and lease is gone.
    mailbox: mpsc::WeakUnboundedSender<SessionCommand<C::Session>>,
}

impl<C: SessionConnector> SessionOwner<C> {
    async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            match command {
                SessionCommand::Acquire { reply } => self.acquire(reply),
                SessionCommand::Release { generation } => self.release(generation),
                SessionCommand::Established { generation, result } => self.established(generation, result),
                SessionCommand::Closed { generation } => self.closed(generation),
                SessionCommand::Status { reply } => {
                    let _ = reply.send(self.status());
                }
            }
        }
        if let Phase::Connected { cancel, .. } = &self.phase {
            cancel.cancel();
        }
        debug!(endpoint = %self.connector.endpoint(), "session owner stopped");
    }

    fn acquire(&mut self, reply: Waiter<C::Session>) {
        // The session may already be ending (remote command exit) before its
        // Closed message arrived; never hand out a lease on it.
        if let Phase::Connected { cancel, .. } = &self.phase
            && cancel.is_cancelled()
        {
            self.begin_close("session cancelled");
        }

        match &mut self.phase {
            Phase::Absent => self.start_connect(vec![reply]),
            Phase::Connecting { waiters, .. } | Phase::Closing { waiters, .. } => waiters.push(reply),
            Phase::Connected {
                generation,
                session,
                cancel,
                references,
            } => {
                *references += 1;
                let lease = new_lease(session, *generation, cancel, &self.mailbox);
                // If the caller is gone the returned lease drops here and releases itself.
                let _ = reply.send(Ok(lease));
            }
        }
    }

    fn release(&mut self, generation: u64) {
        let Phase::Connected {
            generation: current,
            references,
            ..
        } = &mut self.phase
        else {
            return;
        };
        if *current != generation {
            return;
        }
        *references = references.saturating_sub(1);
        debug!(generation, references = *references, "relay released shared session");
        if *references == 0 {
            self.begin_close("no more clients");
        }
    }

    fn start_connect(&mut self, waiters: Vec<Waiter<C::Session>>) {
        self.generation += 1;
        let generation = self.generation;
        let connector = Arc::clone(&self.connector);
        let mailbox = self.mailbox.upgrade();
        info!(endpoint = %connector.endpoint(), generation, waiting = waiters.len(), "connecting shared session");
        tokio::spawn(async move {
            let result = connector.connect().await;
            match mailbox {
                Some(mailbox) => {
                    let _ = mailbox.send(SessionCommand::Established { generation, result });
                }
                None => {
                    if let Ok(session) = result {
                        session.close().await;
                    }
                }
            }
        });
        self.phase = Phase::Connecting { generation, waiters };
    }

    fn established(&mut self, generation: u64, result: SshResult<C::Session>) {
        let waiters = match &mut self.phase {
            Phase::Connecting {
                generation: current,
                waiters,
            } if *current == generation => mem::take(waiters),
            _ => {
                warn!(generation, "discarding session from a superseded connect attempt");
                if let Ok(session) = result {
                    tokio::spawn(async move { session.close().await });
                }
                return;
            }
        };
        self.phase = Phase::Absent;

        let session = match result {
            Ok(session) => Arc::new(session),
            Err(err) => {
                let endpoint = self.connector.endpoint();
                warn!(%endpoint, error = %err, waiting = waiters.len(), "failed to establish shared session");
                let cause = Arc::new(err);
                for waiter in waiters {
                    let _ = waiter.send(Err(SshCoreError::SessionFailed {
                        endpoint: endpoint.clone(),
                        source: Arc::clone(&cause),
                    }));
                }
                return;
            }
        };

        self.established += 1;
        let cancel = CancellationToken::new();
        self.spawn_command_runner(generation, &session, &cancel);
        self.spawn_teardown_watcher(generation, &session, &cancel);

        let references = waiters.len();
        info!(endpoint = %self.connector.endpoint(), generation, clients = references, "shared session established");
        for waiter in waiters {
            let lease = new_lease(&session, generation, &cancel, &self.mailbox);
            let _ = waiter.send(Ok(lease));
        }
        self.phase = Phase::Connected {
            generation,
            session,
            cancel,
            references,
        };
        if references == 0 {
            self.begin_close("no clients left waiting");
        }
    }

    fn begin_close(&mut self, reason: &'static str) {
        let Phase::Connected { generation, cancel, .. } = &self.phase else {
            return;
        };
        let generation = *generation;
        info!(endpoint = %self.connector.endpoint(), generation, reason, "sending close request for shared session");
        cancel.cancel();
        self.phase = Phase::Closing {
            generation,
            waiters: Vec::new(),
        };
    }

    fn closed(&mut self, generation: u64) {
        let current = match &self.phase {
            Phase::Connected { generation, .. } | Phase::Closing { generation, .. } => *generation,
            _ => return,
        };
        if current != generation {
            return;
        }
        let waiters = match mem::replace(&mut self.phase, Phase::Absent) {
            Phase::Closing { waiters, .. } => waiters,
            _ => Vec::new(),
        };
        info!(endpoint = %self.connector.endpoint(), generation, "shared session closed");
        if !waiters.is_empty() {
            self.start_connect(waiters);
        }
    }

    fn status(&self) -> SessionStatus {
        let (phase, references) = match &self.phase {
            Phase::Absent => (SessionPhase::Absent, 0),
            Phase::Connecting { waiters, .. } => (SessionPhase::Connecting, waiters.len()),
            Phase::Connected { references, .. } => (SessionPhase::Connected, *references),
            Phase::Closing { waiters, .. } => (SessionPhase::Closing, waiters.len()),
        };
        SessionStatus {
            phase,
            references,
            sessions_created: self.established,
        }
    }

    /// Keep the remote command running; its exit (unless we are already closing) ends the session.
    fn spawn_command_runner(&self, generation: u64, session: &Arc<C::Session>, cancel: &CancellationToken) {
        let session = Arc::clone(session);
        let cancel = cancel.clone();
        let command = Arc::clone(&self.command);
        let output = self.output;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                outcome = session.run_command(&command, output) => {
                    if !cancel.is_cancelled() {
                        match outcome {
                            Ok(status) => info!(generation, command = %command, ?status, "remote command exited; closing session"),
                            Err(err) => warn!(generation, command = %command, error = %err, "remote command failed; closing session"),
                        }
                    }
                    cancel.cancel();
                }
            }
        });
    }

    /// Once the session token fires: close the connection, then tell the owner to forget it.
    fn spawn_teardown_watcher(&self, generation: u64, session: &Arc<C::Session>, cancel: &CancellationToken) {
        let session = Arc::clone(session);
        let cancel = cancel.clone();
        let mailbox = self.mailbox.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            session.close().await;
            if let Some(mailbox) = mailbox.upgrade() {
                let _ = mailbox.send(SessionCommand::Closed { generation });
            }
        });
    }
}

fn new_lease<S>(
    session: &Arc<S>,
    generation: u64,
    cancel: &CancellationToken,
    mailbox: &mpsc::WeakUnboundedSender<SessionCommand<S>>,
) -> SessionLease<S> {
    SessionLease {
        session: Arc::clone(session),
        generation,
        cancel: cancel.child_token(),
        release: mailbox.upgrade(),
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
