//! Transaction actors.
//!
//! A transaction actor is a control loop running as its own task that
//! exclusively owns one backend transaction handle. Callers talk to it only
//! through a [`Transaction`] handle: statements, commit and rollback travel
//! down one queue and are processed strictly in arrival order, so the
//! backend handle is never touched by more than one task.
//!
//! ```text
//! caller A --execute_statement--+
//! caller B --execute_statement--+--> [command queue] --> control loop --> backend handle
//! caller A --commit-------------+                             |
//!                                                             +--> Subscription (one terminal value)
//! ```
//!
//! Two loops share this protocol:
//!
//! - [`relational`] -- opens a real transaction up front, runs each
//!   statement as it arrives, issues real COMMIT/ROLLBACK.
//! - [`batch`] -- stages statements and submits them as one all-or-nothing
//!   batch on commit; rollback discards the batch without a backend call.

pub mod batch;
pub mod relational;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::Span;

use crate::error::DbError;
use crate::statement::{BoxedStatement, Executable};

pub use batch::BatchManager;
pub use relational::RelationalManager;

/// Terminal outcome of a transaction: `Ok(())` on clean commit or rollback,
/// otherwise the first failure encountered.
pub type Outcome = Result<(), DbError>;

/// Starts transaction actors.
pub trait TransactionManager: Send + Sync {
    /// Handle type of the statements the started actors accept.
    type Handle: Send + 'static;

    /// Start a new actor on the current runtime and return its handle.
    ///
    /// Connection failures surface on [`Transaction::subscribe_error`], not
    /// here. Every backend call the actor makes is bounded by `deadline`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Runtime`] if called outside a Tokio runtime.
    fn get_and_start(&self, deadline: Option<Instant>)
    -> Result<Transaction<Self::Handle>, DbError>;
}

/// A statement moving into an actor's queue, with the private channel its
/// acknowledgement comes back on.
pub(crate) struct StatementRequest<H> {
    pub(crate) statement: BoxedStatement<H>,
    /// Caller's span; the actor runs the statement inside it.
    pub(crate) span: Span,
    pub(crate) reply: oneshot::Sender<Result<(), DbError>>,
}

/// Messages understood by the control loops.
pub(crate) enum Command<H> {
    Execute(StatementRequest<H>),
    Commit,
    Rollback,
}

/// Handle to a running transaction actor.
///
/// Cheap to clone; all clones feed the same actor.
pub struct Transaction<H> {
    commands: mpsc::UnboundedSender<Command<H>>,
    outcome: Arc<Mutex<Option<oneshot::Receiver<Outcome>>>>,
}

impl<H: Send + 'static> Transaction<H> {
    /// Create the handle and the receiving ends handed to a control loop.
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<Command<H>>, Terminal) {
        let (commands, inbox) = mpsc::unbounded_channel();
        let (sender, receiver) = oneshot::channel();
        let handle = Self {
            commands,
            outcome: Arc::new(Mutex::new(Some(receiver))),
        };
        (handle, inbox, Terminal::new(sender))
    }

    /// Queue `statement` and wait until the actor has processed it.
    ///
    /// Waits for this one statement only, never for the transaction to
    /// finish. On the batch actor "processed" means staged.
    ///
    /// # Errors
    ///
    /// Returns the statement's own failure. If the actor could not start,
    /// every statement queued before commit or rollback gets the startup
    /// failure (for example [`DbError::ConnectionNotInitialized`]). Once
    /// the actor has terminated, returns [`DbError::TransactionClosed`].
    pub async fn execute_statement<S>(&self, statement: S) -> Result<(), DbError>
    where
        S: Executable<H> + 'static,
    {
        let (reply, ack) = oneshot::channel();
        let request = StatementRequest {
            statement: Box::new(statement),
            span: Span::current(),
            reply,
        };
        self.commands
            .send(Command::Execute(request))
            .map_err(|closed| actor_gone(&closed))?;
        ack.await.map_err(|dropped| actor_gone(&dropped))?
    }

    /// Ask the actor to commit. Returns immediately; the outcome arrives on
    /// [`Transaction::subscribe_error`].
    pub fn commit(&self) {
        if let Err(closed) = self.commands.send(Command::Commit) {
            tracing::debug!(error = %closed, "commit sent to a terminated transaction");
        }
    }

    /// Ask the actor to roll back. Returns immediately; the outcome arrives
    /// on [`Transaction::subscribe_error`].
    pub fn rollback(&self) {
        if let Err(closed) = self.commands.send(Command::Rollback) {
            tracing::debug!(error = %closed, "rollback sent to a terminated transaction");
        }
    }

    /// The one-shot terminal subscription.
    ///
    /// Only the first call across all clones gets the live subscription;
    /// later calls get one that is already closed.
    pub fn subscribe_error(&self) -> Subscription {
        let receiver = self
            .outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Subscription { receiver }
    }

    /// Whether the actor has stopped accepting commands.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

impl<H> Clone for Transaction<H> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            outcome: Arc::clone(&self.outcome),
        }
    }
}

impl<H> std::fmt::Debug for Transaction<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("closed", &self.commands.is_closed())
            .finish_non_exhaustive()
    }
}

fn actor_gone(err: &dyn std::fmt::Display) -> DbError {
    tracing::debug!(error = %err, "transaction actor is gone");
    DbError::TransactionClosed
}

/// Receives the single terminal value of a transaction.
#[derive(Debug)]
pub struct Subscription {
    receiver: Option<oneshot::Receiver<Outcome>>,
}

impl Subscription {
    /// Wait for the terminal value.
    ///
    /// Returns `None` if this subscription was already handed out
    /// elsewhere, or if the actor vanished without reporting.
    pub async fn recv(self) -> Option<Outcome> {
        match self.receiver {
            Some(receiver) => receiver.await.ok(),
            None => None,
        }
    }
}

/// Sending side of the terminal subscription, owned by a control loop.
///
/// Delivers at most one value; dropping it closes the subscription.
#[derive(Debug)]
pub(crate) struct Terminal {
    sender: Option<oneshot::Sender<Outcome>>,
}

impl Terminal {
    const fn new(sender: oneshot::Sender<Outcome>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// Report `outcome` unless a terminal value was already reported.
    pub(crate) fn publish(&mut self, outcome: Outcome) {
        match self.sender.take() {
            Some(sender) => {
                if sender.send(outcome).is_err() {
                    tracing::debug!("transaction outcome dropped, nobody subscribed");
                }
            }
            None => {
                if let Err(err) = outcome {
                    tracing::debug!(error = %err, "later transaction failure not reported, outcome already delivered");
                }
            }
        }
    }
}

/// Extra time a rollback issued on the way out of a loop gets past the
/// transaction deadline.
pub(crate) const ROLLBACK_GRACE: Duration = Duration::from_secs(5);

/// Deadline for a cleanup rollback: `deadline` plus [`ROLLBACK_GRACE`].
pub(crate) fn cleanup_deadline(deadline: Option<Instant>) -> Option<Instant> {
    deadline.map(|at| at.checked_add(ROLLBACK_GRACE).unwrap_or(at))
}

/// Finish an actor that could not start.
///
/// `err` goes on the subscription right away and is the acknowledgement of
/// every statement that arrives until commit, rollback, the last handle
/// dropping, or the deadline.
pub(crate) async fn refuse_all<H>(
    inbox: &mut mpsc::UnboundedReceiver<Command<H>>,
    deadline: Option<Instant>,
    mut terminal: Terminal,
    err: DbError,
) {
    terminal.publish(Err(err.clone()));
    let mut refused: u64 = 0;
    while let Ok(Some(command)) = next_command(inbox, deadline).await {
        match command {
            Command::Execute(StatementRequest { reply, .. }) => {
                refused = refused.saturating_add(1);
                if reply.send(Err(err.clone())).is_err() {
                    tracing::debug!("statement caller went away before acknowledgement");
                }
            }
            Command::Commit | Command::Rollback => break,
        }
    }
    tracing::debug!(refused, error = %err, "transaction that never started closed");
}

/// Wait for the next command, giving up at `deadline`.
pub(crate) async fn next_command<H>(
    inbox: &mut mpsc::UnboundedReceiver<Command<H>>,
    deadline: Option<Instant>,
) -> Result<Option<Command<H>>, DbError> {
    crate::backend::within(deadline, "waiting for commit or rollback", async {
        Ok(inbox.recv().await)
    })
    .await
}

/// Spawn `control_loop` on the current runtime.
pub(crate) fn spawn<F>(control_loop: F) -> Result<(), DbError>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let runtime = tokio::runtime::Handle::try_current()
        .map_err(|err| DbError::Runtime(format!("no runtime to start transaction on: {err}")))?;
    drop(runtime.spawn(control_loop));
    Ok(())
}
