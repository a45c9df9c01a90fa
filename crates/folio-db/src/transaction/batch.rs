//! Batch transaction actor for stores whose only transactional primitive
//! is one all-or-nothing submission.
//!
//! Statements are staged as they arrive and acknowledged as soon as they
//! are staged. Nothing reaches the backend before `Commit`, which opens a
//! batch, runs every staged statement against it in arrival order and
//! submits it in one call.
//!
//! `Rollback` drops the staged statements and reports success. The store
//! has no real rollback: once a batch is submitted it cannot be undone, and
//! this actor does not pretend otherwise.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{Instrument as _, Span};

use super::{
    Command, StatementRequest, Terminal, Transaction, TransactionManager, cleanup_deadline,
    next_command, refuse_all, spawn,
};
use crate::backend::{Backend, within};
use crate::error::DbError;
use crate::registry::ConnectionRegistry;
use crate::statement::{BoxedStatement, Executable as _};

/// Starts batch transaction actors over backend `B`.
#[derive(Debug)]
pub struct BatchManager<B> {
    registry: Arc<ConnectionRegistry<B>>,
}

impl<B> BatchManager<B> {
    /// A manager taking its connection from `registry`.
    pub const fn new(registry: Arc<ConnectionRegistry<B>>) -> Self {
        Self { registry }
    }

    /// The registry actors draw their connection from.
    pub const fn registry(&self) -> &Arc<ConnectionRegistry<B>> {
        &self.registry
    }
}

impl<B> Clone for BatchManager<B> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<B: Backend> TransactionManager for BatchManager<B> {
    type Handle = B::Handle;

    fn get_and_start(&self, deadline: Option<Instant>) -> Result<Transaction<B::Handle>, DbError> {
        let (transaction, inbox, terminal) = Transaction::channel();
        let registry = Arc::clone(&self.registry);
        spawn(run(registry, deadline, inbox, terminal).in_current_span())?;
        Ok(transaction)
    }
}

async fn run<B: Backend>(
    registry: Arc<ConnectionRegistry<B>>,
    deadline: Option<Instant>,
    mut inbox: mpsc::UnboundedReceiver<Command<B::Handle>>,
    mut terminal: Terminal,
) {
    let backend = match registry.get() {
        Ok(backend) => backend,
        Err(err) => {
            tracing::warn!(error = %err, "batch transaction could not acquire a connection");
            refuse_all(&mut inbox, deadline, terminal, err).await;
            return;
        }
    };

    let mut staged: Vec<(BoxedStatement<B::Handle>, Span)> = Vec::new();
    loop {
        let command = match next_command(&mut inbox, deadline).await {
            Ok(Some(command)) => command,
            Ok(None) => {
                tracing::debug!(
                    discarded = staged.len(),
                    "all transaction handles dropped, discarding batch"
                );
                terminal.publish(Err(DbError::TransactionClosed));
                return;
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    discarded = staged.len(),
                    "transaction deadline passed, discarding batch"
                );
                terminal.publish(Err(err));
                return;
            }
        };

        match command {
            Command::Execute(StatementRequest {
                statement,
                span,
                reply,
            }) => {
                staged.push((statement, span));
                if reply.send(Ok(())).is_err() {
                    tracing::debug!("statement caller went away before acknowledgement");
                }
            }
            Command::Commit => {
                let count = staged.len();
                let outcome = submit(backend.as_ref(), staged, deadline).await;
                match &outcome {
                    Ok(()) => tracing::debug!(statements = count, "batch submitted"),
                    Err(err) => tracing::warn!(error = %err, statements = count, "batch submission failed"),
                }
                terminal.publish(outcome);
                return;
            }
            Command::Rollback => {
                tracing::debug!(
                    discarded = staged.len(),
                    "batch discarded, nothing was sent to the backend"
                );
                terminal.publish(Ok(()));
                return;
            }
        }
    }
}

/// Build the batch from every staged statement and submit it once.
async fn submit<B: Backend>(
    backend: &B,
    staged: Vec<(BoxedStatement<B::Handle>, Span)>,
    deadline: Option<Instant>,
) -> Result<(), DbError> {
    let mut handle = within(deadline, "opening batch", backend.begin()).await?;
    for (mut statement, span) in staged {
        let staged_ok = within(deadline, "staging statement", statement.execute_in(&mut handle))
            .instrument(span)
            .await;
        if let Err(err) = staged_ok {
            let discarded = within(
                cleanup_deadline(deadline),
                "discarding unsent batch",
                backend.rollback(handle),
            )
            .await;
            if let Err(discard_err) = discarded {
                tracing::debug!(error = %discard_err, "discarding unsent batch failed");
            }
            return Err(err.context("batch not submitted"));
        }
    }
    within(deadline, "submitting batch", backend.commit(handle)).await
}
