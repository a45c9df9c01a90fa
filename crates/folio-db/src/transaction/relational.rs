//! Relational transaction actor.
//!
//! The loop opens a real transaction as soon as it starts and runs every
//! queued statement against it immediately. A failing statement is
//! acknowledged to its caller and reported on the subscription at once, but
//! the loop keeps going: the caller still decides between commit and
//! rollback.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::Instrument as _;

use super::{
    Command, StatementRequest, Terminal, Transaction, TransactionManager, cleanup_deadline,
    next_command, refuse_all, spawn,
};
use crate::backend::{Backend, within};
use crate::error::DbError;
use crate::registry::ConnectionRegistry;
use crate::statement::Executable as _;

/// Starts relational transaction actors over backend `B`.
#[derive(Debug)]
pub struct RelationalManager<B> {
    registry: Arc<ConnectionRegistry<B>>,
}

impl<B> RelationalManager<B> {
    /// A manager taking its connection from `registry`.
    pub const fn new(registry: Arc<ConnectionRegistry<B>>) -> Self {
        Self { registry }
    }

    /// The registry actors draw their connection from.
    pub const fn registry(&self) -> &Arc<ConnectionRegistry<B>> {
        &self.registry
    }
}

impl<B> Clone for RelationalManager<B> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<B: Backend> TransactionManager for RelationalManager<B> {
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
            tracing::warn!(error = %err, "relational transaction could not acquire a connection");
            refuse_all(&mut inbox, deadline, terminal, err).await;
            return;
        }
    };

    let mut handle = match within(deadline, "beginning transaction", backend.begin()).await {
        Ok(handle) => handle,
        Err(err) => {
            tracing::warn!(error = %err, "relational transaction failed to begin");
            refuse_all(&mut inbox, deadline, terminal, err).await;
            return;
        }
    };

    let cleanup = cleanup_deadline(deadline);
    let mut executed: u64 = 0;
    loop {
        let command = match next_command(&mut inbox, deadline).await {
            Ok(Some(command)) => command,
            Ok(None) => {
                tracing::debug!(executed, "all transaction handles dropped, rolling back");
                if let Err(err) =
                    within(cleanup, "rolling back abandoned transaction", backend.rollback(handle)).await
                {
                    tracing::warn!(error = %err, "rollback of abandoned transaction failed");
                }
                terminal.publish(Err(DbError::TransactionClosed));
                return;
            }
            Err(err) => {
                tracing::warn!(error = %err, executed, "transaction deadline passed, rolling back");
                if let Err(rollback_err) =
                    within(cleanup, "rolling back after deadline", backend.rollback(handle)).await
                {
                    tracing::warn!(error = %rollback_err, "rollback after deadline failed");
                }
                terminal.publish(Err(err));
                return;
            }
        };

        match command {
            Command::Execute(StatementRequest {
                mut statement,
                span,
                reply,
            }) => {
                let outcome = within(deadline, "executing statement", statement.execute_in(&mut handle))
                    .instrument(span)
                    .await;
                executed = executed.saturating_add(1);
                if let Err(err) = &outcome {
                    tracing::warn!(error = %err, "statement failed inside relational transaction");
                    terminal.publish(Err(err.clone()));
                }
                if reply.send(outcome).is_err() {
                    tracing::debug!("statement caller went away before acknowledgement");
                }
            }
            Command::Commit => {
                let outcome = within(deadline, "committing transaction", backend.commit(handle)).await;
                match &outcome {
                    Ok(()) => tracing::debug!(executed, "relational transaction committed"),
                    Err(err) => tracing::warn!(error = %err, executed, "relational commit failed"),
                }
                terminal.publish(outcome);
                return;
            }
            Command::Rollback => {
                if let Err(err) =
                    within(deadline, "rolling back transaction", backend.rollback(handle)).await
                {
                    tracing::warn!(error = %err, "relational rollback failed");
                }
                tracing::debug!(executed, "relational transaction rolled back");
                terminal.publish(Ok(()));
                return;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::kv::KvBatch;
    use crate::memory::MemoryKv;
    use crate::result::SingleResult;
    use crate::statement::Statement;
    use crate::transaction::ROLLBACK_GRACE;

    fn manager(kv: MemoryKv) -> (RelationalManager<MemoryKv>, Arc<ConnectionRegistry<MemoryKv>>) {
        let registry = Arc::new(ConnectionRegistry::with_connection(kv));
        (RelationalManager::new(Arc::clone(&registry)), registry)
    }

    fn counting_statement(
        key: String,
        runs: Arc<AtomicUsize>,
    ) -> Statement<KvBatch, SingleResult<usize>> {
        Statement::new(SingleResult::new(), move |batch: &mut KvBatch, order: &SingleResult<usize>| {
            Box::pin(async move {
                let position = runs.fetch_add(1, Ordering::SeqCst);
                batch.set_raw(key, position.to_string());
                order.set(position);
                Ok(())
            })
        })
    }

    /// Backend whose rollback never returns.
    #[derive(Debug, Default)]
    struct StuckRollback {
        rollback_started: AtomicBool,
    }

    impl Backend for StuckRollback {
        type Handle = ();

        async fn begin(&self) -> Result<(), DbError> {
            Ok(())
        }

        async fn commit(&self, (): ()) -> Result<(), DbError> {
            Ok(())
        }

        async fn rollback(&self, (): ()) -> Result<(), DbError> {
            self.rollback_started.store(true, Ordering::SeqCst);
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn concurrent_statements_are_each_executed_once() {
        let (manager, registry) = manager(MemoryKv::new());
        let tx = manager.get_and_start(None).unwrap();
        let runs = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for i in 0..32 {
            let tx = tx.clone();
            let stmt = counting_statement(format!("k{i}"), Arc::clone(&runs));
            tasks.push(tokio::spawn(async move { tx.execute_statement(stmt).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(runs.load(Ordering::SeqCst), 32);

        let subscription = tx.subscribe_error();
        tx.commit();
        subscription.recv().await.unwrap().unwrap();

        let kv = registry.get().unwrap();
        assert_eq!(kv.commit_count(), 1);
        assert!((0..32).all(|i| kv.contains_key(&format!("k{i}"))));
    }

    #[tokio::test]
    async fn statements_from_one_caller_keep_their_order() {
        let (manager, _registry) = manager(MemoryKv::new());
        let tx = manager.get_and_start(None).unwrap();
        let runs = Arc::new(AtomicUsize::new(0));

        let first = counting_statement("a".to_owned(), Arc::clone(&runs));
        let second = counting_statement("b".to_owned(), Arc::clone(&runs));
        let (first_pos, second_pos) = (first.result(), second.result());

        tx.execute_statement(first).await.unwrap();
        tx.execute_statement(second).await.unwrap();
        assert_eq!(first_pos.get(), Some(0));
        assert_eq!(second_pos.get(), Some(1));
        tx.rollback();
    }

    #[tokio::test]
    async fn commit_delivers_exactly_one_value() {
        let (manager, _registry) = manager(MemoryKv::new());
        let tx = manager.get_and_start(None).unwrap();
        let subscription = tx.subscribe_error();
        tx.commit();
        tx.commit();

        assert!(matches!(subscription.recv().await, Some(Ok(()))));
        assert!(tx.subscribe_error().recv().await.is_none());
    }

    #[tokio::test]
    async fn rollback_delivers_nil_and_discards_work() {
        let (manager, registry) = manager(MemoryKv::new());
        let tx = manager.get_and_start(None).unwrap();
        let subscription = tx.subscribe_error();
        let stmt = counting_statement("gone".to_owned(), Arc::new(AtomicUsize::new(0)));

        tx.execute_statement(stmt).await.unwrap();
        tx.rollback();

        assert!(matches!(subscription.recv().await, Some(Ok(()))));
        let kv = registry.get().unwrap();
        assert_eq!(kv.commit_count(), 0);
        assert!(!kv.contains_key("gone"));
    }

    #[tokio::test]
    async fn failure_is_reported_without_ending_the_loop() {
        let (manager, _registry) = manager(MemoryKv::new());
        let tx = manager.get_and_start(None).unwrap();
        let subscription = tx.subscribe_error();

        let failing = Statement::new(SingleResult::<u64>::new(), |_: &mut KvBatch, _: &SingleResult<u64>| {
            Box::pin(async { Err(DbError::KeyNotFound("article".to_owned())) })
        });
        let outcome = tx.execute_statement(failing).await;
        assert!(matches!(outcome, Err(DbError::KeyNotFound(_))));

        let reported = subscription.recv().await;
        assert!(matches!(reported, Some(Err(DbError::KeyNotFound(_)))));

        // Still running until told otherwise.
        let later = counting_statement("later".to_owned(), Arc::new(AtomicUsize::new(0)));
        tx.execute_statement(later).await.unwrap();
        tx.rollback();
    }

    #[tokio::test]
    async fn missing_connection_is_reported_to_subscription_and_statements() {
        let registry: Arc<ConnectionRegistry<MemoryKv>> = Arc::new(ConnectionRegistry::new());
        let manager = RelationalManager::new(registry);
        let tx = manager.get_and_start(None).unwrap();
        let subscription = tx.subscribe_error();

        let stmt = counting_statement("x".to_owned(), Arc::new(AtomicUsize::new(0)));
        assert!(matches!(
            tx.execute_statement(stmt).await,
            Err(DbError::ConnectionNotInitialized)
        ));
        assert!(matches!(
            subscription.recv().await,
            Some(Err(DbError::ConnectionNotInitialized))
        ));

        tx.rollback();
        let after = counting_statement("y".to_owned(), Arc::new(AtomicUsize::new(0)));
        assert!(matches!(
            tx.execute_statement(after).await,
            Err(DbError::TransactionClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_abandons_an_idle_transaction() {
        let (manager, registry) = manager(MemoryKv::new());
        let deadline = Instant::now() + Duration::from_millis(100);
        let tx = manager.get_and_start(Some(deadline)).unwrap();
        let subscription = tx.subscribe_error();

        assert!(matches!(
            subscription.recv().await,
            Some(Err(DbError::DeadlineExceeded(_)))
        ));
        assert_eq!(registry.get().unwrap().commit_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_rollback_after_deadline_is_abandoned() {
        let registry = Arc::new(ConnectionRegistry::with_connection(StuckRollback::default()));
        let manager = RelationalManager::new(Arc::clone(&registry));
        let deadline = Instant::now() + Duration::from_millis(100);
        let tx = manager.get_and_start(Some(deadline)).unwrap();
        let subscription = tx.subscribe_error();

        assert!(matches!(
            subscription.recv().await,
            Some(Err(DbError::DeadlineExceeded(_)))
        ));
        assert!(registry.get().unwrap().rollback_started.load(Ordering::SeqCst));
        assert!(Instant::now() >= deadline + ROLLBACK_GRACE);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_rollback_of_abandoned_transaction_is_bounded() {
        let registry = Arc::new(ConnectionRegistry::with_connection(StuckRollback::default()));
        let manager = RelationalManager::new(Arc::clone(&registry));
        let deadline = Instant::now() + Duration::from_secs(60);
        let tx = manager.get_and_start(Some(deadline)).unwrap();
        let subscription = tx.subscribe_error();
        drop(tx);

        assert!(matches!(subscription.recv().await, Some(Err(DbError::TransactionClosed))));
        assert!(registry.get().unwrap().rollback_started.load(Ordering::SeqCst));
    }
}
