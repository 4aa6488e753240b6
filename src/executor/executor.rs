use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::warn;
use tokio::task::JoinHandle;
use tracing::{Instrument, Level, event, info_span};

use crate::core::work::{SqlWork, Work, WorkResult};
use crate::core::{CoreError, Principal, Result};
use crate::executor::behavior::{BehaviorChain, BehaviorFuture, CallInfo};
use crate::executor::context::{ActiveLogin, CallContext, Session, StoreSession};
use crate::identity::IdentityProvider;
use crate::store::Store;

/// Call counters for an [`Executor`]
#[derive(Debug, Clone)]
pub struct ExecutorStats {
    pub executed: u64,
    pub failed: u64,
    pub sql_executed: u64,
    pub submitted: u64,
}

impl fmt::Display for ExecutorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Executor: {} calls ({} failed), {} direct, {} submitted",
            self.executed, self.failed, self.sql_executed, self.submitted
        )
    }
}

#[derive(Default)]
struct Counters {
    executed: AtomicU64,
    failed: AtomicU64,
    sql_executed: AtomicU64,
    submitted: AtomicU64,
}

/// Runs typed units of work under login, transaction, and behavior
/// chain management
///
/// The contract for a fresh call is strict: exactly one login, exactly
/// one transaction, and a logout that happens whatever the work did.
/// Nested calls join the enclosing transaction and identity instead of
/// creating their own.
pub struct Executor {
    store: Arc<dyn Store>,
    identity: Arc<dyn IdentityProvider>,
    chain: BehaviorChain,
    counters: Counters,
}

impl Executor {
    pub fn new(
        store: Arc<dyn Store>,
        identity: Arc<dyn IdentityProvider>,
        chain: BehaviorChain,
    ) -> Self {
        Self {
            store,
            identity,
            chain,
            counters: Counters::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn chain(&self) -> &BehaviorChain {
        &self.chain
    }

    pub fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            executed: self.counters.executed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            sql_executed: self.counters.sql_executed.load(Ordering::Relaxed),
            submitted: self.counters.submitted.load(Ordering::Relaxed),
        }
    }

    /// Run a unit of work through the behavior chain
    ///
    /// With a principal, this is a fresh call: the executor logs in,
    /// opens a transaction in the mode the work asked for, and commits
    /// or rolls back around the outcome. Without a principal the call
    /// must be nested: it reuses the login and transaction already
    /// active on `context` and leaves their lifecycle to the owner.
    pub async fn execute<W: Work>(
        &self,
        context: &CallContext,
        principal: Option<Principal>,
        work: &W,
    ) -> Result<W::Output> {
        match principal {
            Some(principal) => self.execute_fresh(context, principal, work).await,
            None => self.execute_nested(context, work).await,
        }
    }

    async fn execute_fresh<W: Work>(
        &self,
        context: &CallContext,
        principal: Principal,
        work: &W,
    ) -> Result<W::Output> {
        context.reserve_fresh()?;

        let span = info_span!(
            "privileged_call",
            work = %work.description(),
            principal = %principal
        );

        async {
            let token = match self.identity.login(&principal).await {
                Ok(token) => token,
                Err(err) => {
                    context.abort_reservation();
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    return Err(err);
                }
            };

            let mode = work.transaction_mode();
            let txn = match self.store.begin(mode).await {
                Ok(txn) => txn,
                Err(err) => {
                    context.abort_reservation();
                    if let Err(logout_err) = self.identity.logout(token).await {
                        warn!("logout after failed begin also failed: {logout_err}");
                    }
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    return Err(err);
                }
            };

            let login = ActiveLogin {
                token,
                principal: principal.clone(),
                txn,
                mode,
            };
            if let Err(err) = context.activate(login) {
                // context was released from elsewhere mid-login
                if let Err(rb) = self.store.rollback(txn).await {
                    warn!("rollback after failed activation also failed: {rb}");
                }
                if let Err(logout_err) = self.identity.logout(token).await {
                    warn!("logout after failed activation also failed: {logout_err}");
                }
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                return Err(err);
            }

            event!(Level::DEBUG, txn = %txn, mode = %mode, "privileged call accepted");

            let session = Session::new(
                self.store.clone(),
                txn,
                mode,
                token,
                principal.clone(),
                context.clone(),
                false,
            );
            let call = CallInfo::new(work.description(), &principal, false);
            let outcome = self.run_through_chain(&call, &session, work).await;

            let outcome = match outcome {
                Ok(value) => match self.store.commit(txn).await {
                    Ok(()) => Ok(value),
                    Err(err) => {
                        if let Err(rb) = self.store.rollback(txn).await {
                            warn!("rollback after failed commit also failed: {rb}");
                        }
                        Err(err)
                    }
                },
                Err(err) => {
                    if let Err(rb) = self.store.rollback(txn).await {
                        warn!("rollback after call failure also failed: {rb}");
                    }
                    Err(err)
                }
            };

            // bookkeeping runs on every path, the outcome is never masked
            context.release();
            if let Err(logout_err) = self.identity.logout(token).await {
                warn!("logout failed for {token}: {logout_err}");
            }

            self.counters.executed.fetch_add(1, Ordering::Relaxed);
            match &outcome {
                Ok(_) => event!(Level::DEBUG, txn = %txn, "privileged call committed"),
                Err(err) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    event!(Level::WARN, txn = %txn, error = %err, "privileged call rolled back");
                }
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn execute_nested<W: Work>(
        &self,
        context: &CallContext,
        work: &W,
    ) -> Result<W::Output> {
        let Some(login) = context.active_login() else {
            return Err(CoreError::State(format!(
                "no active identity in this call context and no principal was given (work: {})",
                work.description()
            )));
        };

        let span = info_span!(
            "nested_call",
            work = %work.description(),
            txn = %login.txn
        );

        async {
            let session = Session::new(
                self.store.clone(),
                login.txn,
                login.mode,
                login.token,
                login.principal.clone(),
                context.clone(),
                true,
            );
            let call = CallInfo::new(work.description(), &login.principal, true);
            let outcome = self.run_through_chain(&call, &session, work).await;

            self.counters.executed.fetch_add(1, Ordering::Relaxed);
            if outcome.is_err() {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
            }
            outcome
        }
        .instrument(span)
        .await
    }

    /// Fold the behavior chain around the work body. The typed output
    /// leaves the erased chain through a slot the terminal future fills.
    async fn run_through_chain<W: Work>(
        &self,
        call: &CallInfo,
        session: &Session,
        work: &W,
    ) -> Result<W::Output> {
        let mut output: Option<W::Output> = None;
        let output_slot = &mut output;

        let terminal: BehaviorFuture<'_> = Box::pin(async move {
            let value = work.run(session).await?;
            *output_slot = Some(value);
            Ok(())
        });

        let chained = self.chain.apply(call, terminal);
        let result = chained.await;

        match result {
            Ok(()) => output.take().ok_or_else(|| {
                CoreError::internal("behavior chain reported success but produced no result")
            }),
            Err(failure) => Err(failure.into_core()),
        }
    }

    /// Run direct store work with no identity attached
    ///
    /// Fails fast when an identity is active on `context`: mixing
    /// direct store access into a privileged call would bypass the
    /// behavior chain it runs under. No chain, no login, just the
    /// transaction wrapper.
    pub async fn execute_sql<W: SqlWork>(
        &self,
        context: &CallContext,
        work: &W,
    ) -> Result<W::Output> {
        if context.is_busy() {
            return Err(CoreError::State(format!(
                "direct store work must not run with an identity active (work: {})",
                work.description()
            )));
        }

        let mode = work.transaction_mode();
        let txn = self.store.begin(mode).await?;
        let session = StoreSession::new(self.store.clone(), txn, mode);

        let result = work.run(&session).await;

        let outcome = match result {
            Ok(value) => match self.store.commit(txn).await {
                Ok(()) => Ok(value),
                Err(err) => {
                    if let Err(rb) = self.store.rollback(txn).await {
                        warn!("rollback after failed commit also failed: {rb}");
                    }
                    Err(err)
                }
            },
            Err(failure) => {
                if let Err(rb) = self.store.rollback(txn).await {
                    warn!("rollback after direct store failure also failed: {rb}");
                }
                Err(failure.into_core())
            }
        };

        self.counters.sql_executed.fetch_add(1, Ordering::Relaxed);
        if outcome.is_err() {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }

    /// Spawn a task on the shared runtime and hand back its handle
    ///
    /// Never blocks the caller. The outcome is collected later through
    /// [`TaskHandle::get`].
    pub fn submit<T, F>(&self, description: impl Into<String>, task: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: Future<Output = WorkResult<T>> + Send + 'static,
    {
        let description = description.into();
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        event!(Level::DEBUG, task = %description, "background task submitted");
        TaskHandle {
            description,
            handle: tokio::spawn(task),
        }
    }
}

/// Handle for a submitted background task
#[derive(Debug)]
pub struct TaskHandle<T> {
    description: String,
    handle: JoinHandle<WorkResult<T>>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(description: String, handle: JoinHandle<WorkResult<T>>) -> Self {
        Self {
            description,
            handle,
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Wait for the task and unwrap its outcome
    ///
    /// Failures map the same way as in `execute`. A panicked or
    /// cancelled task surfaces as an internal error naming the task
    /// instead of poisoning the caller.
    pub async fn get(self) -> Result<T> {
        match self.handle.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(failure)) => Err(failure.into_core()),
            Err(join_err) if join_err.is_cancelled() => Err(CoreError::internal(format!(
                "background task '{}' was cancelled",
                self.description
            ))),
            Err(join_err) => Err(CoreError::internal(format!(
                "background task '{}' panicked: {join_err}",
                self.description
            ))),
        }
    }
}
