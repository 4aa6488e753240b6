/// Bounded admission tests
///
/// Permit pool behavior in front of background task launches
/// Run with: cargo test --test admission_tests

use privexec::{
    AdmissionPolicy, BehaviorChain, BoundedExecutor, CallContext, CoreError, Executor,
    LocalIdentity, MemStore, Principal, Session, Store, TxnMode, Work, WorkFailure, WorkResult,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;

#[tokio::test]
async fn test_pool_caps_concurrency() {
    let pool = BoundedExecutor::new(AdmissionPolicy::new(2)).unwrap();
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..6 {
        let running = running.clone();
        let peak = peak.clone();

        let handle = pool
            .execute("burst member", async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, WorkFailure>(())
            })
            .await
            .unwrap();
        handles.push(handle);
    }

    for handle in handles {
        handle.get().await.unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(pool.stats().launched, 6);
    assert_eq!(pool.stats().rejected, 0);
}

#[tokio::test]
async fn test_rejection_names_the_task() {
    let pool = BoundedExecutor::new(
        AdmissionPolicy::new(1).acquire_timeout(Duration::from_millis(20)),
    )
    .unwrap();
    let (tx, rx) = oneshot::channel::<()>();

    let held = pool
        .execute("long export", async move {
            let _ = rx.await;
            Ok::<_, WorkFailure>(())
        })
        .await
        .unwrap();

    let err = pool
        .execute("queued import", async { Ok::<_, WorkFailure>(()) })
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::AdmissionRejected(_)));
    assert!(err.to_string().contains("queued import"));

    tx.send(()).unwrap();
    held.get().await.unwrap();
}

#[tokio::test]
async fn test_task_failure_surfaces_through_handle() {
    let pool = BoundedExecutor::new(AdmissionPolicy::new(2)).unwrap();

    let handle: privexec::TaskHandle<()> = pool
        .execute("doomed job", async {
            Err(WorkFailure::recoverable("source went away"))
        })
        .await
        .unwrap();

    let err = handle.get().await.unwrap_err();
    assert!(matches!(err, CoreError::Internal { .. }));
    assert!(err.to_string().contains("source went away"));
}

#[tokio::test]
async fn test_shutdown_lets_running_tasks_finish() {
    let pool = BoundedExecutor::new(AdmissionPolicy::new(2)).unwrap();
    let (tx, rx) = oneshot::channel::<()>();

    let held = pool
        .execute("in flight", async move {
            let _ = rx.await;
            Ok::<_, WorkFailure>("done")
        })
        .await
        .unwrap();

    pool.shutdown();

    let err = pool
        .execute("too late", async { Ok::<_, WorkFailure>("never") })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("shut down"));

    tx.send(()).unwrap();
    assert_eq!(held.get().await.unwrap(), "done");
}

struct RecordLaunch {
    key: &'static str,
}

#[async_trait]
impl Work for RecordLaunch {
    type Output = ();

    fn description(&self) -> &str {
        "record a launch"
    }

    async fn run(&self, session: &Session) -> WorkResult<()> {
        session
            .update_or_insert_config_value(self.key, "launched")
            .await?;
        Ok(())
    }
}

#[tokio::test]
async fn test_privileged_work_runs_inside_admitted_task() {
    let store = Arc::new(MemStore::new());
    let executor = Arc::new(Executor::new(
        store.clone(),
        Arc::new(LocalIdentity::new()),
        BehaviorChain::standard(),
    ));
    let pool = BoundedExecutor::new(AdmissionPolicy::new(4)).unwrap();

    let exec = executor.clone();
    let handle = pool
        .execute("background launch", async move {
            let cx = CallContext::new();
            exec.execute(
                &cx,
                Some(Principal::new("worker")),
                &RecordLaunch { key: "bg.launch" },
            )
            .await
            .map_err(WorkFailure::from)
        })
        .await
        .unwrap();

    handle.get().await.unwrap();

    let txn = store.begin(TxnMode::ReadOnly).await.unwrap();
    let value = store.config_value(txn, "bg.launch").await.unwrap();
    store.rollback(txn).await.unwrap();
    assert_eq!(value.as_deref(), Some("launched"));
}

#[tokio::test]
async fn test_many_tasks_through_small_pool() {
    let pool = Arc::new(BoundedExecutor::new(AdmissionPolicy::new(3)).unwrap());
    let completed = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..12 {
        let completed = completed.clone();
        let handle = pool
            .execute("small step", async move {
                completed.fetch_add(1, Ordering::SeqCst);
                Ok::<_, WorkFailure>(())
            })
            .await
            .unwrap();
        handles.push(handle);
    }

    for handle in handles {
        handle.get().await.unwrap();
    }

    assert_eq!(completed.load(Ordering::SeqCst), 12);
    let stats = pool.stats();
    assert_eq!(stats.launched, 12);
    assert_eq!(stats.available, 3);
}
