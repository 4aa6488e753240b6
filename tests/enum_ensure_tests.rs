/// Enumeration ensuring tests
///
/// Batch lookup-or-create of enum rows across writable and read-only stores
/// Run with: cargo test --test enum_ensure_tests

use privexec::{
    BehaviorChain, BootProfile, BootSequence, CheckRunner, DirRepository, EnumEnsurer,
    EnumSyncCheck, Executor, LocalIdentity, MemStore, Principal, ReadOnlyStatus, SealedRepository,
    Store, TxnMode,
};
use std::sync::Arc;
use tokio::sync::Barrier;

fn ensurer_over(store: Arc<MemStore>) -> (Arc<Executor>, Arc<EnumEnsurer>) {
    let executor = Arc::new(Executor::new(
        store,
        Arc::new(LocalIdentity::new()),
        BehaviorChain::standard(),
    ));
    let ensurer = Arc::new(EnumEnsurer::new(
        executor.clone(),
        ReadOnlyStatus::writable(),
    ));
    (executor, ensurer)
}

async fn lookup(store: &MemStore, class: &str, value: &str) -> Option<privexec::EnumId> {
    let txn = store.begin(TxnMode::ReadOnly).await.unwrap();
    let id = store.enum_id(txn, class, value).await.unwrap();
    store.rollback(txn).await.unwrap();
    id
}

#[tokio::test]
async fn test_ids_are_stable_across_executors() {
    let store = Arc::new(MemStore::new());

    let (_, first) = ensurer_over(store.clone());
    let ids = first
        .ensure(Principal::new("alice"), "JobStatus", &["Queued", "Running"])
        .await
        .unwrap();

    // a separate executor over the same store resolves the same rows
    let (_, second) = ensurer_over(store.clone());
    let again = second
        .ensure(Principal::new("bob"), "JobStatus", &["Queued", "Running"])
        .await
        .unwrap();

    assert_eq!(ids, again);
    assert!(ids.iter().all(Option::is_some));
}

#[tokio::test]
async fn test_concurrent_ensure_converges_to_one_row_per_value() {
    let store = Arc::new(MemStore::new());
    let (_, ensurer) = ensurer_over(store.clone());

    let num_tasks = 8;
    let barrier = Arc::new(Barrier::new(num_tasks));
    let mut handles = Vec::new();

    for _ in 0..num_tasks {
        let ensurer = ensurer.clone();
        let barrier = barrier.clone();

        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            ensurer
                .ensure(
                    Principal::new("worker"),
                    "JobStatus",
                    &["Queued", "Running", "Done"],
                )
                .await
                .unwrap()
        }));
    }

    let mut racer_ids = Vec::new();
    for handle in handles {
        racer_ids.push(handle.await.unwrap());
    }

    // racing transactions never duplicate a value
    let stats = store.stats().await;
    assert_eq!(stats.enum_classes, 1);
    assert_eq!(stats.enum_values, 3);

    // every task holds the ids later callers resolve, losing a commit
    // race never hands out an id without a row
    let final_ids = ensurer
        .ensure(
            Principal::new("late"),
            "JobStatus",
            &["Queued", "Running", "Done"],
        )
        .await
        .unwrap();
    assert!(final_ids.iter().all(Option::is_some));
    for (task_id, ids) in racer_ids.iter().enumerate() {
        assert_eq!(ids, &final_ids, "task {task_id} holds unresolvable ids");
    }
}

#[tokio::test]
async fn test_classes_are_independent_namespaces() {
    let store = Arc::new(MemStore::new());
    let (_, ensurer) = ensurer_over(store.clone());

    let event = ensurer
        .ensure(Principal::new("alice"), "EventType", &["User"])
        .await
        .unwrap();
    let job = ensurer
        .ensure(Principal::new("alice"), "JobStatus", &["User"])
        .await
        .unwrap();

    // same value string, different rows
    assert_ne!(event[0], job[0]);
    assert!(lookup(&store, "EventType", "User").await.is_some());
    assert!(lookup(&store, "JobStatus", "User").await.is_some());
}

#[tokio::test]
async fn test_boot_creates_the_standard_baseline() {
    let repo_dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemStore::new());

    BootSequence::new(
        store.clone(),
        Arc::new(DirRepository::new(repo_dir.path())),
        Arc::new(LocalIdentity::new()),
    )
    .run()
    .await
    .unwrap();

    for value in ["Bootstrap", "Internal", "User"] {
        assert!(
            lookup(&store, "EventType", value).await.is_some(),
            "EventType '{value}' missing after boot"
        );
    }
    for value in ["Queued", "Running", "Done", "Failed"] {
        assert!(
            lookup(&store, "JobStatus", value).await.is_some(),
            "JobStatus '{value}' missing after boot"
        );
    }
}

#[tokio::test]
async fn test_custom_baseline_through_the_check_runner() {
    let store = Arc::new(MemStore::new());
    let (executor, ensurer) = ensurer_over(store.clone());

    let check = EnumSyncCheck::new(ensurer, Principal::root())
        .with_class("Color", &["Red", "Blue"]);
    let runner = CheckRunner::new(executor, BootProfile::new("1.0.0"));

    runner.start(&check).await.unwrap();

    assert!(lookup(&store, "Color", "Red").await.is_some());
    assert!(lookup(&store, "Color", "Blue").await.is_some());
}

#[tokio::test]
async fn test_read_only_boot_leaves_baseline_unresolved() {
    // a read-only deployment cannot create the baseline, but ensure
    // still answers for the rows that do exist
    let store = Arc::new(MemStore::read_only());

    let core = BootSequence::new(
        store.clone(),
        Arc::new(SealedRepository),
        Arc::new(LocalIdentity::new()),
    )
    .run()
    .await
    .unwrap();

    let ids = core
        .ensurer()
        .ensure(Principal::root(), "EventType", &["Bootstrap"])
        .await
        .unwrap();
    assert_eq!(ids, vec![None]);

    // and nothing was created behind the read-only flag
    let stats = store.stats().await;
    assert_eq!(stats.enum_values, 0);
}
