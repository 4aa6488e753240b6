// ============================================================================
// PrivExec Library
// ============================================================================

pub mod boot;
pub mod core;
pub mod enums;
pub mod executor;
pub mod identity;
pub mod readonly;
pub mod registry;
pub mod startup;
pub mod store;

// Re-export main types for convenience
pub use boot::{BootProfile, BootSequence, BootServices, BootedCore};
pub use core::{
    CoreError, FailureKind, Principal, Result, SqlWork, Work, WorkFailure, WorkResult,
};
pub use enums::EnumEnsurer;

// Re-export execution API
pub use executor::{
    AdmissionPolicy, AdmissionStats, BehaviorChain, BoundedExecutor, CallBehavior, CallContext,
    CallInfo, Executor, ExecutorStats, Session, StoreSession, TaskHandle,
};
pub use identity::{IdentityProvider, LocalIdentity, SessionToken};

// Re-export boot-time machinery
pub use readonly::{DirRepository, ReadOnlyStatus, Repository, SealedRepository};
pub use registry::{
    AssembledComponents, ComponentRegistry, ComponentSpec, GuardReport, RegistryGuard,
};
pub use startup::{CheckOutcome, CheckRunner, EnumSyncCheck, PatchVersionCheck, StartupCheck};
pub use store::{EnumId, MemStore, Store, StoreImage, TxnId, TxnMode};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct RecordVisit;

    #[async_trait]
    impl Work for RecordVisit {
        type Output = Option<String>;

        fn description(&self) -> &str {
            "record a visit"
        }

        async fn run(&self, session: &Session) -> WorkResult<Option<String>> {
            session
                .update_or_insert_config_value("last.visitor", session.principal().name.as_str())
                .await?;
            Ok(session.config_value("last.visitor").await?)
        }
    }

    #[tokio::test]
    async fn test_boot_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let core = BootSequence::new(
            Arc::new(MemStore::new()),
            Arc::new(DirRepository::new(dir.path())),
            Arc::new(LocalIdentity::new()),
        )
        .profile(BootProfile::new("1.0.0").patch(1))
        .run()
        .await
        .unwrap();

        assert!(core.status().is_fully_writable());
        assert_eq!(core.check_outcomes().len(), 2);
    }

    #[tokio::test]
    async fn test_execute_through_booted_core() {
        let dir = tempfile::tempdir().unwrap();
        let core = BootSequence::new(
            Arc::new(MemStore::new()),
            Arc::new(DirRepository::new(dir.path())),
            Arc::new(LocalIdentity::new()),
        )
        .run()
        .await
        .unwrap();

        let cx = CallContext::new();
        let visitor = core
            .executor()
            .execute(&cx, Some(Principal::new("alice")), &RecordVisit)
            .await
            .unwrap();
        assert_eq!(visitor.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_read_only_boot_still_comes_up() {
        let core = BootSequence::new(
            Arc::new(MemStore::read_only()),
            Arc::new(SealedRepository),
            Arc::new(LocalIdentity::new()),
        )
        .run()
        .await
        .unwrap();

        assert!(core.status().is_db_read_only());
        assert!(core.status().is_repo_read_only());
        // checks are skipped rather than attempted against a store
        // that cannot record their markers
        assert!(core.check_outcomes().is_empty());
    }
}
