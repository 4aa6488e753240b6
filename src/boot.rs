use std::fmt;
use std::sync::Arc;

use log::info;

use crate::core::{CoreError, Principal, Result};
use crate::enums::EnumEnsurer;
use crate::executor::{BehaviorChain, Executor};
use crate::identity::IdentityProvider;
use crate::readonly::{ReadOnlyStatus, Repository};
use crate::registry::{
    AssembledComponents, ComponentRegistry, ComponentSpec, GuardMode, GuardReport, RegistryGuard,
};
use crate::startup::{CheckOutcome, CheckRunner, EnumSyncCheck, PatchVersionCheck, StartupCheck};
use crate::store::Store;

/// Build facts stamped into check markers
#[derive(Debug, Clone)]
pub struct BootProfile {
    /// Version of this build
    pub version: String,

    /// Schema patch level this build expects
    pub patch: u32,
}

impl BootProfile {
    pub fn new(version: &str) -> Self {
        Self {
            version: version.to_string(),
            patch: 0,
        }
    }

    /// Set the patch level
    pub fn patch(mut self, patch: u32) -> Self {
        self.patch = patch;
        self
    }

    /// Validate the profile
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.version.trim().is_empty() {
            return Err("version cannot be empty".to_string());
        }
        Ok(())
    }
}

impl Default for BootProfile {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_VERSION"))
    }
}

/// Everything a late-bound startup check may need
pub struct BootServices {
    pub executor: Arc<Executor>,
    pub ensurer: Arc<EnumEnsurer>,
    pub status: ReadOnlyStatus,
    pub profile: BootProfile,
}

type CheckFactory = Box<dyn FnOnce(&BootServices) -> Arc<dyn StartupCheck> + Send>;

/// Orders the boot steps: probe, guard, assemble, then repair
///
/// The sequence owns the rule that the read-only probe happens before
/// anything that writes, and that startup checks only run against a
/// writable database. A failing check aborts the boot.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use privexec::{BootProfile, BootSequence, DirRepository, LocalIdentity, MemStore};
///
/// # tokio_test::block_on(async {
/// let core = BootSequence::new(
///     Arc::new(MemStore::new()),
///     Arc::new(DirRepository::new("/data/repository")),
///     Arc::new(LocalIdentity::new()),
/// )
/// .profile(BootProfile::new("1.0.0").patch(1))
/// .run()
/// .await
/// .unwrap();
///
/// println!("booted: {}", core.status());
/// # });
/// ```
pub struct BootSequence {
    store: Arc<dyn Store>,
    repository: Arc<dyn Repository>,
    identity: Arc<dyn IdentityProvider>,
    profile: BootProfile,
    chain: BehaviorChain,
    registry: ComponentRegistry,
    guard_mode: GuardMode,
    standard_checks: bool,
    check_factories: Vec<CheckFactory>,
}

impl BootSequence {
    pub fn new(
        store: Arc<dyn Store>,
        repository: Arc<dyn Repository>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            store,
            repository,
            identity,
            profile: BootProfile::default(),
            chain: BehaviorChain::standard(),
            registry: ComponentRegistry::new(),
            guard_mode: GuardMode::Prune,
            standard_checks: true,
            check_factories: Vec::new(),
        }
    }

    /// Set the boot profile
    pub fn profile(mut self, profile: BootProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Replace the default behavior chain
    pub fn chain(mut self, chain: BehaviorChain) -> Self {
        self.chain = chain;
        self
    }

    /// Let the guard substitute declared read-only fallbacks instead of
    /// pruning
    pub fn substituting_guard(mut self) -> Self {
        self.guard_mode = GuardMode::Substitute;
        self
    }

    /// Skip the built-in patch and enumeration checks
    pub fn without_standard_checks(mut self) -> Self {
        self.standard_checks = false;
        self
    }

    /// Declare an assembly component
    pub fn declare_component(mut self, spec: ComponentSpec) -> Result<Self> {
        self.registry.declare(spec)?;
        Ok(self)
    }

    /// Add a startup check built once the executor exists
    pub fn with_check<F>(mut self, factory: F) -> Self
    where
        F: FnOnce(&BootServices) -> Arc<dyn StartupCheck> + Send + 'static,
    {
        self.check_factories.push(Box::new(factory));
        self
    }

    pub async fn run(self) -> Result<BootedCore> {
        self.profile.validate().map_err(CoreError::Config)?;
        info!(
            "boot: starting (version={}, patch={})",
            self.profile.version, self.profile.patch
        );

        let status = ReadOnlyStatus::detect(self.store.as_ref(), self.repository.as_ref()).await;

        let mut registry = self.registry;
        let guard = match self.guard_mode {
            GuardMode::Prune => RegistryGuard::pruning(status),
            GuardMode::Substitute => RegistryGuard::substituting(status),
        };
        let report = guard.apply(&mut registry);
        if !report.is_empty() {
            info!("boot: {report}");
        }
        let components = registry.assemble()?;

        let executor = Arc::new(Executor::new(
            self.store.clone(),
            self.identity.clone(),
            self.chain.clone(),
        ));
        let ensurer = Arc::new(EnumEnsurer::new(executor.clone(), status));
        let runner = CheckRunner::new(executor.clone(), self.profile.clone());

        let services = BootServices {
            executor: executor.clone(),
            ensurer: ensurer.clone(),
            status,
            profile: self.profile.clone(),
        };
        let mut checks: Vec<Arc<dyn StartupCheck>> = Vec::new();
        if self.standard_checks {
            checks.push(Arc::new(PatchVersionCheck::new(
                executor.clone(),
                self.profile.clone(),
            )));
            checks.push(Arc::new(EnumSyncCheck::standard_baseline(
                ensurer.clone(),
                Principal::root(),
            )));
        }
        for factory in self.check_factories {
            checks.push(factory(&services));
        }

        let check_outcomes = if checks.is_empty() {
            Vec::new()
        } else if status.is_db_read_only() {
            info!(
                "boot: skipping {} startup checks, the database is read-only",
                checks.len()
            );
            Vec::new()
        } else {
            runner.run_all(&checks).await?
        };

        info!(
            "boot: complete ({} components, {} checks run)",
            components.len(),
            check_outcomes.len()
        );

        Ok(BootedCore {
            status,
            components,
            executor,
            ensurer,
            runner,
            guard_report: report,
            check_outcomes,
        })
    }
}

/// The assembled core a successful boot hands back
pub struct BootedCore {
    status: ReadOnlyStatus,
    components: AssembledComponents,
    executor: Arc<Executor>,
    ensurer: Arc<EnumEnsurer>,
    runner: CheckRunner,
    guard_report: GuardReport,
    check_outcomes: Vec<(String, CheckOutcome)>,
}

impl fmt::Debug for BootedCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootedCore")
            .field("status", &self.status)
            .field("guard_report", &self.guard_report)
            .field("check_outcomes", &self.check_outcomes)
            .finish_non_exhaustive()
    }
}

impl BootedCore {
    pub fn status(&self) -> ReadOnlyStatus {
        self.status
    }

    pub fn components(&self) -> &AssembledComponents {
        &self.components
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    pub fn ensurer(&self) -> &Arc<EnumEnsurer> {
        &self.ensurer
    }

    pub fn check_runner(&self) -> &CheckRunner {
        &self.runner
    }

    pub fn guard_report(&self) -> &GuardReport {
        &self.guard_report
    }

    pub fn check_outcomes(&self) -> &[(String, CheckOutcome)] {
        &self.check_outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profile_uses_crate_version() {
        let profile = BootProfile::default();
        assert!(!profile.version.is_empty());
        assert_eq!(profile.patch, 0);
        assert!(profile.validate().is_ok());
    }

    #[test]
    fn test_profile_builder() {
        let profile = BootProfile::new("5.2.1").patch(3);
        assert_eq!(profile.version, "5.2.1");
        assert_eq!(profile.patch, 3);
    }

    #[test]
    fn test_empty_version_rejected() {
        assert!(BootProfile::new("  ").validate().is_err());
    }
}
