use std::sync::Arc;

use async_trait::async_trait;
use log::{info, warn};

use crate::boot::BootProfile;
use crate::core::{Principal, WorkFailure, WorkResult};
use crate::enums::EnumEnsurer;
use crate::executor::{CallContext, Executor};
use crate::startup::{ReadConfigValue, StartupCheck, WriteConfigValue};

/// Configuration key the schema patch level is stored under
pub const SCHEMA_PATCH_KEY: &str = "schema.patch";

/// Verifies the store's schema patch level against this build
///
/// On first boot the current level is stamped. Afterwards a mismatch
/// aborts startup, running new code against an unpatched store is the
/// kind of damage boot exists to prevent. The done marker embeds the
/// build version, so every upgrade re-runs the verification.
pub struct PatchVersionCheck {
    executor: Arc<Executor>,
    profile: BootProfile,
}

impl PatchVersionCheck {
    pub fn new(executor: Arc<Executor>, profile: BootProfile) -> Self {
        Self { executor, profile }
    }
}

#[async_trait]
impl StartupCheck for PatchVersionCheck {
    fn key(&self) -> &str {
        "PatchVersionCheck"
    }

    fn description(&self) -> &str {
        "verify the store patch level matches this build"
    }

    fn check_done(&self) -> String {
        format!("done:{}:patch{}", self.profile.version, self.profile.patch)
    }

    async fn do_check(&self) -> WorkResult<()> {
        let context = CallContext::new();
        let recorded = self
            .executor
            .execute_sql(
                &context,
                &ReadConfigValue {
                    key: SCHEMA_PATCH_KEY.to_string(),
                },
            )
            .await?;

        match recorded {
            None => {
                self.executor
                    .execute_sql(
                        &context,
                        &WriteConfigValue {
                            key: SCHEMA_PATCH_KEY.to_string(),
                            value: self.profile.patch.to_string(),
                        },
                    )
                    .await?;
                info!("stamped schema patch level {}", self.profile.patch);
                Ok(())
            }
            Some(raw) => {
                let recorded: u32 = raw.parse().map_err(|_| {
                    WorkFailure::fatal(format!("schema patch level '{raw}' is not a number"))
                })?;
                if recorded != self.profile.patch {
                    return Err(WorkFailure::fatal(format!(
                        "store is at schema patch {recorded}, this build expects {}",
                        self.profile.patch
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Creates missing baseline enumeration rows
///
/// Delegates the read-only handling to [`EnumEnsurer`]: on a read-only
/// database unresolved values are logged and tolerated, so the check
/// still completes.
pub struct EnumSyncCheck {
    ensurer: Arc<EnumEnsurer>,
    principal: Principal,
    baseline: Vec<(String, Vec<String>)>,
}

impl EnumSyncCheck {
    pub fn new(ensurer: Arc<EnumEnsurer>, principal: Principal) -> Self {
        Self {
            ensurer,
            principal,
            baseline: Vec::new(),
        }
    }

    /// Add one class and its expected values to the baseline
    pub fn with_class(mut self, class: &str, values: &[&str]) -> Self {
        self.baseline.push((
            class.to_string(),
            values.iter().map(|v| v.to_string()).collect(),
        ));
        self
    }

    /// The baseline every deployment gets
    pub fn standard_baseline(ensurer: Arc<EnumEnsurer>, principal: Principal) -> Self {
        Self::new(ensurer, principal)
            .with_class("EventType", &["Bootstrap", "Internal", "User"])
            .with_class("JobStatus", &["Queued", "Running", "Done", "Failed"])
    }
}

#[async_trait]
impl StartupCheck for EnumSyncCheck {
    fn key(&self) -> &str {
        "EnumSyncCheck"
    }

    fn description(&self) -> &str {
        "create missing baseline enumeration rows"
    }

    async fn do_check(&self) -> WorkResult<()> {
        for (class, values) in &self.baseline {
            let refs: Vec<&str> = values.iter().map(String::as_str).collect();
            let ids = self
                .ensurer
                .ensure(self.principal.clone(), class, &refs)
                .await?;

            let unresolved = ids.iter().filter(|id| id.is_none()).count();
            if unresolved > 0 {
                warn!("{unresolved} enumeration values in '{class}' left unresolved");
            }
        }
        Ok(())
    }
}
