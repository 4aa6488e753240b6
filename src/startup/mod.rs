pub mod checks;

pub use checks::{EnumSyncCheck, PatchVersionCheck, SCHEMA_PATCH_KEY};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, error, info};

use crate::boot::BootProfile;
use crate::core::{CoreError, Result, SqlWork, WorkResult};
use crate::executor::{CallContext, Executor, StoreSession};
use crate::store::TxnMode;

/// Marker value meaning a check has nothing left to do
pub const DONE_TOKEN: &str = "done";

/// How a single check ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The persisted marker already matched, nothing ran
    AlreadyDone,
    /// The repair ran and the marker was advanced
    Completed,
}

impl fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckOutcome::AlreadyDone => write!(f, "already-done"),
            CheckOutcome::Completed => write!(f, "completed"),
        }
    }
}

/// One idempotent boot-time verification or repair
///
/// A check is guarded by a persisted marker: it is skipped while the
/// marker matches [`check_done`] and re-run otherwise. `do_check` must
/// therefore tolerate running again over a partially applied earlier
/// attempt.
///
/// [`check_done`]: StartupCheck::check_done
#[async_trait]
pub trait StartupCheck: Send + Sync {
    /// Stable token the marker is stored under
    fn key(&self) -> &str;

    fn description(&self) -> &str;

    /// Marker value that satisfies this check. Embed a revision in it
    /// to force a re-run after an upgrade.
    fn check_done(&self) -> String {
        DONE_TOKEN.to_string()
    }

    /// The verification or repair itself
    async fn do_check(&self) -> WorkResult<()>;
}

/// Runs startup checks under marker guards
///
/// Markers live in the configuration table under `check.<key>`. While
/// a check runs, the marker holds a `running:` value stamped with the
/// build version, patch level, and start time, so an interrupted check
/// is visibly unfinished and runs again on the next boot.
pub struct CheckRunner {
    executor: Arc<Executor>,
    profile: BootProfile,
}

impl CheckRunner {
    pub fn new(executor: Arc<Executor>, profile: BootProfile) -> Self {
        Self { executor, profile }
    }

    pub fn profile(&self) -> &BootProfile {
        &self.profile
    }

    fn marker_key(check_key: &str) -> String {
        format!("check.{check_key}")
    }

    /// Run one check if its marker says it is needed
    pub async fn start(&self, check: &dyn StartupCheck) -> Result<CheckOutcome> {
        let key = check.key().to_string();
        let marker_key = Self::marker_key(&key);
        let expected = check.check_done();
        let context = CallContext::new();

        let current = self
            .executor
            .execute_sql(&context, &ReadConfigValue { key: marker_key.clone() })
            .await?;

        if current.as_deref() == Some(expected.as_str()) {
            debug!("startup check '{key}' already satisfied ({expected})");
            return Ok(CheckOutcome::AlreadyDone);
        }
        if let Some(stale) = &current {
            info!("startup check '{key}' marker '{stale}' does not match '{expected}', re-running");
        }

        let running = format!(
            "running:{}:patch{}@{}",
            self.profile.version,
            self.profile.patch,
            Utc::now().to_rfc3339()
        );
        info!(
            "startup check begin: {key}: {} (version={}, patch={})",
            check.description(),
            self.profile.version,
            self.profile.patch
        );
        self.executor
            .execute_sql(
                &context,
                &WriteConfigValue {
                    key: marker_key.clone(),
                    value: running,
                },
            )
            .await?;

        if let Err(failure) = check.do_check().await {
            error!("startup check failed: {key}: {failure}");
            return Err(CoreError::CheckFailed {
                check: key,
                message: failure.to_string(),
            });
        }

        self.executor
            .execute_sql(
                &context,
                &WriteConfigValue {
                    key: marker_key,
                    value: expected.clone(),
                },
            )
            .await?;
        info!("startup check end: {key} -> {expected}");
        Ok(CheckOutcome::Completed)
    }

    /// Run checks in order, stopping at the first failure
    pub async fn run_all(
        &self,
        checks: &[Arc<dyn StartupCheck>],
    ) -> Result<Vec<(String, CheckOutcome)>> {
        let mut outcomes = Vec::with_capacity(checks.len());
        for check in checks {
            let outcome = self.start(check.as_ref()).await?;
            outcomes.push((check.key().to_string(), outcome));
        }
        Ok(outcomes)
    }
}

pub(crate) struct ReadConfigValue {
    pub key: String,
}

#[async_trait]
impl SqlWork for ReadConfigValue {
    type Output = Option<String>;

    fn description(&self) -> &str {
        "read configuration value"
    }

    fn transaction_mode(&self) -> TxnMode {
        TxnMode::ReadOnly
    }

    async fn run(&self, session: &StoreSession) -> WorkResult<Option<String>> {
        Ok(session.config_value(&self.key).await?)
    }
}

pub(crate) struct WriteConfigValue {
    pub key: String,
    pub value: String,
}

#[async_trait]
impl SqlWork for WriteConfigValue {
    type Output = ();

    fn description(&self) -> &str {
        "write configuration value"
    }

    async fn run(&self, session: &StoreSession) -> WorkResult<()> {
        session
            .update_or_insert_config_value(&self.key, &self.value)
            .await?;
        Ok(())
    }
}
