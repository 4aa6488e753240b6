use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{info, warn};
use tokio::fs;
use uuid::Uuid;

use crate::core::{CoreError, Result};
use crate::store::{Store, TxnMode};

/// Binary-file side of the deployment, probed for writability at boot
#[async_trait]
pub trait Repository: Send + Sync {
    /// Attempt a real write. Any error means the repository must be
    /// treated as read-only.
    async fn probe_write(&self) -> Result<()>;
}

/// Repository rooted at a directory
///
/// The probe writes a throwaway marker file under the root and removes
/// it again. A missing or unwritable root fails the probe.
pub struct DirRepository {
    root: PathBuf,
}

impl DirRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl Repository for DirRepository {
    async fn probe_write(&self) -> Result<()> {
        let marker = self.root.join(format!(".write-probe-{}", Uuid::new_v4()));

        fs::write(&marker, b"probe").await.map_err(|err| {
            CoreError::IoError(format!("probe write {} failed: {err}", marker.display()))
        })?;

        fs::remove_file(&marker).await.map_err(|err| {
            CoreError::IoError(format!("probe cleanup {} failed: {err}", marker.display()))
        })?;

        Ok(())
    }
}

/// Repository that refuses every write, for tests and degraded setups
pub struct SealedRepository;

#[async_trait]
impl Repository for SealedRepository {
    async fn probe_write(&self) -> Result<()> {
        Err(CoreError::IoError("repository is sealed".to_string()))
    }
}

/// Read-only flags for the two halves of the deployment
///
/// Computed once at boot by probing for real write access and never
/// updated afterwards. Everything that adapts to a read-only setup
/// reads these two flags instead of probing again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOnlyStatus {
    db: bool,
    repo: bool,
}

impl ReadOnlyStatus {
    /// Construct directly, mainly for tests
    pub fn new(db_read_only: bool, repo_read_only: bool) -> Self {
        Self {
            db: db_read_only,
            repo: repo_read_only,
        }
    }

    pub fn writable() -> Self {
        Self::new(false, false)
    }

    /// Probe both halves once
    ///
    /// The database probe opens and immediately rolls back a read-write
    /// transaction. Any error on either probe forces the matching flag
    /// to read-only rather than propagating.
    pub async fn detect(store: &dyn Store, repository: &dyn Repository) -> Self {
        let db = match store.begin(TxnMode::ReadWrite).await {
            Ok(txn) => {
                if let Err(err) = store.rollback(txn).await {
                    warn!("database write probe rollback failed: {err}");
                }
                false
            }
            Err(err) => {
                info!("database write probe failed, treating database as read-only: {err}");
                true
            }
        };

        let repo = match repository.probe_write().await {
            Ok(()) => false,
            Err(err) => {
                info!("repository write probe failed, treating repository as read-only: {err}");
                true
            }
        };

        let status = Self { db, repo };
        info!("read-only status: {status}");
        status
    }

    pub fn is_db_read_only(&self) -> bool {
        self.db
    }

    pub fn is_repo_read_only(&self) -> bool {
        self.repo
    }

    pub fn is_fully_writable(&self) -> bool {
        !self.db && !self.repo
    }
}

impl fmt::Display for ReadOnlyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "db={}, repo={}",
            if self.db { "read-only" } else { "writable" },
            if self.repo { "read-only" } else { "writable" }
        )
    }
}
