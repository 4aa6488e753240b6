use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log::debug;
use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::core::work::WorkResult;
use crate::core::{CoreError, Result};
use crate::executor::executor::TaskHandle;

/// Admission limits for a [`BoundedExecutor`]
#[derive(Debug, Clone)]
pub struct AdmissionPolicy {
    /// Maximum number of tasks in flight at once
    pub max_outstanding: usize,

    /// How long a caller may wait for a slot before being rejected
    pub acquire_timeout: Duration,
}

impl AdmissionPolicy {
    pub fn new(max_outstanding: usize) -> Self {
        Self {
            max_outstanding,
            acquire_timeout: Duration::from_secs(3600),
        }
    }

    /// Set the acquire timeout
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Validate the policy
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_outstanding == 0 {
            return Err("max_outstanding must be > 0".to_string());
        }

        if self.acquire_timeout.is_zero() {
            return Err("acquire_timeout must be > 0".to_string());
        }

        Ok(())
    }
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self::new(16)
    }
}

/// Slot and traffic counters for a [`BoundedExecutor`]
#[derive(Debug, Clone)]
pub struct AdmissionStats {
    pub max_outstanding: usize,
    pub available: usize,
    pub in_flight: usize,
    pub launched: u64,
    pub rejected: u64,
}

impl fmt::Display for AdmissionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Admission: {}/{} slots free, {} in flight ({} launched, {} rejected)",
            self.available, self.max_outstanding, self.in_flight, self.launched, self.rejected
        )
    }
}

/// Launches background tasks through a fixed pool of permits
///
/// Admission blocks the caller, so a burst of producers slows down to
/// the pace of the pool instead of piling up unbounded tasks. Each
/// permit rides inside its spawned task and frees the slot when the
/// task finishes, whether or not anyone ever collects the handle.
pub struct BoundedExecutor {
    permits: Arc<Semaphore>,
    policy: AdmissionPolicy,
    launched: AtomicU64,
    rejected: AtomicU64,
}

impl BoundedExecutor {
    pub fn new(policy: AdmissionPolicy) -> Result<Self> {
        policy.validate().map_err(CoreError::Config)?;
        Ok(Self {
            permits: Arc::new(Semaphore::new(policy.max_outstanding)),
            policy,
            launched: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        })
    }

    /// Wait for a slot, then spawn the task
    ///
    /// Returns the running task's handle once admitted. Rejects with
    /// [`CoreError::AdmissionRejected`] when no slot frees up within
    /// the policy's acquire timeout or the pool has been shut down.
    pub async fn execute<T, F>(
        &self,
        description: impl Into<String>,
        task: F,
    ) -> Result<TaskHandle<T>>
    where
        T: Send + 'static,
        F: Future<Output = WorkResult<T>> + Send + 'static,
    {
        let description = description.into();

        let acquired = timeout(
            self.policy.acquire_timeout,
            self.permits.clone().acquire_owned(),
        )
        .await;

        let permit = match acquired {
            Ok(Ok(permit)) => permit,
            Ok(Err(_closed)) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(CoreError::AdmissionRejected(format!(
                    "admission pool is shut down (task '{description}')"
                )));
            }
            Err(_elapsed) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(CoreError::AdmissionRejected(format!(
                    "no slot within {:?} (task '{description}')",
                    self.policy.acquire_timeout
                )));
            }
        };

        self.launched.fetch_add(1, Ordering::Relaxed);
        debug!(
            "task admitted: {description} ({} slots left)",
            self.permits.available_permits()
        );

        let handle = tokio::spawn(async move {
            // the permit is dropped when the task finishes
            let _slot = permit;
            task.await
        });
        Ok(TaskHandle::new(description, handle))
    }

    /// Stop admitting new tasks. Tasks already running finish normally.
    pub fn shutdown(&self) {
        self.permits.close();
    }

    pub fn policy(&self) -> &AdmissionPolicy {
        &self.policy
    }

    pub fn stats(&self) -> AdmissionStats {
        let available = self.permits.available_permits();
        AdmissionStats {
            max_outstanding: self.policy.max_outstanding,
            available,
            in_flight: self.policy.max_outstanding.saturating_sub(available),
            launched: self.launched.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::WorkFailure;
    use tokio::sync::oneshot;

    fn small_pool(slots: usize) -> BoundedExecutor {
        BoundedExecutor::new(
            AdmissionPolicy::new(slots).acquire_timeout(Duration::from_millis(50)),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_invalid_policy_rejected() {
        assert!(BoundedExecutor::new(AdmissionPolicy::new(0)).is_err());
        assert!(
            AdmissionPolicy::new(4)
                .acquire_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_pool_rejects_after_timeout() {
        let pool = small_pool(1);
        let (tx, rx) = oneshot::channel::<()>();

        let held = pool
            .execute("holder", async move {
                let _ = rx.await;
                Ok::<_, WorkFailure>(())
            })
            .await
            .unwrap();

        let err = pool
            .execute("rejected", async { Ok::<_, WorkFailure>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::AdmissionRejected(_)));
        assert_eq!(pool.stats().rejected, 1);

        tx.send(()).unwrap();
        held.get().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_slot_freed_when_task_finishes() {
        let pool = small_pool(2);

        let handle = pool
            .execute("quick", async { Ok::<_, WorkFailure>(5) })
            .await
            .unwrap();

        // the slot comes back when the task completes, not when the
        // handle is consumed
        let mut freed = false;
        for _ in 0..100 {
            if pool.stats().available == 2 {
                freed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(freed);
        assert_eq!(handle.get().await.unwrap(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_freed_slot_admits_next_task() {
        let pool = small_pool(1);
        let (tx, rx) = oneshot::channel::<()>();

        let first = pool
            .execute("first", async move {
                let _ = rx.await;
                Ok::<_, WorkFailure>(())
            })
            .await
            .unwrap();

        tx.send(()).unwrap();
        first.get().await.unwrap();

        let second = pool
            .execute("second", async { Ok::<_, WorkFailure>(9) })
            .await
            .unwrap();
        assert_eq!(second.get().await.unwrap(), 9);
        assert_eq!(pool.stats().launched, 2);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_tasks() {
        let pool = small_pool(4);
        pool.shutdown();

        let err = pool
            .execute("late", async { Ok::<_, WorkFailure>(()) })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("shut down"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_track_in_flight() {
        let pool = small_pool(3);
        let (tx, rx) = oneshot::channel::<()>();

        let held = pool
            .execute("holder", async move {
                let _ = rx.await;
                Ok::<_, WorkFailure>(())
            })
            .await
            .unwrap();

        let stats = pool.stats();
        assert_eq!(stats.in_flight, 1);
        assert_eq!(stats.available, 2);

        tx.send(()).unwrap();
        held.get().await.unwrap();
    }
}
