use crate::Result;
use chrono::{Duration, Utc};
use persistence_layer::TaskLock;
use std::future::Future;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Whether guarded work ran or another worker held the lock
#[derive(Debug, Clone, PartialEq)]
pub enum LockOutcome<T> {
    Ran(T),
    Skipped,
}

impl<T> LockOutcome<T> {
    pub fn ran(self) -> Option<T> {
        match self {
            LockOutcome::Ran(value) => Some(value),
            LockOutcome::Skipped => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, LockOutcome::Skipped)
    }
}

/// Run `work` while holding the task lock `name`.
///
/// A lock held by someone else (and not past its lease) is a skip, not an
/// error. While `work` runs the lease is renewed every third of its length.
/// The lock is released whether `work` succeeds or fails.
pub async fn run_exclusive<F, Fut, T>(
    lock: &dyn TaskLock,
    name: &str,
    lease: Duration,
    work: F,
) -> Result<LockOutcome<T>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let task = lock.find_or_create_task(name).await?;
    if task.is_held(Utc::now()) {
        debug!(
            "Task {} is held by {:?} until {:?}, skipping",
            name, task.locked_by, task.lease_expires_at
        );
        return Ok(LockOutcome::Skipped);
    }

    let owner = Uuid::new_v4().to_string();
    if !lock.try_acquire(name, &owner, lease).await? {
        debug!("Lost the race for task {}, skipping", name);
        return Ok(LockOutcome::Skipped);
    }
    info!("Task {} started (owner {})", name, owner);

    let heartbeat = (lease / 3)
        .to_std()
        .unwrap_or(std::time::Duration::from_secs(1))
        .max(std::time::Duration::from_millis(100));
    let mut ticker = tokio::time::interval(heartbeat);
    // The first tick completes immediately
    ticker.tick().await;

    let work = work();
    tokio::pin!(work);

    let result = loop {
        tokio::select! {
            result = &mut work => break result,
            _ = ticker.tick() => {
                match lock.renew(name, &owner, lease).await {
                    Ok(true) => debug!("Renewed lease on task {}", name),
                    Ok(false) => warn!("Task {} lease was lost while running", name),
                    Err(e) => warn!("Failed to renew lease on task {}: {}", name, e),
                }
            }
        }
    };

    match lock.release(name, &owner).await {
        Ok(true) => info!("Task {} finished", name),
        Ok(false) => warn!("Task {} was no longer held by {} at release", name, owner),
        Err(e) => error!("Failed to release task {}: {}", name, e),
    }

    result.map(LockOutcome::Ran)
}
