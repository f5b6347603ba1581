use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::SyncError;

/// Mutual exclusion for scheduled jobs across instances.
#[async_trait]
pub trait JobLock: Send + Sync {
    /// Take the lock for `ttl`. The lock is never released early, so a job
    /// runs at most once per TTL window across all holders.
    async fn try_acquire(&self, job: &str, ttl: Duration) -> Result<bool, SyncError>;
}

/// Single-process lock; enough when only one instance runs.
#[derive(Default)]
pub struct LocalJobLock {
    held: Mutex<HashMap<String, Instant>>,
}

impl LocalJobLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobLock for LocalJobLock {
    async fn try_acquire(&self, job: &str, ttl: Duration) -> Result<bool, SyncError> {
        let mut held = self.held.lock().await;
        let now = Instant::now();
        if held.get(job).is_some_and(|expires| *expires > now) {
            return Ok(false);
        }
        held.insert(job.to_string(), now + ttl);
        Ok(true)
    }
}

const LOCK_KEY_PREFIX: &str = "office_sync:job:";

/// `SET key owner NX PX ttl` lock shared by every instance on one Redis.
pub struct RedisJobLock {
    pool: Pool,
    owner: String,
}

impl RedisJobLock {
    pub fn new(redis_url: &str) -> Result<Self, SyncError> {
        let pool = Config::from_url(redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| SyncError::Ledger(format!("Failed to create Redis pool: {}", e)))?;

        Ok(Self {
            pool,
            owner: Uuid::new_v4().to_string(),
        })
    }
}

#[async_trait]
impl JobLock for RedisJobLock {
    async fn try_acquire(&self, job: &str, ttl: Duration) -> Result<bool, SyncError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| SyncError::Ledger(format!("Failed to connect to Redis: {}", e)))?;

        let reply: Option<String> = redis::cmd("SET")
            .arg(format!("{}{}", LOCK_KEY_PREFIX, job))
            .arg(&self.owner)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        Ok(reply.is_some())
    }
}

/// Run `job` every `interval` until `shutdown` flips to true.
///
/// Each run first takes `lock` for nine tenths of the interval so a
/// slightly late timer on another instance cannot run the same period twice.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    interval: Duration,
    lock: Arc<dyn JobLock>,
    mut shutdown: watch::Receiver<bool>,
    job: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let interval = interval.max(Duration::from_millis(10));
    let ttl = interval.mul_f64(0.9);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately; wait a full period before the first run
        ticker.tick().await;

        info!("Scheduled job {} every {:?}", name, interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match lock.try_acquire(name, ttl).await {
                        Ok(true) => {
                            debug!("Running scheduled job {}", name);
                            job().await;
                        }
                        Ok(false) => debug!("Job {} is held by another runner, skipping", name),
                        Err(e) => warn!("Could not take lock for job {}, skipping this period: {}", name, e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Stopping scheduled job {}", name);
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_local_lock_excludes_until_ttl() {
        let lock = LocalJobLock::new();
        assert!(lock.try_acquire("resync", Duration::from_millis(30)).await.unwrap());
        assert!(!lock.try_acquire("resync", Duration::from_millis(30)).await.unwrap());
        assert!(lock.try_acquire("recovery", Duration::from_millis(30)).await.unwrap());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(lock.try_acquire("resync", Duration::from_millis(30)).await.unwrap());
    }

    #[tokio::test]
    async fn test_periodic_job_runs_and_stops() {
        let runs = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(false);

        let counter = runs.clone();
        let handle = spawn_periodic("tick", Duration::from_millis(20), Arc::new(LocalJobLock::new()), rx, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(110)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(runs.load(Ordering::SeqCst) >= 2);
    }
}
