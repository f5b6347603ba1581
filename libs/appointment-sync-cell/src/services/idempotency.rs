use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use webhook_queue_cell::EventStatus;

use crate::{LedgerEntry, SyncError};

/// Durable record of which webhook fingerprints have been processed.
#[async_trait]
pub trait IdempotencyLedger: Send + Sync {
    async fn get(&self, fingerprint: &str) -> Result<Option<LedgerEntry>, SyncError>;

    async fn mark_status(&self, fingerprint: &str, status: EventStatus, detail: Option<&str>) -> Result<(), SyncError>;

    /// Note that an event for `entity_key` finished applying at `at`.
    async fn record_applied(&self, entity_key: &str, at: DateTime<Utc>) -> Result<(), SyncError>;

    /// Latest time an event for `entity_key` finished applying.
    async fn last_applied(&self, entity_key: &str) -> Result<Option<DateTime<Utc>>, SyncError>;

    /// Drop entries past their retention window. Stores with native expiry return 0.
    async fn sweep_expired(&self) -> Result<usize, SyncError> {
        Ok(0)
    }

    /// Only a completed fingerprint counts as processed.
    ///
    /// An unreachable ledger answers `false`: reprocessing is safe because
    /// every downstream write is an upsert keyed by appointment id.
    async fn is_processed(&self, fingerprint: &str) -> bool {
        match self.get(fingerprint).await {
            Ok(Some(entry)) => entry.status == EventStatus::Completed,
            Ok(None) => false,
            Err(e) => {
                warn!(fingerprint = %fingerprint, "Idempotency ledger unreachable, treating event as new: {}", e);
                false
            }
        }
    }
}

// ==============================================================================
// IN-MEMORY LEDGER
// ==============================================================================

pub struct InMemoryIdempotencyLedger {
    entries: RwLock<HashMap<String, LedgerEntry>>,
    applied: RwLock<HashMap<String, DateTime<Utc>>>,
    retention: Duration,
}

impl InMemoryIdempotencyLedger {
    pub fn new(retention_days: i64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            applied: RwLock::new(HashMap::new()),
            retention: Duration::days(retention_days.max(1)),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    fn expired(&self, entry: &LedgerEntry) -> bool {
        Utc::now() - entry.updated_at > self.retention
    }
}

impl Default for InMemoryIdempotencyLedger {
    fn default() -> Self {
        Self::new(7)
    }
}

#[async_trait]
impl IdempotencyLedger for InMemoryIdempotencyLedger {
    async fn get(&self, fingerprint: &str) -> Result<Option<LedgerEntry>, SyncError> {
        let entries = self.entries.read().await;
        Ok(entries.get(fingerprint).filter(|e| !self.expired(e)).cloned())
    }

    async fn mark_status(&self, fingerprint: &str, status: EventStatus, detail: Option<&str>) -> Result<(), SyncError> {
        let entry = LedgerEntry {
            fingerprint: fingerprint.to_string(),
            status,
            detail: detail.map(str::to_string),
            updated_at: Utc::now(),
        };
        self.entries.write().await.insert(fingerprint.to_string(), entry);
        Ok(())
    }

    async fn record_applied(&self, entity_key: &str, at: DateTime<Utc>) -> Result<(), SyncError> {
        let mut applied = self.applied.write().await;
        let latest = applied.entry(entity_key.to_string()).or_insert(at);
        *latest = (*latest).max(at);
        Ok(())
    }

    async fn last_applied(&self, entity_key: &str) -> Result<Option<DateTime<Utc>>, SyncError> {
        Ok(self.applied.read().await.get(entity_key).copied())
    }

    async fn sweep_expired(&self) -> Result<usize, SyncError> {
        let retention = self.retention;
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| Utc::now() - e.updated_at <= retention);
        self.applied.write().await.retain(|_, at| Utc::now() - *at <= retention);
        let removed = before - entries.len();
        if removed > 0 {
            debug!("Swept {} expired ledger entries", removed);
        }
        Ok(removed)
    }
}

// ==============================================================================
// REDIS LEDGER
// ==============================================================================

const LEDGER_KEY_PREFIX: &str = "office_sync:ledger:";
const APPLIED_KEY_PREFIX: &str = "office_sync:applied:";

pub struct RedisIdempotencyLedger {
    pool: Pool,
    ttl_seconds: u64,
}

impl RedisIdempotencyLedger {
    pub async fn new(redis_url: &str, retention_days: i64) -> Result<Self, SyncError> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg.create_pool(Some(Runtime::Tokio1)).map_err(|e| {
            SyncError::from(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "Failed to create Redis pool",
                format!("Pool creation error: {}", e),
            )))
        })?;

        let ledger = Self {
            pool,
            ttl_seconds: (retention_days.max(1) as u64) * 86_400,
        };

        // Test connection
        let mut conn = ledger.get_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!("Redis idempotency ledger initialized");

        Ok(ledger)
    }

    async fn get_connection(&self) -> Result<Connection, SyncError> {
        self.pool.get().await.map_err(|e| {
            SyncError::from(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "Failed to connect to Redis",
                format!("Connection error: {}", e),
            )))
        })
    }

    fn key(fingerprint: &str) -> String {
        format!("{}{}", LEDGER_KEY_PREFIX, fingerprint)
    }
}

#[async_trait]
impl IdempotencyLedger for RedisIdempotencyLedger {
    async fn get(&self, fingerprint: &str) -> Result<Option<LedgerEntry>, SyncError> {
        let mut conn = self.get_connection().await?;
        let raw: Option<String> = conn.get(Self::key(fingerprint)).await?;

        match raw {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| SyncError::Ledger(format!("corrupt ledger entry for {}: {}", fingerprint, e))),
            None => Ok(None),
        }
    }

    async fn mark_status(&self, fingerprint: &str, status: EventStatus, detail: Option<&str>) -> Result<(), SyncError> {
        let entry = LedgerEntry {
            fingerprint: fingerprint.to_string(),
            status,
            detail: detail.map(str::to_string),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&entry).map_err(|e| SyncError::Ledger(e.to_string()))?;

        let mut conn = self.get_connection().await?;
        let _: () = redis::cmd("SET")
            .arg(Self::key(fingerprint))
            .arg(json)
            .arg("EX")
            .arg(self.ttl_seconds)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn record_applied(&self, entity_key: &str, at: DateTime<Utc>) -> Result<(), SyncError> {
        let mut conn = self.get_connection().await?;
        let _: () = redis::cmd("SET")
            .arg(format!("{}{}", APPLIED_KEY_PREFIX, entity_key))
            .arg(at.timestamp_millis())
            .arg("EX")
            .arg(self.ttl_seconds)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn last_applied(&self, entity_key: &str) -> Result<Option<DateTime<Utc>>, SyncError> {
        let mut conn = self.get_connection().await?;
        let millis: Option<i64> = conn.get(format!("{}{}", APPLIED_KEY_PREFIX, entity_key)).await?;
        Ok(millis.and_then(|ms| Utc.timestamp_millis_opt(ms).single()))
    }
}
