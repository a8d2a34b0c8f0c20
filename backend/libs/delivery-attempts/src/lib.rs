//! # Delivery Attempt Ledger
//!
//! Counts failed processing attempts per broker delivery so a consumer can
//! stop requeueing a payload that will never succeed and route it to a
//! dead-letter destination instead.
//!
//! A delivery is identified by the queue it arrived on and the SHA-256 of its
//! payload. Redeliveries of the same bytes on the same queue share a counter,
//! which is what makes the bound hold across requeues and consumer restarts.
//!
//! ## Architecture
//!
//! ```text
//! Broker → Consumer → Handler ──ok──→ ack + clear
//!                        │
//!                      error
//!                        ↓
//!              AttemptLedger::record_failure
//!                        ↓
//!          count < limit → nack(requeue)
//!          count ≥ limit → dead-letter + ack
//! ```
//!
//! ## Storage
//!
//! [`PgAttemptLedger`] expects this table (owned by the service migrations):
//!
//! ```sql
//! CREATE TABLE delivery_attempts (
//!     attempt_key VARCHAR(255) PRIMARY KEY,
//!     attempts INTEGER NOT NULL,
//!     last_error TEXT,
//!     first_failed_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     last_failed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! ```
//!
//! Rows of deliveries that stopped failing without ever succeeding (for
//! example, dropped by a topic retention policy) are removed by
//! [`AttemptLedger::cleanup_older_than`].
//!
//! ## Usage
//!
//! ```ignore
//! use delivery_attempts::{AttemptKey, AttemptLedger, PgAttemptLedger};
//!
//! # type BoxError = Box<dyn std::error::Error>;
//! # async fn example(pool: sqlx::PgPool, payload: &[u8]) -> Result<(), BoxError> {
//! let ledger = PgAttemptLedger::new(pool);
//! let key = AttemptKey::for_delivery("MESSAGES_SRV_MessageSentQueue", payload);
//!
//! let attempts = ledger.record_failure(&key, "conversation not found").await?;
//! if attempts >= 5 {
//!     // publish to the dead-letter destination, then ack
//! }
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

mod error;

pub use error::{AttemptError, AttemptResult};

/// Longest error text stored with an attempt
const MAX_ERROR_LEN: usize = 1024;

/// Longest attempt key accepted by the Postgres ledger
const MAX_KEY_LEN: usize = 255;

/// Identity of a delivery across redeliveries
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttemptKey(String);

impl AttemptKey {
    /// Key derived from the queue name and a digest of the payload bytes
    pub fn for_delivery(queue: &str, payload: &[u8]) -> Self {
        let digest = Sha256::digest(payload);
        Self(format!("{}:{}", queue, hex::encode(digest)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(&self) -> AttemptResult<()> {
        if self.0.is_empty() {
            return Err(AttemptError::InvalidKey(
                "Attempt key cannot be empty".to_string(),
            ));
        }

        if self.0.len() > MAX_KEY_LEN {
            return Err(AttemptError::InvalidKey(format!(
                "Attempt key too long: {} characters (max {})",
                self.0.len(),
                MAX_KEY_LEN
            )));
        }

        Ok(())
    }
}

impl fmt::Display for AttemptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persistent counter of failed attempts per delivery
#[async_trait]
pub trait AttemptLedger: Send + Sync {
    /// Record one more failure and return the total number of failures so far
    async fn record_failure(&self, key: &AttemptKey, error: &str) -> AttemptResult<u32>;

    /// Forget a delivery (processed successfully or dead-lettered)
    async fn clear(&self, key: &AttemptKey) -> AttemptResult<()>;

    /// Number of failures recorded for a delivery
    async fn attempts(&self, key: &AttemptKey) -> AttemptResult<u32>;

    /// Delete entries whose last failure is older than `retention`
    async fn cleanup_older_than(&self, retention: Duration) -> AttemptResult<u64>;
}

fn truncate_error(error: &str) -> &str {
    if error.len() <= MAX_ERROR_LEN {
        return error;
    }
    let mut end = MAX_ERROR_LEN;
    while !error.is_char_boundary(end) {
        end -= 1;
    }
    &error[..end]
}

fn cutoff(retention: Duration) -> AttemptResult<DateTime<Utc>> {
    let retention = chrono::Duration::from_std(retention)
        .map_err(|e| AttemptError::InvalidRetention(e.to_string()))?;
    Ok(Utc::now() - retention)
}

/// Ledger backed by the `delivery_attempts` table
///
/// The increment is a single `INSERT ... ON CONFLICT DO UPDATE ... RETURNING`
/// so concurrent consumers of the same delivery never lose a count.
#[derive(Clone)]
pub struct PgAttemptLedger {
    pool: PgPool,
}

impl PgAttemptLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttemptLedger for PgAttemptLedger {
    async fn record_failure(&self, key: &AttemptKey, error: &str) -> AttemptResult<u32> {
        key.validate()?;

        let row = sqlx::query(
            r#"
            INSERT INTO delivery_attempts
                (attempt_key, attempts, last_error, first_failed_at, last_failed_at)
            VALUES ($1, 1, $2, NOW(), NOW())
            ON CONFLICT (attempt_key) DO UPDATE
            SET attempts = delivery_attempts.attempts + 1,
                last_error = EXCLUDED.last_error,
                last_failed_at = NOW()
            RETURNING attempts
            "#,
        )
        .bind(key.as_str())
        .bind(truncate_error(error))
        .fetch_one(&self.pool)
        .await?;

        let attempts: i32 = row.try_get("attempts")?;
        let attempts = u32::try_from(attempts).unwrap_or(0);

        debug!(attempt_key = %key, attempts, "Recorded delivery failure");
        Ok(attempts)
    }

    async fn clear(&self, key: &AttemptKey) -> AttemptResult<()> {
        key.validate()?;

        sqlx::query("DELETE FROM delivery_attempts WHERE attempt_key = $1")
            .bind(key.as_str())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn attempts(&self, key: &AttemptKey) -> AttemptResult<u32> {
        key.validate()?;

        let row = sqlx::query("SELECT attempts FROM delivery_attempts WHERE attempt_key = $1")
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let attempts: i32 = row.try_get("attempts")?;
                Ok(u32::try_from(attempts).unwrap_or(0))
            }
            None => Ok(0),
        }
    }

    async fn cleanup_older_than(&self, retention: Duration) -> AttemptResult<u64> {
        let cutoff_time = cutoff(retention)?;

        let result = sqlx::query("DELETE FROM delivery_attempts WHERE last_failed_at < $1")
            .bind(cutoff_time)
            .execute(&self.pool)
            .await?;

        let deleted_count = result.rows_affected();

        if deleted_count > 0 {
            info!(
                deleted_count = deleted_count,
                cutoff_time = %cutoff_time,
                "Cleaned up stale delivery attempts"
            );
        } else {
            debug!("No stale delivery attempts to cleanup");
        }

        Ok(deleted_count)
    }
}

#[derive(Debug, Clone)]
struct AttemptEntry {
    attempts: u32,
    last_failed_at: DateTime<Utc>,
}

/// Process-local ledger for tests and single-instance runs
#[derive(Debug, Default)]
pub struct InMemoryAttemptLedger {
    entries: Mutex<HashMap<AttemptKey, AttemptEntry>>,
}

impl InMemoryAttemptLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl AttemptLedger for InMemoryAttemptLedger {
    async fn record_failure(&self, key: &AttemptKey, _error: &str) -> AttemptResult<u32> {
        key.validate()?;

        let mut entries = self.entries.lock().await;
        let entry = entries.entry(key.clone()).or_insert(AttemptEntry {
            attempts: 0,
            last_failed_at: Utc::now(),
        });
        entry.attempts += 1;
        entry.last_failed_at = Utc::now();
        Ok(entry.attempts)
    }

    async fn clear(&self, key: &AttemptKey) -> AttemptResult<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn attempts(&self, key: &AttemptKey) -> AttemptResult<u32> {
        Ok(self
            .entries
            .lock()
            .await
            .get(key)
            .map_or(0, |entry| entry.attempts))
    }

    async fn cleanup_older_than(&self, retention: Duration) -> AttemptResult<u64> {
        let cutoff_time = cutoff(retention)?;

        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.last_failed_at >= cutoff_time);
        Ok((before - entries.len()) as u64)
    }
}
