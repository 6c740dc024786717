//! Per-strategy mutual exclusion across scheduler instances.
//!
//! A strategy is evaluated only while its lock is held. Locks carry a TTL so
//! a crashed holder cannot block the strategy forever, and release is checked
//! against the acquisition token so a holder whose lock expired and was
//! re-acquired elsewhere cannot release someone else's lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::{Result, ScalingError};
use crate::types::StrategyId;

/// Distributed lock collaborator.
pub trait LockProvider: Send + Sync {
    /// Acquires `key` for `token` if it is free or expired.
    ///
    /// Returns `false` if another holder has it.
    ///
    /// # Errors
    ///
    /// Returns [`ScalingError::Lock`] if the backend is unavailable.
    fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool>;

    /// Releases `key` if it is still held by `token`.
    ///
    /// Returns `false` if the lock had expired or belongs to another token.
    ///
    /// # Errors
    ///
    /// Returns [`ScalingError::Lock`] if the backend is unavailable.
    fn release(&self, key: &str, token: &str) -> Result<bool>;
}

#[derive(Debug, Clone)]
struct Lease {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Process-local lock provider with TTL expiry.
///
/// Time can be pinned with [`InMemoryLockProvider::set_now`].
#[derive(Debug, Default)]
pub struct InMemoryLockProvider {
    leases: Mutex<HashMap<String, Lease>>,
    pinned_now: RwLock<Option<DateTime<Utc>>>,
}

impl InMemoryLockProvider {
    /// Creates an empty provider using the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins the provider's clock.
    pub fn set_now(&self, now: DateTime<Utc>) {
        *self.pinned_now.write() = Some(now);
    }

    fn now(&self) -> DateTime<Utc> {
        (*self.pinned_now.read()).unwrap_or_else(Utc::now)
    }

    /// Whether `key` is currently held by anyone.
    #[must_use]
    pub fn is_held(&self, key: &str) -> bool {
        let now = self.now();
        self.leases
            .lock()
            .get(key)
            .is_some_and(|lease| lease.expires_at > now)
    }
}

impl LockProvider for InMemoryLockProvider {
    fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| ScalingError::Lock {
            key: key.to_string(),
            message: format!("invalid ttl: {e}"),
        })?;
        let now = self.now();
        let mut leases = self.leases.lock();

        if leases.get(key).is_some_and(|lease| lease.expires_at > now) {
            return Ok(false);
        }
        leases.insert(
            key.to_string(),
            Lease {
                token: token.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    fn release(&self, key: &str, token: &str) -> Result<bool> {
        let now = self.now();
        let mut leases = self.leases.lock();
        match leases.get(key) {
            Some(lease) if lease.token == token => {
                let live = lease.expires_at > now;
                leases.remove(key);
                Ok(live)
            }
            _ => Ok(false),
        }
    }
}

/// Result of running work under a lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome<T> {
    /// The lock was acquired and the work ran.
    Acquired(T),
    /// Another instance holds the lock; the work was skipped.
    Skipped,
}

/// Releases its lock when dropped.
pub struct LockGuard<L: LockProvider + ?Sized> {
    provider: Arc<L>,
    key: String,
    token: String,
}

impl<L: LockProvider + ?Sized> LockGuard<L> {
    /// Lock key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl<L: LockProvider + ?Sized> Drop for LockGuard<L> {
    fn drop(&mut self) {
        match self.provider.release(&self.key, &self.token) {
            Ok(true) => tracing::debug!(key = %self.key, "lock released"),
            Ok(false) => tracing::warn!(key = %self.key, "lock expired before release"),
            Err(e) => tracing::warn!(key = %self.key, error = %e, "failed to release lock"),
        }
    }
}

/// Lock key for a strategy.
#[must_use]
pub fn strategy_lock_key(strategy_id: StrategyId) -> String {
    format!("elastic_scaling:strategy:{strategy_id}")
}

/// Runs strategy evaluations under per-strategy locks.
pub struct DistributedCoordinator<L: LockProvider + ?Sized> {
    provider: Arc<L>,
    ttl: Duration,
}

impl<L: LockProvider + ?Sized> DistributedCoordinator<L> {
    /// Creates a coordinator.
    #[must_use]
    pub const fn new(provider: Arc<L>, ttl: Duration) -> Self {
        Self { provider, ttl }
    }

    /// Lock TTL.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Acquires the strategy lock, returning a guard that releases it.
    ///
    /// # Errors
    ///
    /// Returns error if the lock backend fails.
    pub fn acquire(&self, strategy_id: StrategyId) -> Result<Option<LockGuard<L>>> {
        let key = strategy_lock_key(strategy_id);
        let token = Uuid::new_v4().to_string();

        if !self.provider.try_acquire(&key, &token, self.ttl)? {
            tracing::debug!(strategy = %strategy_id, key = %key, "lock held elsewhere");
            return Ok(None);
        }
        Ok(Some(LockGuard {
            provider: Arc::clone(&self.provider),
            key,
            token,
        }))
    }

    /// Runs `f` while holding the strategy lock.
    ///
    /// The lock is released when `f` returns or unwinds.
    ///
    /// # Errors
    ///
    /// Returns error if the lock backend fails; `f` is not run.
    pub fn with_lock<T>(&self, strategy_id: StrategyId, f: impl FnOnce() -> T) -> Result<LockOutcome<T>> {
        let Some(guard) = self.acquire(strategy_id)? else {
            return Ok(LockOutcome::Skipped);
        };
        let value = f();
        drop(guard);
        Ok(LockOutcome::Acquired(value))
    }
}
