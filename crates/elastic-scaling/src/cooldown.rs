//! Cooldown governor.
//!
//! Cooldown is keyed by (strategy, cluster, resource type): independent
//! resource pools of the same cluster scale independently.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::store::OrderStore;
use crate::types::{ClusterId, ResourceType, Strategy};

/// Suppresses re-triggering while a recent order is still fresh.
pub struct CooldownGovernor<S: OrderStore + ?Sized> {
    orders: Arc<S>,
}

impl<S: OrderStore + ?Sized> CooldownGovernor<S> {
    /// Creates a governor reading from an order store.
    #[must_use]
    pub const fn new(orders: Arc<S>) -> Self {
        Self { orders }
    }

    /// Whether the triple is in cooldown now.
    ///
    /// # Errors
    ///
    /// Returns error if the order lookup fails.
    pub fn in_cooldown(&self, strategy: &Strategy, cluster_id: ClusterId, resource_type: &ResourceType) -> Result<bool> {
        self.in_cooldown_at(strategy, cluster_id, resource_type, Utc::now())
    }

    /// Whether the triple is in cooldown at a specific time.
    ///
    /// # Errors
    ///
    /// Returns error if the order lookup fails.
    pub fn in_cooldown_at(
        &self,
        strategy: &Strategy,
        cluster_id: ClusterId,
        resource_type: &ResourceType,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self
            .cooldown_until(strategy, cluster_id, resource_type, now)?
            .is_some())
    }

    /// End of the active cooldown window, if one is active at `now`.
    ///
    /// # Errors
    ///
    /// Returns error if the order lookup fails.
    pub fn cooldown_until(
        &self,
        strategy: &Strategy,
        cluster_id: ClusterId,
        resource_type: &ResourceType,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let Some(window) = strategy.cooldown() else {
            return Ok(None);
        };

        let latest = self
            .orders
            .latest_active_order(strategy.id, cluster_id, resource_type)?;

        Ok(latest
            .map(|record| record.order.created_at + window)
            .filter(|until| now < *until))
    }
}
