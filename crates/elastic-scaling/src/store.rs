//! Persistence collaborators.
//!
//! The engine reads strategies, snapshots, policies and templates and writes
//! orders and history through these traits. [`InMemoryRepository`] implements
//! all of them over a serializable [`RepositoryState`], which the scheduler
//! persists to disk between ticks.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScalingError};
use crate::order::{ExecutionHistory, HistoryEntry, NewOrder, OrderRecord, OrderStatus};
use crate::query::{DeviceMatchingPolicy, QueryTemplate};
use crate::types::{
    ClusterId, HistoryId, OrderId, ResourceSnapshot, ResourceType, Strategy, StrategyClusterAssociation,
    StrategyId, StrategyStatus, TemplateId, ThresholdAction,
};

/// Read access to strategies and their cluster associations.
pub trait StrategyStore: Send + Sync {
    /// All strategies with status enabled.
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be read.
    fn enabled_strategies(&self) -> Result<Vec<Strategy>>;

    /// Clusters associated with a strategy.
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be read.
    fn clusters_for_strategy(&self, strategy_id: StrategyId) -> Result<Vec<ClusterId>>;
}

/// Read access to collected resource snapshots.
pub trait SnapshotStore: Send + Sync {
    /// Snapshots for a cluster pool created within `[from, to]`, ascending by time.
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be read.
    fn snapshots_between(
        &self,
        cluster_id: ClusterId,
        resource_type: &ResourceType,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ResourceSnapshot>>;
}

/// Order persistence.
pub trait OrderStore: Send + Sync {
    /// Most recent order for the triple whose status is not cancelled.
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be read.
    fn latest_active_order(
        &self,
        strategy_id: StrategyId,
        cluster_id: ClusterId,
        resource_type: &ResourceType,
    ) -> Result<Option<OrderRecord>>;

    /// Persists an order header and its scaling detail.
    ///
    /// # Errors
    ///
    /// Returns [`ScalingError::OrderCreation`] if either row cannot be written.
    fn create_order(&self, order: NewOrder) -> Result<OrderRecord>;
}

/// Append-only execution history.
pub trait HistoryStore: Send + Sync {
    /// Appends a history row.
    ///
    /// # Errors
    ///
    /// Returns error if the row cannot be written.
    fn append_history(&self, entry: HistoryEntry) -> Result<HistoryId>;
}

/// Read access to matching policies and query templates.
pub trait PolicyStore: Send + Sync {
    /// Policies configured for a (resource type, action) pair, enabled or not.
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be read.
    fn matching_policies(
        &self,
        resource_type: &ResourceType,
        action: ThresholdAction,
    ) -> Result<Vec<DeviceMatchingPolicy>>;

    /// Looks up a template by id.
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be read.
    fn query_template(&self, template_id: TemplateId) -> Result<Option<QueryTemplate>>;
}

/// Everything the engine needs from persistence.
pub trait ScalingRepository: StrategyStore + SnapshotStore + OrderStore + HistoryStore + PolicyStore {}

impl<T> ScalingRepository for T where T: StrategyStore + SnapshotStore + OrderStore + HistoryStore + PolicyStore {}

/// Serializable contents of an [`InMemoryRepository`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryState {
    /// Strategy configuration.
    #[serde(default)]
    pub strategies: Vec<Strategy>,
    /// Strategy to cluster links.
    #[serde(default)]
    pub associations: Vec<StrategyClusterAssociation>,
    /// Collected snapshots.
    #[serde(default)]
    pub snapshots: Vec<ResourceSnapshot>,
    /// Matching policies.
    #[serde(default)]
    pub policies: Vec<DeviceMatchingPolicy>,
    /// Query templates.
    #[serde(default)]
    pub templates: Vec<QueryTemplate>,
    /// Created orders.
    #[serde(default)]
    pub orders: Vec<OrderRecord>,
    /// Execution history.
    #[serde(default)]
    pub history: Vec<ExecutionHistory>,
    /// Last assigned order id.
    #[serde(default)]
    pub last_order_id: u64,
    /// Last assigned history id.
    #[serde(default)]
    pub last_history_id: u64,
}

impl RepositoryState {
    /// Highest order id and history id present, whether or not the id
    /// counters were written.
    #[must_use]
    pub fn high_water_marks(&self) -> (u64, u64) {
        let orders = self
            .orders
            .iter()
            .map(|r| r.order.id.get())
            .fold(self.last_order_id, u64::max);
        let history = self
            .history
            .iter()
            .map(|h| h.id.get())
            .fold(self.last_history_id, u64::max);
        (orders, history)
    }

    /// Appends the orders and history rows of `other` whose ids are above
    /// the given marks and not already present. Everything else in `self`
    /// is left as is. Returns the number of records added.
    pub fn append_newer(&mut self, other: &Self, order_mark: u64, history_mark: u64) -> usize {
        let before = self.orders.len() + self.history.len();

        for record in other.orders.iter().filter(|r| r.order.id.get() > order_mark) {
            if !self.orders.iter().any(|r| r.order.id == record.order.id) {
                self.orders.push(record.clone());
            }
        }
        for row in other.history.iter().filter(|h| h.id.get() > history_mark) {
            if !self.history.iter().any(|h| h.id == row.id) {
                self.history.push(row.clone());
            }
        }

        let (orders, history) = self.high_water_marks();
        self.last_order_id = orders;
        self.last_history_id = history;
        self.orders.len() + self.history.len() - before
    }
}

/// In-memory repository for testing and single-instance deployments.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    state: RwLock<RepositoryState>,
}

impl InMemoryRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a repository from saved state.
    #[must_use]
    pub fn from_state(state: RepositoryState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    /// Copy of the current state.
    #[must_use]
    pub fn state(&self) -> RepositoryState {
        self.state.read().clone()
    }

    /// Replaces the whole state, e.g. after re-reading it from disk.
    ///
    /// Id counters are raised to the highest stored id so new records never
    /// reuse one.
    pub fn replace_state(&self, mut state: RepositoryState) {
        let (orders, history) = state.high_water_marks();
        state.last_order_id = orders;
        state.last_history_id = history;
        *self.state.write() = state;
    }

    /// Adds or replaces a strategy.
    pub fn upsert_strategy(&self, strategy: Strategy) {
        let mut state = self.state.write();
        state.strategies.retain(|s| s.id != strategy.id);
        state.strategies.push(strategy);
    }

    /// Links a strategy to a cluster.
    pub fn associate(&self, strategy_id: StrategyId, cluster_id: ClusterId) {
        let link = StrategyClusterAssociation {
            strategy_id,
            cluster_id,
        };
        let mut state = self.state.write();
        if !state.associations.contains(&link) {
            state.associations.push(link);
        }
    }

    /// Records a snapshot.
    pub fn add_snapshot(&self, snapshot: ResourceSnapshot) {
        self.state.write().snapshots.push(snapshot);
    }

    /// Adds or replaces a matching policy.
    pub fn upsert_policy(&self, policy: DeviceMatchingPolicy) {
        let mut state = self.state.write();
        state.policies.retain(|p| p.id != policy.id);
        state.policies.push(policy);
    }

    /// Adds or replaces a query template.
    pub fn upsert_template(&self, template: QueryTemplate) {
        let mut state = self.state.write();
        state.templates.retain(|t| t.id != template.id);
        state.templates.push(template);
    }

    /// Sets an order's status, as the order lifecycle owner would.
    ///
    /// # Errors
    ///
    /// Returns error if the order does not exist.
    pub fn set_order_status(&self, order_id: OrderId, status: OrderStatus) -> Result<()> {
        let mut state = self.state.write();
        let record = state
            .orders
            .iter_mut()
            .find(|r| r.order.id == order_id)
            .ok_or_else(|| ScalingError::database(format!("order {order_id} not found")))?;
        record.order.status = status;
        Ok(())
    }

    /// All orders, oldest first.
    #[must_use]
    pub fn orders(&self) -> Vec<OrderRecord> {
        self.state.read().orders.clone()
    }

    /// History rows, newest first, optionally for one strategy.
    #[must_use]
    pub fn history(&self, strategy_id: Option<StrategyId>, limit: usize) -> Vec<ExecutionHistory> {
        self.state
            .read()
            .history
            .iter()
            .rev()
            .filter(|h| strategy_id.is_none_or(|id| h.entry.strategy_id == id))
            .take(limit)
            .cloned()
            .collect()
    }
}

impl StrategyStore for InMemoryRepository {
    fn enabled_strategies(&self) -> Result<Vec<Strategy>> {
        let mut strategies: Vec<Strategy> = self
            .state
            .read()
            .strategies
            .iter()
            .filter(|s| s.status == StrategyStatus::Enabled)
            .cloned()
            .collect();
        strategies.sort_by_key(|s| s.id);
        Ok(strategies)
    }

    fn clusters_for_strategy(&self, strategy_id: StrategyId) -> Result<Vec<ClusterId>> {
        Ok(self
            .state
            .read()
            .associations
            .iter()
            .filter(|a| a.strategy_id == strategy_id)
            .map(|a| a.cluster_id)
            .collect())
    }
}

impl SnapshotStore for InMemoryRepository {
    fn snapshots_between(
        &self,
        cluster_id: ClusterId,
        resource_type: &ResourceType,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ResourceSnapshot>> {
        let mut snapshots: Vec<ResourceSnapshot> = self
            .state
            .read()
            .snapshots
            .iter()
            .filter(|s| {
                s.cluster_id == cluster_id
                    && &s.resource_type == resource_type
                    && s.created_at >= from
                    && s.created_at <= to
            })
            .cloned()
            .collect();
        snapshots.sort_by_key(|s| s.created_at);
        Ok(snapshots)
    }
}

impl OrderStore for InMemoryRepository {
    fn latest_active_order(
        &self,
        strategy_id: StrategyId,
        cluster_id: ClusterId,
        resource_type: &ResourceType,
    ) -> Result<Option<OrderRecord>> {
        Ok(self
            .state
            .read()
            .orders
            .iter()
            .filter(|r| r.is_for(strategy_id, cluster_id, resource_type))
            .filter(|r| r.order.status.counts_for_cooldown())
            .max_by_key(|r| (r.order.created_at, r.order.id))
            .cloned())
    }

    fn create_order(&self, order: NewOrder) -> Result<OrderRecord> {
        let mut state = self.state.write();
        state.last_order_id += 1;
        let record = order.into_record(OrderId::new(state.last_order_id));
        state.orders.push(record.clone());
        Ok(record)
    }
}

impl HistoryStore for InMemoryRepository {
    fn append_history(&self, entry: HistoryEntry) -> Result<HistoryId> {
        let mut state = self.state.write();
        state.last_history_id += 1;
        let id = HistoryId::new(state.last_history_id);
        state.history.push(ExecutionHistory { id, entry });
        Ok(id)
    }
}

impl PolicyStore for InMemoryRepository {
    fn matching_policies(
        &self,
        resource_type: &ResourceType,
        action: ThresholdAction,
    ) -> Result<Vec<DeviceMatchingPolicy>> {
        Ok(self
            .state
            .read()
            .policies
            .iter()
            .filter(|p| p.applies_to(resource_type, action))
            .cloned()
            .collect())
    }

    fn query_template(&self, template_id: TemplateId) -> Result<Option<QueryTemplate>> {
        Ok(self
            .state
            .read()
            .templates
            .iter()
            .find(|t| t.id == template_id)
            .cloned())
    }
}
