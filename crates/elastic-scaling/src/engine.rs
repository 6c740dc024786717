//! The scaling evaluation pass.
//!
//! One pass walks every enabled strategy under its distributed lock, and for
//! each associated cluster and resource type runs:
//! cooldown check, snapshot window, threshold evaluation, delta sizing,
//! device selection, order creation. Every association ends in exactly one
//! history row. Failures are isolated per association; only lock errors
//! fail a whole strategy, and nothing fails the pass except reading the
//! strategy list itself.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::coordinator::{DistributedCoordinator, LockOutcome, LockProvider};
use crate::cooldown::CooldownGovernor;
use crate::delta::ResourceDelta;
use crate::error::{Result, ScalingError};
use crate::evaluator::{evaluate, threshold_text};
use crate::events::{EventPublisher, ScalingEvent, TracingEventPublisher};
use crate::order::{ExecutionResult, HistoryEntry};
use crate::recorder::{ExecutionRecorder, OrderOutcome, OrderRequest};
use crate::selection::{DeviceSearch, DeviceSelector};
use crate::snapshot::SnapshotAccessor;
use crate::store::ScalingRepository;
use crate::types::{ClusterId, HistoryId, OrderId, ResourceType, Strategy, StrategyId};

/// Engine settings injected at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// TTL of the per-strategy lock.
    pub lock_ttl: Duration,
    /// Maximum candidates fetched per matching policy.
    pub candidate_cap: usize,
    /// Devices requested per search page.
    pub search_page_size: usize,
    /// Clusters evaluated for strategies without associations.
    pub default_clusters: Vec<ClusterId>,
    /// Resource pool evaluated for strategies that list none.
    pub default_resource_type: ResourceType,
    /// Creator recorded on orders.
    pub order_creator: String,
    /// Order number prefix.
    pub order_number_prefix: String,
    /// Whether passes run at all.
    pub enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(30),
            candidate_cap: 10_000,
            search_page_size: 500,
            default_clusters: Vec::new(),
            default_resource_type: ResourceType::total(),
            order_creator: "system".to_string(),
            order_number_prefix: "ES".to_string(),
            enabled: true,
        }
    }
}

impl EngineConfig {
    /// Sets the lock TTL.
    #[must_use]
    pub const fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    /// Sets the per-policy candidate cap.
    #[must_use]
    pub const fn with_candidate_cap(mut self, cap: usize) -> Self {
        self.candidate_cap = cap;
        self
    }

    /// Sets the search page size.
    #[must_use]
    pub const fn with_search_page_size(mut self, size: usize) -> Self {
        self.search_page_size = size;
        self
    }

    /// Sets the fallback clusters.
    #[must_use]
    pub fn with_default_clusters(mut self, clusters: Vec<ClusterId>) -> Self {
        self.default_clusters = clusters;
        self
    }

    /// Sets the fallback resource type.
    #[must_use]
    pub fn with_default_resource_type(mut self, resource_type: ResourceType) -> Self {
        self.default_resource_type = resource_type;
        self
    }

    /// Sets the order creator.
    #[must_use]
    pub fn with_order_creator(mut self, creator: impl Into<String>) -> Self {
        self.order_creator = creator.into();
        self
    }

    /// Sets the order number prefix.
    #[must_use]
    pub fn with_order_number_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.order_number_prefix = prefix.into();
        self
    }

    /// Sets whether passes run.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns error if any setting is unusable.
    pub fn validate(&self) -> Result<()> {
        if self.lock_ttl.is_zero() {
            return Err(ScalingError::InvalidConfig {
                reason: "lock_ttl must be positive".into(),
            });
        }
        if self.candidate_cap == 0 {
            return Err(ScalingError::InvalidConfig {
                reason: "candidate_cap must be positive".into(),
            });
        }
        if self.search_page_size == 0 {
            return Err(ScalingError::InvalidConfig {
                reason: "search_page_size must be positive".into(),
            });
        }
        if self.default_resource_type.as_str().trim().is_empty() {
            return Err(ScalingError::InvalidConfig {
                reason: "default_resource_type must not be blank".into(),
            });
        }
        if self.order_creator.trim().is_empty() {
            return Err(ScalingError::InvalidConfig {
                reason: "order_creator must not be blank".into(),
            });
        }
        Ok(())
    }
}

/// What happened to one (strategy, cluster, resource type) association.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationOutcome {
    /// Strategy evaluated.
    pub strategy_id: StrategyId,
    /// Cluster evaluated.
    pub cluster_id: ClusterId,
    /// Resource pool evaluated.
    pub resource_type: ResourceType,
    /// Recorded result.
    pub result: ExecutionResult,
    /// Recorded reason.
    pub reason: String,
    /// Order created, if any.
    pub order_id: Option<OrderId>,
    /// Devices in the order.
    pub device_count: usize,
    /// History row id, or `None` when the audit insert failed.
    #[serde(default)]
    pub history_id: Option<HistoryId>,
}

impl AssociationOutcome {
    /// Whether the audit row for this outcome was written.
    #[must_use]
    pub const fn history_recorded(&self) -> bool {
        self.history_id.is_some()
    }
}

/// Summary of one evaluation pass.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TickReport {
    /// Strategies evaluated under their lock.
    pub evaluated: usize,
    /// Strategies skipped because another instance held the lock.
    pub skipped_locked: usize,
    /// Strategies that failed before any association ran.
    pub failed: usize,
    /// Per-association outcomes in evaluation order.
    pub outcomes: Vec<AssociationOutcome>,
}

impl TickReport {
    /// Number of outcomes with the given result.
    #[must_use]
    pub fn count(&self, result: ExecutionResult) -> usize {
        self.outcomes.iter().filter(|o| o.result == result).count()
    }

    /// Number of orders created.
    #[must_use]
    pub fn orders_created(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_order()).count()
    }

    /// Number of outcomes whose history row could not be written.
    #[must_use]
    pub fn history_failures(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.history_recorded()).count()
    }
}

enum Step {
    Record(HistoryEntry),
    Ordered(OrderOutcome),
}

/// Evaluates strategies and creates scaling orders.
pub struct ScalingEngine<R, D, L>
where
    R: ScalingRepository + ?Sized,
    D: DeviceSearch + ?Sized,
    L: LockProvider + ?Sized,
{
    config: EngineConfig,
    repository: Arc<R>,
    snapshots: SnapshotAccessor<R>,
    cooldown: CooldownGovernor<R>,
    selector: DeviceSelector<R, D>,
    recorder: ExecutionRecorder<R>,
    coordinator: DistributedCoordinator<L>,
    events: Arc<dyn EventPublisher>,
    enabled: RwLock<bool>,
}

impl<R, D, L> ScalingEngine<R, D, L>
where
    R: ScalingRepository + ?Sized,
    D: DeviceSearch + ?Sized,
    L: LockProvider + ?Sized,
{
    /// Creates an engine over its collaborators.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid.
    pub fn new(config: EngineConfig, repository: Arc<R>, search: Arc<D>, locks: Arc<L>) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            snapshots: SnapshotAccessor::new(Arc::clone(&repository)),
            cooldown: CooldownGovernor::new(Arc::clone(&repository)),
            selector: DeviceSelector::new(
                Arc::clone(&repository),
                search,
                config.candidate_cap,
                config.search_page_size,
            ),
            recorder: ExecutionRecorder::new(
                Arc::clone(&repository),
                config.order_creator.clone(),
                config.order_number_prefix.clone(),
            ),
            coordinator: DistributedCoordinator::new(locks, config.lock_ttl),
            events: Arc::new(TracingEventPublisher::new()),
            enabled: RwLock::new(config.enabled),
            repository,
            config,
        })
    }

    /// Replaces the event publisher.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = events;
        self
    }

    /// The engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Whether passes run.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        *self.enabled.read()
    }

    /// Turns passes on or off.
    pub fn set_enabled(&self, enabled: bool) {
        *self.enabled.write() = enabled;
        info!(enabled, "scaling engine toggled");
    }

    /// Runs one evaluation pass now.
    ///
    /// # Errors
    ///
    /// Returns error only if the strategy list cannot be read.
    pub fn evaluate_strategies(&self) -> Result<TickReport> {
        self.evaluate_strategies_at(Utc::now())
    }

    /// Runs one evaluation pass at a specific time.
    ///
    /// # Errors
    ///
    /// Returns error only if the strategy list cannot be read.
    pub fn evaluate_strategies_at(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let mut report = TickReport::default();

        if !self.is_enabled() {
            info!("scaling engine disabled; skipping pass");
            return Ok(report);
        }

        let strategies = self.repository.enabled_strategies()?;
        debug!(count = strategies.len(), "evaluating strategies");

        for strategy in &strategies {
            match self
                .coordinator
                .with_lock(strategy.id, || self.evaluate_strategy(strategy, now))
            {
                Ok(LockOutcome::Acquired(Ok(outcomes))) => {
                    report.evaluated += 1;
                    report.outcomes.extend(outcomes);
                }
                Ok(LockOutcome::Acquired(Err(e))) => {
                    warn!(strategy = %strategy.id, error = %e, "strategy evaluation failed");
                    report.failed += 1;
                }
                Ok(LockOutcome::Skipped) => {
                    warn!(strategy = %strategy.id, "strategy locked by another instance; skipping");
                    report.skipped_locked += 1;
                }
                Err(e) => {
                    error!(strategy = %strategy.id, error = %e, "failed to acquire strategy lock");
                    report.failed += 1;
                }
            }
        }

        info!(
            evaluated = report.evaluated,
            skipped_locked = report.skipped_locked,
            failed = report.failed,
            orders = report.orders_created(),
            history_failures = report.history_failures(),
            "scaling pass complete"
        );
        Ok(report)
    }

    fn evaluate_strategy(&self, strategy: &Strategy, now: DateTime<Utc>) -> Result<Vec<AssociationOutcome>> {
        let mut clusters = self.repository.clusters_for_strategy(strategy.id)?;
        if clusters.is_empty() {
            clusters.clone_from(&self.config.default_clusters);
        }
        if clusters.is_empty() {
            debug!(strategy = %strategy.id, "strategy has no clusters");
            return Ok(Vec::new());
        }

        let resource_types = strategy.resource_types_or(&self.config.default_resource_type);

        let required_days = strategy.validate().and_then(|()| strategy.required_days());
        if let Err(e) = &required_days {
            warn!(strategy = %strategy.id, error = %e, "strategy configuration rejected");
        }

        let mut outcomes = Vec::with_capacity(clusters.len() * resource_types.len());
        for &cluster_id in &clusters {
            for resource_type in &resource_types {
                let step = match &required_days {
                    Ok(days) => self.decide(strategy, *days, cluster_id, resource_type, now),
                    Err(e) => Err(e.clone()),
                };
                outcomes.push(self.finish(strategy, cluster_id, resource_type, now, step));
            }
        }
        Ok(outcomes)
    }

    fn decide(
        &self,
        strategy: &Strategy,
        required_days: u32,
        cluster_id: ClusterId,
        resource_type: &ResourceType,
        now: DateTime<Utc>,
    ) -> Result<Step> {
        if let Some(until) = self
            .cooldown
            .cooldown_until(strategy, cluster_id, resource_type, now)?
        {
            info!(
                strategy = %strategy.id,
                cluster = %cluster_id,
                resource_type = %resource_type,
                until = %until,
                "in cooldown; skipping"
            );
            return Ok(Step::Record(
                HistoryEntry::new(strategy.id, cluster_id, resource_type.clone(), ExecutionResult::SkippedCooldown, now)
                    .with_reason(format!("cooldown active until {}", until.to_rfc3339())),
            ));
        }

        let snapshots = self
            .snapshots
            .daily_snapshots(cluster_id, resource_type, required_days, now)?;
        let evaluation = evaluate(&snapshots, strategy, required_days);

        if !evaluation.breached {
            debug!(
                strategy = %strategy.id,
                cluster = %cluster_id,
                resource_type = %resource_type,
                consecutive_days = evaluation.consecutive_days,
                required_days,
                "threshold not met"
            );
            return Ok(Step::Record(
                HistoryEntry::new(
                    strategy.id,
                    cluster_id,
                    resource_type.clone(),
                    ExecutionResult::FailureThresholdNotMet,
                    now,
                )
                .with_values(evaluation.triggered_value, evaluation.threshold_value)
                .with_reason(format!(
                    "{} of {required_days} required consecutive day(s) breached",
                    evaluation.consecutive_days
                )),
            ));
        }

        let latest = snapshots.last().ok_or_else(|| ScalingError::InsufficientSnapshots {
            cluster_id: cluster_id.to_string(),
            resource_type: resource_type.to_string(),
            found: 0,
            required: required_days,
        })?;
        let delta = ResourceDelta::compute(latest, strategy);

        info!(
            strategy = %strategy.id,
            cluster = %cluster_id,
            resource_type = %resource_type,
            consecutive_days = evaluation.consecutive_days,
            delta = %delta,
            "threshold breached"
        );

        let selection = self
            .selector
            .select(strategy.action, cluster_id, resource_type, delta)?;

        Ok(Step::Ordered(self.recorder.create_order(OrderRequest {
            strategy_id: strategy.id,
            cluster_id,
            resource_type: resource_type.clone(),
            action: strategy.action,
            device_ids: selection.device_ids(),
            candidates_found: selection.candidates_found,
            triggered_value: evaluation.triggered_value,
            threshold_value: evaluation.threshold_value,
            at: now,
        })))
    }

    fn finish(
        &self,
        strategy: &Strategy,
        cluster_id: ClusterId,
        resource_type: &ResourceType,
        now: DateTime<Utc>,
        step: Result<Step>,
    ) -> AssociationOutcome {
        let outcome = match step {
            Ok(Step::Ordered(ordered)) => {
                if let Some(record) = &ordered.order {
                    self.events.publish(&ScalingEvent::OrderCreated {
                        order_id: record.order.id,
                        order_number: record.order.number.clone(),
                        strategy_id: strategy.id,
                        cluster_id,
                        resource_type: resource_type.clone(),
                        action: strategy.action,
                        device_count: record.detail.device_count,
                    });
                }
                AssociationOutcome {
                    strategy_id: strategy.id,
                    cluster_id,
                    resource_type: resource_type.clone(),
                    result: ordered.result,
                    reason: ordered.reason,
                    order_id: ordered.order.as_ref().map(|r| r.order.id),
                    device_count: ordered.order.as_ref().map_or(0, |r| r.detail.device_count),
                    history_id: ordered.history_id,
                }
            }
            Ok(Step::Record(entry)) => self.record(entry),
            Err(e) => {
                warn!(
                    strategy = %strategy.id,
                    cluster = %cluster_id,
                    resource_type = %resource_type,
                    error = %e,
                    "association evaluation failed"
                );
                let result = e.execution_result().unwrap_or(ExecutionResult::FailureDbError);
                self.record(
                    HistoryEntry::new(strategy.id, cluster_id, resource_type.clone(), result, now)
                        .with_values(String::new(), threshold_text(strategy))
                        .with_reason(e.to_string()),
                )
            }
        };

        self.events.publish(&ScalingEvent::DecisionRecorded {
            strategy_id: outcome.strategy_id,
            cluster_id: outcome.cluster_id,
            resource_type: outcome.resource_type.clone(),
            result: outcome.result,
            order_id: outcome.order_id,
        });
        outcome
    }

    fn record(&self, entry: HistoryEntry) -> AssociationOutcome {
        let mut outcome = AssociationOutcome {
            strategy_id: entry.strategy_id,
            cluster_id: entry.cluster_id,
            resource_type: entry.resource_type.clone(),
            result: entry.result,
            reason: entry.reason.clone(),
            order_id: entry.order_id,
            device_count: 0,
            history_id: None,
        };
        outcome.history_id = self.recorder.record(entry).ok();
        outcome
    }
}
