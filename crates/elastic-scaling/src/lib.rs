//! Elastic scaling decision engine for Kubernetes resource pools.
//!
//! `elastic-scaling` watches daily utilization of every (cluster, resource
//! pool) a strategy is attached to, and when a threshold has been breached for
//! enough consecutive days it picks concrete devices to move and records a
//! pending scaling order plus an auditable history row.
//!
//! # Features
//!
//! - **Consecutive-day thresholds**: CPU/memory, allocation or usage, AND/OR
//! - **Cooldown**: per (strategy, cluster, resource type) suppression window
//! - **Delta sizing**: capacity needed to return to the threshold
//! - **Device selection**: policy-driven filters, tiered greedy bin-packing
//! - **Audit trail**: one history row per association per pass
//! - **Coordination**: per-strategy TTL locks across scheduler instances
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use chrono::{Duration, Utc};
//! use elastic_scaling::prelude::*;
//!
//! let repo = Arc::new(InMemoryRepository::new());
//! repo.upsert_strategy(
//!     Strategy::builder(1, "cpu-hot")
//!         .pool_entry()
//!         .cpu_threshold(80.0, ThresholdType::Allocated)
//!         .required_days(2)
//!         .cooldown_minutes(720)
//!         .build()?,
//! );
//! repo.associate(StrategyId::new(1), ClusterId::new(7));
//!
//! let now = Utc::now();
//! for days_ago in [1, 0] {
//!     repo.add_snapshot(
//!         ResourceSnapshot::new(ClusterId::new(7), ResourceType::total(), now - Duration::days(days_ago))
//!             .with_cpu(100.0, 95.0),
//!     );
//! }
//!
//! repo.upsert_template(QueryTemplate::new(1, "free stock", "[]"));
//! repo.upsert_policy(DeviceMatchingPolicy::new(
//!     1,
//!     "entry",
//!     ResourceType::total(),
//!     ThresholdAction::PoolEntry,
//!     Some(1),
//! ));
//!
//! let devices = Arc::new(InMemoryDeviceSearch::with_devices(vec![
//!     CandidateDevice::new(10, 64.0, 256.0),
//! ]));
//! let engine = ScalingEngine::new(
//!     EngineConfig::default(),
//!     repo,
//!     devices,
//!     Arc::new(InMemoryLockProvider::new()),
//! )?;
//!
//! let report = engine.evaluate_strategies()?;
//! assert_eq!(report.orders_created(), 1);
//! # Ok::<(), elastic_scaling::ScalingError>(())
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                ScalingEngine                 │
//! │  DistributedCoordinator (lock per strategy)  │
//! │   └─ per cluster × resource type:            │
//! │      CooldownGovernor → SnapshotAccessor     │
//! │      → evaluate → ResourceDelta              │
//! │      → DeviceSelector → ExecutionRecorder    │
//! ├──────────────────────────────────────────────┤
//! │ ScalingRepository │ DeviceSearch │ LockProvider
//! └──────────────────────────────────────────────┘
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

pub mod cooldown;
pub mod coordinator;
pub mod delta;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod events;
pub mod order;
pub mod query;
pub mod recorder;
pub mod selection;
pub mod snapshot;
pub mod store;
pub mod types;

// Re-export main types
pub use cooldown::CooldownGovernor;
pub use coordinator::{
    strategy_lock_key, DistributedCoordinator, InMemoryLockProvider, LockGuard, LockOutcome, LockProvider,
};
pub use delta::ResourceDelta;
pub use engine::{AssociationOutcome, EngineConfig, ScalingEngine, TickReport};
pub use error::{Result, ScalingError};
pub use evaluator::{evaluate, Evaluation};
pub use events::{
    BoxedEventPublisher, EventBus, EventPublisher, FanoutPublisher, NoopEventPublisher, ScalingEvent,
    TracingEventPublisher,
};
pub use order::{
    ExecutionHistory, ExecutionResult, HistoryEntry, NewOrder, Order, OrderRecord, OrderStatus,
    ScalingOrderDetail,
};
pub use query::{
    DeviceMatchingPolicy, DeviceQuery, FilterCondition, FilterGroup, FilterOperator, QueryTemplate,
};
pub use recorder::{ExecutionRecorder, OrderOutcome, OrderRequest};
pub use selection::{DeviceSearch, DeviceSelector, InMemoryDeviceSearch, Selection};
pub use snapshot::SnapshotAccessor;
pub use store::{
    HistoryStore, InMemoryRepository, OrderStore, PolicyStore, RepositoryState, ScalingRepository,
    SnapshotStore, StrategyStore,
};
pub use types::{
    CandidateDevice, ClusterId, ConditionLogic, DeviceId, HistoryId, Metric, MetricThreshold, OrderId,
    PolicyId, ResourceSnapshot, ResourceType, Strategy, StrategyBuilder, StrategyClusterAssociation,
    StrategyId, StrategyStatus, TemplateId, ThresholdAction, ThresholdType,
};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::coordinator::{InMemoryLockProvider, LockProvider};
    pub use crate::engine::{EngineConfig, ScalingEngine, TickReport};
    pub use crate::error::{Result, ScalingError};
    pub use crate::events::{EventPublisher, ScalingEvent};
    pub use crate::order::{ExecutionResult, OrderStatus};
    pub use crate::query::{DeviceMatchingPolicy, FilterCondition, FilterOperator, QueryTemplate};
    pub use crate::selection::{DeviceSearch, InMemoryDeviceSearch};
    pub use crate::store::{InMemoryRepository, ScalingRepository};
    pub use crate::types::{
        CandidateDevice, ClusterId, ConditionLogic, ResourceSnapshot, ResourceType, Strategy, StrategyId,
        ThresholdAction, ThresholdType,
    };
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    type Engine = ScalingEngine<InMemoryRepository, InMemoryDeviceSearch, InMemoryLockProvider>;

    struct Fixture {
        repo: Arc<InMemoryRepository>,
        locks: Arc<InMemoryLockProvider>,
        engine: Engine,
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-05T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn fixture(devices: Vec<CandidateDevice>) -> Fixture {
        fixture_with(EngineConfig::default(), devices)
    }

    fn fixture_with(config: EngineConfig, devices: Vec<CandidateDevice>) -> Fixture {
        let repo = Arc::new(InMemoryRepository::new());
        let locks = Arc::new(InMemoryLockProvider::new());
        let engine = ScalingEngine::new(
            config,
            Arc::clone(&repo),
            Arc::new(InMemoryDeviceSearch::with_devices(devices)),
            Arc::clone(&locks),
        )
        .unwrap()
        .with_events(Arc::new(NoopEventPublisher::new()));
        Fixture { repo, locks, engine }
    }

    fn cpu_strategy(id: u64, action: ThresholdAction, threshold: f64, days: u32) -> Strategy {
        Strategy::builder(id, format!("strategy-{id}"))
            .action(action)
            .cpu_threshold(threshold, ThresholdType::Allocated)
            .required_days(days)
            .cooldown_minutes(60)
            .build()
            .unwrap()
    }

    /// One snapshot per day ending today; capacity 320 cores.
    fn add_daily(repo: &InMemoryRepository, cluster: u64, resource_type: &str, ratios: &[f64]) {
        let count = ratios.len() as i64;
        for (i, ratio) in ratios.iter().enumerate() {
            let at = now() - Duration::days(count - 1 - i as i64) - Duration::hours(2);
            repo.add_snapshot(
                ResourceSnapshot::new(ClusterId::new(cluster), ResourceType::new(resource_type), at)
                    .with_cpu(320.0, 320.0 * ratio / 100.0)
                    .with_memory(1024.0, 512.0),
            );
        }
    }

    fn add_policy(repo: &InMemoryRepository, resource_type: &str, action: ThresholdAction) {
        repo.upsert_template(QueryTemplate::new(1, "all devices", "[]"));
        let id = match action {
            ThresholdAction::PoolEntry => 1,
            ThresholdAction::PoolExit => 2,
        };
        repo.upsert_policy(DeviceMatchingPolicy::new(
            id,
            "default",
            ResourceType::new(resource_type),
            action,
            Some(1),
        ));
    }

    fn spec_devices(cluster: u64) -> Vec<CandidateDevice> {
        vec![
            CandidateDevice::new(1, 32.0, 128.0).with_cluster(cluster),
            CandidateDevice::new(2, 64.0, 256.0).with_cluster(cluster),
            CandidateDevice::new(3, 16.0, 64.0).with_cluster(cluster),
        ]
    }

    fn device_ids(record: &OrderRecord) -> Vec<u64> {
        record.detail.device_ids.iter().map(|d| d.get()).collect()
    }

    #[test]
    fn broken_streak_records_threshold_not_met() {
        let f = fixture(spec_devices(0));
        f.repo.upsert_strategy(cpu_strategy(1, ThresholdAction::PoolEntry, 80.0, 3));
        f.repo.associate(StrategyId::new(1), ClusterId::new(7));
        add_daily(&f.repo, 7, "total", &[85.0, 90.0, 60.0, 88.0, 92.0]);
        add_policy(&f.repo, "total", ThresholdAction::PoolEntry);

        let report = f.engine.evaluate_strategies_at(now()).unwrap();

        assert_eq!(report.evaluated, 1);
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].result, ExecutionResult::FailureThresholdNotMet);
        assert!(f.repo.orders().is_empty());

        let history = f.repo.history(None, 10);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].entry.reason, "2 of 3 required consecutive day(s) breached");
        assert_eq!(history[0].entry.threshold_value, "CPU allocation > 80.00%");
    }

    #[test]
    fn breach_creates_order_with_greedy_selection() {
        let f = fixture(spec_devices(0));
        f.repo.upsert_strategy(cpu_strategy(1, ThresholdAction::PoolEntry, 80.0, 2));
        f.repo.associate(StrategyId::new(1), ClusterId::new(7));
        // 100% of 320 at an 80% threshold needs 400: delta +80
        add_daily(&f.repo, 7, "total", &[100.0, 100.0]);
        add_policy(&f.repo, "total", ThresholdAction::PoolEntry);

        let report = f.engine.evaluate_strategies_at(now()).unwrap();
        assert_eq!(report.count(ExecutionResult::OrderCreated), 1);

        let orders = f.repo.orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(device_ids(&orders[0]), vec![2, 1]);
        assert_eq!(orders[0].order.status, OrderStatus::Pending);
        assert_eq!(orders[0].detail.action, ThresholdAction::PoolEntry);
        assert_eq!(orders[0].order.name, "Pool entry 7 total: 2 device(s)");

        let history = f.repo.history(None, 10);
        assert_eq!(history[0].entry.order_id, Some(orders[0].order.id));
        assert_eq!(history[0].entry.triggered_value, "CPU allocation 100.00%");
    }

    #[test]
    fn pool_exit_removes_smallest_devices() {
        let f = fixture(spec_devices(7));
        f.repo.upsert_strategy(cpu_strategy(1, ThresholdAction::PoolExit, 50.0, 1));
        f.repo.associate(StrategyId::new(1), ClusterId::new(7));
        // 37.5% of 320 at a 50% threshold needs 240: delta -80
        add_daily(&f.repo, 7, "total", &[37.5]);
        add_policy(&f.repo, "total", ThresholdAction::PoolExit);

        f.engine.evaluate_strategies_at(now()).unwrap();

        let orders = f.repo.orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(device_ids(&orders[0]), vec![3, 1, 2]);
    }

    #[test]
    fn zero_candidates_creates_reminder_order() {
        let f = fixture(Vec::new());
        f.repo.upsert_strategy(cpu_strategy(1, ThresholdAction::PoolEntry, 80.0, 1));
        f.repo.associate(StrategyId::new(1), ClusterId::new(7));
        add_daily(&f.repo, 7, "total", &[95.0]);
        add_policy(&f.repo, "total", ThresholdAction::PoolEntry);

        let report = f.engine.evaluate_strategies_at(now()).unwrap();
        assert_eq!(report.outcomes[0].result, ExecutionResult::OrderCreatedNoDevices);
        assert_eq!(report.outcomes[0].device_count, 0);

        let orders = f.repo.orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].detail.device_count, 0);
        assert_eq!(
            f.repo.history(None, 1)[0].entry.result,
            ExecutionResult::OrderCreatedNoDevices
        );
    }

    #[test]
    fn cooldown_suppresses_until_window_ends() {
        let f = fixture(spec_devices(0));
        f.repo.upsert_strategy(cpu_strategy(1, ThresholdAction::PoolEntry, 80.0, 1));
        f.repo.associate(StrategyId::new(1), ClusterId::new(7));
        add_daily(&f.repo, 7, "total", &[95.0]);
        add_policy(&f.repo, "total", ThresholdAction::PoolEntry);

        f.engine.evaluate_strategies_at(now()).unwrap();
        let second = f
            .engine
            .evaluate_strategies_at(now() + Duration::minutes(30))
            .unwrap();
        assert_eq!(second.outcomes[0].result, ExecutionResult::SkippedCooldown);
        assert_eq!(f.repo.orders().len(), 1);

        let third = f
            .engine
            .evaluate_strategies_at(now() + Duration::minutes(60))
            .unwrap();
        assert_eq!(third.outcomes[0].result, ExecutionResult::OrderCreated);
        assert_eq!(f.repo.orders().len(), 2);
    }

    #[test]
    fn cancelled_order_does_not_hold_cooldown() {
        let f = fixture(spec_devices(0));
        f.repo.upsert_strategy(cpu_strategy(1, ThresholdAction::PoolEntry, 80.0, 1));
        f.repo.associate(StrategyId::new(1), ClusterId::new(7));
        add_daily(&f.repo, 7, "total", &[95.0]);
        add_policy(&f.repo, "total", ThresholdAction::PoolEntry);

        f.engine.evaluate_strategies_at(now()).unwrap();
        let first = f.repo.orders()[0].order.id;
        f.repo.set_order_status(first, OrderStatus::Cancelled).unwrap();

        let report = f
            .engine
            .evaluate_strategies_at(now() + Duration::minutes(5))
            .unwrap();
        assert_eq!(report.outcomes[0].result, ExecutionResult::OrderCreated);
    }

    #[test]
    fn resource_types_scale_independently() {
        let mut strategy = cpu_strategy(1, ThresholdAction::PoolEntry, 80.0, 1);
        strategy.resource_types = ResourceType::parse_list("intel_common,arm_common");
        let f = fixture(spec_devices(0));
        f.repo.upsert_strategy(strategy);
        f.repo.associate(StrategyId::new(1), ClusterId::new(7));
        add_daily(&f.repo, 7, "intel_common", &[95.0]);
        add_daily(&f.repo, 7, "arm_common", &[95.0]);
        add_policy(&f.repo, "intel_common", ThresholdAction::PoolEntry);

        let report = f.engine.evaluate_strategies_at(now()).unwrap();
        let results: Vec<(String, ExecutionResult)> = report
            .outcomes
            .iter()
            .map(|o| (o.resource_type.to_string(), o.result))
            .collect();
        assert_eq!(
            results,
            vec![
                ("intel_common".to_string(), ExecutionResult::OrderCreated),
                ("arm_common".to_string(), ExecutionResult::FailureInvalidQueryTemplateId),
            ]
        );

        // The intel_common order must not put arm_common into cooldown.
        f.repo.upsert_template(QueryTemplate::new(2, "arm devices", "[]"));
        f.repo.upsert_policy(DeviceMatchingPolicy::new(
            3,
            "arm",
            ResourceType::new("arm_common"),
            ThresholdAction::PoolEntry,
            Some(2),
        ));
        let report = f
            .engine
            .evaluate_strategies_at(now() + Duration::minutes(10))
            .unwrap();
        assert_eq!(report.outcomes[0].result, ExecutionResult::SkippedCooldown);
        assert_eq!(report.outcomes[1].result, ExecutionResult::OrderCreated);
    }

    #[test]
    fn held_lock_skips_strategy_without_history() {
        let f = fixture(spec_devices(0));
        f.repo.upsert_strategy(cpu_strategy(1, ThresholdAction::PoolEntry, 80.0, 1));
        f.repo.upsert_strategy(cpu_strategy(2, ThresholdAction::PoolEntry, 80.0, 1));
        f.repo.associate(StrategyId::new(1), ClusterId::new(7));
        f.repo.associate(StrategyId::new(2), ClusterId::new(7));
        add_daily(&f.repo, 7, "total", &[50.0]);

        f.locks
            .try_acquire(
                &strategy_lock_key(StrategyId::new(1)),
                "other-instance",
                std::time::Duration::from_secs(30),
            )
            .unwrap();

        let report = f.engine.evaluate_strategies_at(now()).unwrap();
        assert_eq!(report.skipped_locked, 1);
        assert_eq!(report.evaluated, 1);
        let history = f.repo.history(None, 10);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].entry.strategy_id, StrategyId::new(2));
        assert!(!f.locks.is_held(&strategy_lock_key(StrategyId::new(2))));
    }

    #[test]
    fn ambiguous_duration_records_invalid_strategy() {
        let mut strategy = cpu_strategy(1, ThresholdAction::PoolEntry, 80.0, 1);
        strategy.required_consecutive_days = None;
        strategy.legacy_duration = Some(150);
        let f = fixture(spec_devices(0));
        f.repo.upsert_strategy(strategy);
        f.repo.associate(StrategyId::new(1), ClusterId::new(7));
        f.repo.associate(StrategyId::new(1), ClusterId::new(8));

        let report = f.engine.evaluate_strategies_at(now()).unwrap();
        assert_eq!(report.count(ExecutionResult::FailureInvalidStrategy), 2);
        assert!(report.outcomes[0].reason.contains("ambiguous"));
    }

    #[test]
    fn out_of_range_thresholds_loaded_from_state_are_rejected() {
        for bad in [0.0, f64::NAN, 150.0] {
            let mut strategy = cpu_strategy(1, ThresholdAction::PoolEntry, 80.0, 1);
            strategy.cpu = Some(MetricThreshold::new(bad, ThresholdType::Allocated));
            let devices = (1..=50).map(|id| CandidateDevice::new(id, 16.0, 64.0)).collect();
            let f = fixture(devices);
            f.repo.upsert_strategy(strategy);
            f.repo.associate(StrategyId::new(1), ClusterId::new(7));
            add_daily(&f.repo, 7, "total", &[1.0]);
            add_policy(&f.repo, "total", ThresholdAction::PoolEntry);

            let report = f.engine.evaluate_strategies_at(now()).unwrap();
            assert_eq!(report.outcomes.len(), 1);
            assert_eq!(report.outcomes[0].result, ExecutionResult::FailureInvalidStrategy);
            assert!(report.outcomes[0].reason.contains("threshold must be in (0, 100]"));
            assert!(f.repo.orders().is_empty());
        }
    }

    #[test]
    fn legacy_minutes_duration_is_honoured() {
        let mut strategy = cpu_strategy(1, ThresholdAction::PoolEntry, 80.0, 1);
        strategy.required_consecutive_days = None;
        strategy.legacy_duration = Some(2880);
        let f = fixture(spec_devices(0));
        f.repo.upsert_strategy(strategy);
        f.repo.associate(StrategyId::new(1), ClusterId::new(7));
        add_daily(&f.repo, 7, "total", &[95.0, 95.0]);
        add_policy(&f.repo, "total", ThresholdAction::PoolEntry);

        let report = f.engine.evaluate_strategies_at(now()).unwrap();
        assert_eq!(report.outcomes[0].result, ExecutionResult::OrderCreated);
    }

    #[test]
    fn tick_after_midnight_uses_previous_complete_days() {
        let f = fixture(spec_devices(0));
        f.repo.upsert_strategy(cpu_strategy(1, ThresholdAction::PoolEntry, 80.0, 2));
        f.repo.associate(StrategyId::new(1), ClusterId::new(7));
        add_daily(&f.repo, 7, "total", &[100.0, 100.0]);
        add_policy(&f.repo, "total", ThresholdAction::PoolEntry);

        // Snapshots sit on 03-04 and 03-05; the next day's collector has not run yet.
        let just_after_midnight = now() + Duration::hours(12) + Duration::minutes(5);
        let report = f.engine.evaluate_strategies_at(just_after_midnight).unwrap();
        assert_eq!(report.outcomes[0].result, ExecutionResult::OrderCreated);
    }

    #[test]
    fn configuration_failures_are_recorded() {
        let f = fixture(spec_devices(0));
        for (id, cluster) in [(1, 7), (2, 8), (3, 9)] {
            f.repo.upsert_strategy(cpu_strategy(id, ThresholdAction::PoolEntry, 80.0, 3));
            f.repo.associate(StrategyId::new(id), ClusterId::new(cluster));
        }
        // cluster 7: too few days; cluster 8: no policy; cluster 9: bad template
        add_daily(&f.repo, 7, "total", &[95.0, 95.0]);
        add_daily(&f.repo, 8, "total", &[95.0, 95.0, 95.0]);

        let report = f.engine.evaluate_strategies_at(now()).unwrap();
        assert_eq!(report.outcomes[0].result, ExecutionResult::FailureNoSnapshotsForDuration);
        assert_eq!(report.outcomes[1].result, ExecutionResult::FailureInvalidQueryTemplateId);

        f.repo.upsert_template(QueryTemplate::new(5, "broken", "{"));
        f.repo.upsert_policy(DeviceMatchingPolicy::new(
            1,
            "broken",
            ResourceType::total(),
            ThresholdAction::PoolEntry,
            Some(5),
        ));
        add_daily(&f.repo, 9, "total", &[95.0, 95.0, 95.0]);
        let report = f.engine.evaluate_strategies_at(now()).unwrap();
        assert_eq!(
            report.outcomes[2].result,
            ExecutionResult::FailureQueryTemplateUnmarshalError
        );
        assert!(f.repo.orders().is_empty());
        assert_eq!(f.repo.history(None, 100).len(), 6);
    }

    #[test]
    fn default_clusters_apply_without_associations() {
        let config = EngineConfig::default().with_default_clusters(vec![ClusterId::new(3), ClusterId::new(4)]);
        let f = fixture_with(config, spec_devices(0));
        f.repo.upsert_strategy(cpu_strategy(1, ThresholdAction::PoolEntry, 80.0, 1));
        add_daily(&f.repo, 3, "total", &[20.0]);
        add_daily(&f.repo, 4, "total", &[20.0]);

        let report = f.engine.evaluate_strategies_at(now()).unwrap();
        let clusters: Vec<u64> = report.outcomes.iter().map(|o| o.cluster_id.get()).collect();
        assert_eq!(clusters, vec![3, 4]);
    }

    #[test]
    fn disabled_engine_does_nothing() {
        let f = fixture(spec_devices(0));
        f.repo.upsert_strategy(cpu_strategy(1, ThresholdAction::PoolEntry, 80.0, 1));
        f.repo.associate(StrategyId::new(1), ClusterId::new(7));

        f.engine.set_enabled(false);
        assert!(!f.engine.is_enabled());
        let report = f.engine.evaluate_strategies_at(now()).unwrap();
        assert_eq!(report, TickReport::default());
        assert!(f.repo.history(None, 10).is_empty());

        f.engine.set_enabled(true);
        let report = f.engine.evaluate_strategies_at(now()).unwrap();
        assert_eq!(report.evaluated, 1);
    }

    #[test]
    fn events_are_published() {
        let repo = Arc::new(InMemoryRepository::new());
        let bus = Arc::new(EventBus::new());
        let orders = Arc::new(AtomicUsize::new(0));
        let decisions = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&orders);
        bus.subscribe(events::ORDER_CREATED, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = Arc::clone(&decisions);
        bus.subscribe(events::DECISION_RECORDED, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let engine = ScalingEngine::new(
            EngineConfig::default(),
            Arc::clone(&repo),
            Arc::new(InMemoryDeviceSearch::with_devices(spec_devices(0))),
            Arc::new(InMemoryLockProvider::new()),
        )
        .unwrap()
        .with_events(bus);

        repo.upsert_strategy(cpu_strategy(1, ThresholdAction::PoolEntry, 80.0, 1));
        repo.associate(StrategyId::new(1), ClusterId::new(7));
        repo.associate(StrategyId::new(1), ClusterId::new(8));
        add_daily(&repo, 7, "total", &[95.0]);
        add_daily(&repo, 8, "total", &[10.0]);
        add_policy(&repo, "total", ThresholdAction::PoolEntry);

        engine.evaluate_strategies_at(now()).unwrap();
        assert_eq!(orders.load(Ordering::SeqCst), 1);
        assert_eq!(decisions.load(Ordering::SeqCst), 2);
    }

    mod failure_isolation {
        use super::*;

        /// Repository whose snapshot reads fail for one cluster and whose
        /// history table can be taken down.
        struct FaultyRepository {
            inner: InMemoryRepository,
            broken: ClusterId,
            history_down: bool,
        }

        impl FaultyRepository {
            fn new(broken: u64, history_down: bool) -> Self {
                Self {
                    inner: InMemoryRepository::new(),
                    broken: ClusterId::new(broken),
                    history_down,
                }
            }
        }

        impl StrategyStore for FaultyRepository {
            fn enabled_strategies(&self) -> Result<Vec<Strategy>> {
                self.inner.enabled_strategies()
            }

            fn clusters_for_strategy(&self, strategy_id: StrategyId) -> Result<Vec<ClusterId>> {
                self.inner.clusters_for_strategy(strategy_id)
            }
        }

        impl SnapshotStore for FaultyRepository {
            fn snapshots_between(
                &self,
                cluster_id: ClusterId,
                resource_type: &ResourceType,
                from: DateTime<Utc>,
                to: DateTime<Utc>,
            ) -> Result<Vec<ResourceSnapshot>> {
                if cluster_id == self.broken {
                    return Err(ScalingError::database("snapshot table unavailable"));
                }
                self.inner.snapshots_between(cluster_id, resource_type, from, to)
            }
        }

        impl OrderStore for FaultyRepository {
            fn latest_active_order(
                &self,
                strategy_id: StrategyId,
                cluster_id: ClusterId,
                resource_type: &ResourceType,
            ) -> Result<Option<OrderRecord>> {
                self.inner.latest_active_order(strategy_id, cluster_id, resource_type)
            }

            fn create_order(&self, order: NewOrder) -> Result<OrderRecord> {
                self.inner.create_order(order)
            }
        }

        impl HistoryStore for FaultyRepository {
            fn append_history(&self, entry: HistoryEntry) -> Result<HistoryId> {
                if self.history_down {
                    return Err(ScalingError::database("history table unavailable"));
                }
                self.inner.append_history(entry)
            }
        }

        impl PolicyStore for FaultyRepository {
            fn matching_policies(
                &self,
                resource_type: &ResourceType,
                action: ThresholdAction,
            ) -> Result<Vec<DeviceMatchingPolicy>> {
                self.inner.matching_policies(resource_type, action)
            }

            fn query_template(&self, template_id: TemplateId) -> Result<Option<QueryTemplate>> {
                self.inner.query_template(template_id)
            }
        }

        #[test]
        fn db_error_on_one_cluster_does_not_stop_the_next() {
            let repo = Arc::new(FaultyRepository::new(7, false));
            repo.inner
                .upsert_strategy(cpu_strategy(1, ThresholdAction::PoolEntry, 80.0, 1));
            repo.inner.associate(StrategyId::new(1), ClusterId::new(7));
            repo.inner.associate(StrategyId::new(1), ClusterId::new(8));
            add_daily(&repo.inner, 8, "total", &[95.0]);
            add_policy(&repo.inner, "total", ThresholdAction::PoolEntry);

            let engine = ScalingEngine::new(
                EngineConfig::default(),
                Arc::clone(&repo),
                Arc::new(InMemoryDeviceSearch::with_devices(spec_devices(0))),
                Arc::new(InMemoryLockProvider::new()),
            )
            .unwrap();

            let report = engine.evaluate_strategies_at(now()).unwrap();
            assert_eq!(report.outcomes[0].result, ExecutionResult::FailureDbError);
            assert!(report.outcomes[0].reason.contains("snapshot table unavailable"));
            assert_eq!(report.outcomes[1].result, ExecutionResult::OrderCreated);
            assert_eq!(repo.inner.history(None, 10).len(), 2);
            assert_eq!(report.history_failures(), 0);
        }

        #[test]
        fn failed_history_insert_is_reported_and_order_kept() {
            let repo = Arc::new(FaultyRepository::new(99, true));
            repo.inner
                .upsert_strategy(cpu_strategy(1, ThresholdAction::PoolEntry, 80.0, 1));
            repo.inner.associate(StrategyId::new(1), ClusterId::new(7));
            repo.inner.associate(StrategyId::new(1), ClusterId::new(8));
            add_daily(&repo.inner, 7, "total", &[95.0]);
            add_daily(&repo.inner, 8, "total", &[40.0]);
            add_policy(&repo.inner, "total", ThresholdAction::PoolEntry);

            let engine = ScalingEngine::new(
                EngineConfig::default(),
                Arc::clone(&repo),
                Arc::new(InMemoryDeviceSearch::with_devices(spec_devices(0))),
                Arc::new(InMemoryLockProvider::new()),
            )
            .unwrap()
            .with_events(Arc::new(NoopEventPublisher::new()));

            let report = engine.evaluate_strategies_at(now()).unwrap();
            assert_eq!(report.outcomes[0].result, ExecutionResult::OrderCreated);
            assert!(report.outcomes[0].order_id.is_some());
            assert!(!report.outcomes[0].history_recorded());
            assert_eq!(report.outcomes[1].result, ExecutionResult::FailureThresholdNotMet);
            assert!(!report.outcomes[1].history_recorded());
            assert_eq!(report.history_failures(), 2);
            assert_eq!(repo.inner.orders().len(), 1);
            assert!(repo.inner.history(None, 10).is_empty());
        }
    }
}
