//! Core types for the scaling engine.
//!
//! This module provides the configuration and measurement types the engine
//! reads:
//! - [`Strategy`]: threshold trigger configuration for one scaling rule
//! - [`ResourceSnapshot`]: a point-in-time capacity/request measurement
//! - [`CandidateDevice`]: a device that may be moved into or out of a cluster
//! - [`ResourceType`]: a named resource pool inside a cluster

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScalingError};

/// Minutes in one day, used to decode legacy minute-based durations.
pub const MINUTES_PER_DAY: i64 = 1440;

/// Legacy durations below this value are literal day counts.
pub const LEGACY_DAY_LIMIT: i64 = 100;

/// Resource type evaluated when a strategy lists none.
pub const DEFAULT_RESOURCE_TYPE: &str = "total";

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Creates a new identifier.
            #[must_use]
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            /// Returns the raw numeric value.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

numeric_id!(
    /// Unique identifier for a scaling strategy.
    StrategyId
);
numeric_id!(
    /// Unique identifier for a Kubernetes cluster.
    ClusterId
);
numeric_id!(
    /// Unique identifier for a physical or virtual device.
    DeviceId
);
numeric_id!(
    /// Unique identifier for an order.
    OrderId
);
numeric_id!(
    /// Unique identifier for a device matching policy.
    PolicyId
);
numeric_id!(
    /// Unique identifier for a device query template.
    TemplateId
);
numeric_id!(
    /// Unique identifier for an execution history row.
    HistoryId
);

/// A named partition of a cluster's capacity (e.g. `total`, `intel_common`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceType(String);

impl ResourceType {
    /// Creates a new resource type.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The pool covering the whole cluster.
    #[must_use]
    pub fn total() -> Self {
        Self::new(DEFAULT_RESOURCE_TYPE)
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses a comma-separated list, trimming blanks and dropping duplicates.
    ///
    /// An empty list yields `[total]`.
    #[must_use]
    pub fn parse_list(list: &str) -> Vec<Self> {
        let mut types: Vec<Self> = Vec::new();
        for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let rt = Self::new(name);
            if !types.contains(&rt) {
                types.push(rt);
            }
        }
        if types.is_empty() {
            types.push(Self::total());
        }
        types
    }
}

impl Default for ResourceType {
    fn default() -> Self {
        Self::total()
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a strategy does once its threshold has been breached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdAction {
    /// Scale out: add devices to the cluster when usage is too high.
    PoolEntry,
    /// Scale in: remove devices from the cluster when usage is too low.
    PoolExit,
}

impl ThresholdAction {
    /// Stable identifier used in storage and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PoolEntry => "pool_entry",
            Self::PoolExit => "pool_exit",
        }
    }

    /// Human-readable label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::PoolEntry => "Pool entry",
            Self::PoolExit => "Pool exit",
        }
    }

    /// Comparison symbol shown in threshold descriptions.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::PoolEntry => ">",
            Self::PoolExit => "<",
        }
    }

    /// Directional comparison: entry breaches above, exit breaches below.
    #[must_use]
    pub fn is_breach(self, measured: f64, threshold: f64) -> bool {
        match self {
            Self::PoolEntry => measured > threshold,
            Self::PoolExit => measured < threshold,
        }
    }
}

impl std::fmt::Display for ThresholdAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which measurement a threshold compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdType {
    /// Max 24h usage ratio reported by the collector.
    Usage,
    /// Request / capacity.
    #[default]
    Allocated,
}

impl ThresholdType {
    /// Human-readable label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Usage => "usage",
            Self::Allocated => "allocation",
        }
    }
}

/// How CPU and memory sub-conditions are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConditionLogic {
    /// Both configured metrics must breach.
    #[default]
    And,
    /// Either configured metric may breach.
    Or,
}

impl ConditionLogic {
    /// Combines two breach flags.
    #[must_use]
    pub const fn combine(self, a: bool, b: bool) -> bool {
        match self {
            Self::And => a && b,
            Self::Or => a || b,
        }
    }

    /// Keyword shown in threshold descriptions.
    #[must_use]
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

/// A measured resource dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// CPU cores.
    Cpu,
    /// Memory.
    Memory,
}

impl Metric {
    /// Human-readable label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Cpu => "CPU",
            Self::Memory => "Memory",
        }
    }
}

/// Threshold configured for one metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricThreshold {
    /// Threshold percentage (0-100].
    pub value: f64,
    /// Which measurement is compared.
    #[serde(default)]
    pub threshold_type: ThresholdType,
    /// Desired percentage after the action completes.
    #[serde(default)]
    pub target_value: Option<f64>,
}

impl MetricThreshold {
    /// Creates a threshold with no post-action target.
    #[must_use]
    pub const fn new(value: f64, threshold_type: ThresholdType) -> Self {
        Self {
            value,
            threshold_type,
            target_value: None,
        }
    }

    /// Sets the post-action target percentage.
    #[must_use]
    pub const fn with_target(mut self, target: f64) -> Self {
        self.target_value = Some(target);
        self
    }

    fn validate(&self, metric: Metric) -> Result<()> {
        if !(self.value > 0.0 && self.value <= 100.0) {
            return Err(ScalingError::InvalidStrategy {
                reason: format!(
                    "{} threshold must be in (0, 100], got {}",
                    metric.label(),
                    self.value
                ),
            });
        }
        if let Some(target) = self.target_value {
            if !(target > 0.0 && target <= 100.0) {
                return Err(ScalingError::InvalidStrategy {
                    reason: format!(
                        "{} target must be in (0, 100], got {target}",
                        metric.label()
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Whether a strategy participates in evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StrategyStatus {
    /// Evaluated every tick.
    #[default]
    Enabled,
    /// Ignored by the engine.
    Disabled,
}

/// Decodes the legacy overloaded duration field into a day count.
///
/// Values under [`LEGACY_DAY_LIMIT`] are literal days. Larger values are
/// minutes and must be a whole number of days; anything else cannot be
/// decoded without guessing and is rejected.
pub fn resolve_legacy_duration(value: i64) -> Result<u32> {
    if value <= 0 {
        return Err(ScalingError::InvalidStrategy {
            reason: format!("legacy duration must be positive, got {value}"),
        });
    }
    let days = if value < LEGACY_DAY_LIMIT {
        value
    } else if value % MINUTES_PER_DAY == 0 {
        value / MINUTES_PER_DAY
    } else {
        return Err(ScalingError::InvalidStrategy {
            reason: format!(
                "legacy duration {value} is ambiguous: not a day count and not a whole number of days in minutes"
            ),
        });
    };
    u32::try_from(days).map_err(|_| ScalingError::InvalidStrategy {
        reason: format!("legacy duration {value} is out of range"),
    })
}

/// A threshold-triggered scaling rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    /// Unique identifier.
    pub id: StrategyId,
    /// Human-readable name.
    pub name: String,
    /// Action taken on breach.
    pub action: ThresholdAction,
    /// CPU threshold, if configured.
    #[serde(default)]
    pub cpu: Option<MetricThreshold>,
    /// Memory threshold, if configured.
    #[serde(default)]
    pub memory: Option<MetricThreshold>,
    /// How CPU and memory breaches combine when both are configured.
    #[serde(default)]
    pub condition_logic: ConditionLogic,
    /// Consecutive breaching days required to trigger.
    #[serde(default)]
    pub required_consecutive_days: Option<u32>,
    /// Legacy duration field (days below 100, minutes otherwise).
    #[serde(default)]
    pub legacy_duration: Option<i64>,
    /// Minutes after an order during which the same pool is not re-triggered.
    #[serde(default)]
    pub cooldown_minutes: i64,
    /// Resource pools to evaluate; empty means `total`.
    #[serde(default)]
    pub resource_types: Vec<ResourceType>,
    /// Enabled or disabled.
    #[serde(default)]
    pub status: StrategyStatus,
}

impl Strategy {
    /// Creates a new strategy builder.
    #[must_use]
    pub fn builder(id: u64, name: impl Into<String>) -> StrategyBuilder {
        StrategyBuilder::new(id, name)
    }

    /// Whether the strategy is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.status == StrategyStatus::Enabled
    }

    /// Number of consecutive breaching days required to trigger.
    ///
    /// # Errors
    ///
    /// Returns error if neither duration field is set, if either is out of
    /// range, or if the two fields disagree.
    pub fn required_days(&self) -> Result<u32> {
        let legacy = self.legacy_duration.map(resolve_legacy_duration).transpose()?;

        match (self.required_consecutive_days, legacy) {
            (Some(0), _) => Err(ScalingError::InvalidStrategy {
                reason: "required_consecutive_days must be at least 1".into(),
            }),
            (Some(explicit), Some(legacy)) if explicit != legacy => {
                Err(ScalingError::InvalidStrategy {
                    reason: format!(
                        "required_consecutive_days ({explicit}) conflicts with legacy duration ({legacy} days)"
                    ),
                })
            }
            (Some(explicit), _) => Ok(explicit),
            (None, Some(legacy)) => Ok(legacy),
            (None, None) => Err(ScalingError::InvalidStrategy {
                reason: "no duration configured".into(),
            }),
        }
    }

    /// Resource pools to evaluate, or `default` when none are listed.
    #[must_use]
    pub fn resource_types_or(&self, default: &ResourceType) -> Vec<ResourceType> {
        if self.resource_types.is_empty() {
            vec![default.clone()]
        } else {
            self.resource_types.clone()
        }
    }

    /// Cooldown window, or `None` when cooldown is disabled.
    #[must_use]
    pub fn cooldown(&self) -> Option<Duration> {
        (self.cooldown_minutes > 0).then(|| Duration::minutes(self.cooldown_minutes))
    }

    /// Threshold for a metric, if configured.
    #[must_use]
    pub fn threshold(&self, metric: Metric) -> Option<&MetricThreshold> {
        match metric {
            Metric::Cpu => self.cpu.as_ref(),
            Metric::Memory => self.memory.as_ref(),
        }
    }

    /// Validates this strategy configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the strategy is invalid.
    pub fn validate(&self) -> Result<()> {
        if let Some(cpu) = &self.cpu {
            cpu.validate(Metric::Cpu)?;
        }
        if let Some(memory) = &self.memory {
            memory.validate(Metric::Memory)?;
        }
        self.required_days()?;
        Ok(())
    }
}

/// Builder for creating strategies.
#[derive(Debug)]
pub struct StrategyBuilder {
    id: StrategyId,
    name: String,
    action: ThresholdAction,
    cpu: Option<MetricThreshold>,
    memory: Option<MetricThreshold>,
    condition_logic: ConditionLogic,
    required_consecutive_days: Option<u32>,
    legacy_duration: Option<i64>,
    cooldown_minutes: i64,
    resource_types: Vec<ResourceType>,
    status: StrategyStatus,
}

impl StrategyBuilder {
    /// Creates a new builder with required fields.
    #[must_use]
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id: StrategyId::new(id),
            name: name.into(),
            action: ThresholdAction::PoolEntry,
            cpu: None,
            memory: None,
            condition_logic: ConditionLogic::And,
            required_consecutive_days: None,
            legacy_duration: None,
            cooldown_minutes: 0,
            resource_types: Vec::new(),
            status: StrategyStatus::Enabled,
        }
    }

    /// Sets the trigger action.
    #[must_use]
    pub const fn action(mut self, action: ThresholdAction) -> Self {
        self.action = action;
        self
    }

    /// Scale out on breach.
    #[must_use]
    pub const fn pool_entry(self) -> Self {
        self.action(ThresholdAction::PoolEntry)
    }

    /// Scale in on breach.
    #[must_use]
    pub const fn pool_exit(self) -> Self {
        self.action(ThresholdAction::PoolExit)
    }

    /// Sets a CPU threshold.
    #[must_use]
    pub const fn cpu_threshold(mut self, value: f64, threshold_type: ThresholdType) -> Self {
        self.cpu = Some(MetricThreshold::new(value, threshold_type));
        self
    }

    /// Sets a memory threshold.
    #[must_use]
    pub const fn memory_threshold(mut self, value: f64, threshold_type: ThresholdType) -> Self {
        self.memory = Some(MetricThreshold::new(value, threshold_type));
        self
    }

    /// Sets the full CPU threshold including its target.
    #[must_use]
    pub const fn cpu(mut self, threshold: MetricThreshold) -> Self {
        self.cpu = Some(threshold);
        self
    }

    /// Sets the full memory threshold including its target.
    #[must_use]
    pub const fn memory(mut self, threshold: MetricThreshold) -> Self {
        self.memory = Some(threshold);
        self
    }

    /// Sets the CPU/memory combination logic.
    #[must_use]
    pub const fn condition_logic(mut self, logic: ConditionLogic) -> Self {
        self.condition_logic = logic;
        self
    }

    /// Sets the explicit consecutive-day requirement.
    #[must_use]
    pub const fn required_days(mut self, days: u32) -> Self {
        self.required_consecutive_days = Some(days);
        self
    }

    /// Sets the legacy duration field.
    #[must_use]
    pub const fn legacy_duration(mut self, duration: i64) -> Self {
        self.legacy_duration = Some(duration);
        self
    }

    /// Sets the cooldown in minutes.
    #[must_use]
    pub const fn cooldown_minutes(mut self, minutes: i64) -> Self {
        self.cooldown_minutes = minutes;
        self
    }

    /// Sets the resource pools from a comma-separated list.
    #[must_use]
    pub fn resource_types(mut self, list: &str) -> Self {
        self.resource_types = ResourceType::parse_list(list);
        self
    }

    /// Sets whether the strategy is enabled.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.status = if enabled {
            StrategyStatus::Enabled
        } else {
            StrategyStatus::Disabled
        };
        self
    }

    /// Builds the strategy.
    ///
    /// # Errors
    ///
    /// Returns error if the strategy is invalid.
    pub fn build(self) -> Result<Strategy> {
        let strategy = Strategy {
            id: self.id,
            name: self.name,
            action: self.action,
            cpu: self.cpu,
            memory: self.memory,
            condition_logic: self.condition_logic,
            required_consecutive_days: self.required_consecutive_days,
            legacy_duration: self.legacy_duration,
            cooldown_minutes: self.cooldown_minutes,
            resource_types: self.resource_types,
            status: self.status,
        };

        strategy.validate()?;
        Ok(strategy)
    }
}

/// Links a strategy to a cluster it evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StrategyClusterAssociation {
    /// Strategy.
    pub strategy_id: StrategyId,
    /// Cluster.
    pub cluster_id: ClusterId,
}

/// Point-in-time capacity measurement for one cluster resource pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    /// Cluster measured.
    pub cluster_id: ClusterId,
    /// Resource pool measured.
    pub resource_type: ResourceType,
    /// Total CPU cores.
    pub cpu_capacity: f64,
    /// Requested CPU cores.
    pub cpu_request: f64,
    /// Total memory.
    pub memory_capacity: f64,
    /// Requested memory.
    pub memory_request: f64,
    /// Bare-metal node count.
    #[serde(default)]
    pub bare_metal_nodes: u32,
    /// Virtual-machine node count.
    #[serde(default)]
    pub virtual_machine_nodes: u32,
    /// Max CPU usage over the last 24h (0-100).
    #[serde(default)]
    pub max_cpu_usage_24h: f64,
    /// Max memory usage over the last 24h (0-100).
    #[serde(default)]
    pub max_memory_usage_24h: f64,
    /// When the collector produced this snapshot.
    pub created_at: DateTime<Utc>,
}

impl ResourceSnapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn new(cluster_id: ClusterId, resource_type: ResourceType, created_at: DateTime<Utc>) -> Self {
        Self {
            cluster_id,
            resource_type,
            cpu_capacity: 0.0,
            cpu_request: 0.0,
            memory_capacity: 0.0,
            memory_request: 0.0,
            bare_metal_nodes: 0,
            virtual_machine_nodes: 0,
            max_cpu_usage_24h: 0.0,
            max_memory_usage_24h: 0.0,
            created_at,
        }
    }

    /// Sets CPU capacity and request.
    #[must_use]
    pub const fn with_cpu(mut self, capacity: f64, request: f64) -> Self {
        self.cpu_capacity = capacity;
        self.cpu_request = request;
        self
    }

    /// Sets memory capacity and request.
    #[must_use]
    pub const fn with_memory(mut self, capacity: f64, request: f64) -> Self {
        self.memory_capacity = capacity;
        self.memory_request = request;
        self
    }

    /// Sets max 24h usage ratios.
    #[must_use]
    pub const fn with_usage(mut self, cpu: f64, memory: f64) -> Self {
        self.max_cpu_usage_24h = cpu;
        self.max_memory_usage_24h = memory;
        self
    }

    /// Sets node counts.
    #[must_use]
    pub const fn with_nodes(mut self, bare_metal: u32, virtual_machine: u32) -> Self {
        self.bare_metal_nodes = bare_metal;
        self.virtual_machine_nodes = virtual_machine;
        self
    }

    /// Calendar day (UTC) of this snapshot.
    #[must_use]
    pub fn day(&self) -> NaiveDate {
        self.created_at.date_naive()
    }

    /// Capacity of a metric.
    #[must_use]
    pub const fn capacity(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Cpu => self.cpu_capacity,
            Metric::Memory => self.memory_capacity,
        }
    }

    /// Request / capacity as a percentage, 0 when capacity is 0.
    #[must_use]
    pub fn allocation_ratio(&self, metric: Metric) -> f64 {
        let (request, capacity) = match metric {
            Metric::Cpu => (self.cpu_request, self.cpu_capacity),
            Metric::Memory => (self.memory_request, self.memory_capacity),
        };
        if capacity <= 0.0 {
            0.0
        } else {
            request / capacity * 100.0
        }
    }

    /// The ratio a threshold of the given type compares against.
    #[must_use]
    pub fn ratio(&self, metric: Metric, threshold_type: ThresholdType) -> f64 {
        match (threshold_type, metric) {
            (ThresholdType::Allocated, _) => self.allocation_ratio(metric),
            (ThresholdType::Usage, Metric::Cpu) => self.max_cpu_usage_24h,
            (ThresholdType::Usage, Metric::Memory) => self.max_memory_usage_24h,
        }
    }
}

/// A device that can be moved into or out of a cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateDevice {
    /// Unique identifier.
    pub id: DeviceId,
    /// Hostname, informational.
    #[serde(default)]
    pub hostname: String,
    /// Cluster this device currently serves; `None` when unassigned.
    #[serde(default)]
    pub cluster_id: Option<ClusterId>,
    /// CPU cores.
    pub cpu: f64,
    /// Memory.
    pub memory: f64,
    /// Free-form attributes the query filters can match on.
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl CandidateDevice {
    /// Creates a new unassigned device.
    #[must_use]
    pub fn new(id: u64, cpu: f64, memory: f64) -> Self {
        Self {
            id: DeviceId::new(id),
            hostname: String::new(),
            cluster_id: None,
            cpu,
            memory,
            attributes: HashMap::new(),
        }
    }

    /// Assigns the device to a cluster; 0 means unassigned.
    #[must_use]
    pub fn with_cluster(mut self, cluster_id: u64) -> Self {
        self.cluster_id = (cluster_id != 0).then_some(ClusterId::new(cluster_id));
        self
    }

    /// Sets the hostname.
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Whether the device serves no cluster.
    #[must_use]
    pub fn is_unassigned(&self) -> bool {
        self.cluster_id.is_none_or(|c| c.get() == 0)
    }

    /// Whether the device serves the given cluster.
    #[must_use]
    pub fn is_assigned_to(&self, cluster_id: ClusterId) -> bool {
        self.cluster_id == Some(cluster_id)
    }

    /// Capacity of a metric.
    #[must_use]
    pub const fn capacity(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Cpu => self.cpu,
            Metric::Memory => self.memory,
        }
    }
}
