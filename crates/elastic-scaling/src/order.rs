//! Orders and the execution history audit trail.
//!
//! Orders are created here in [`OrderStatus::Pending`] and never mutated
//! afterwards; lifecycle transitions belong to whoever processes them.
//! History rows are append-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ClusterId, DeviceId, HistoryId, OrderId, ResourceType, StrategyId, ThresholdAction};

/// Lifecycle status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Created, waiting to be processed.
    #[default]
    Pending,
    /// Devices are being moved.
    Processing,
    /// Finished successfully.
    Completed,
    /// Finished unsuccessfully.
    Failed,
    /// Withdrawn before completion.
    Cancelled,
    /// Devices are being returned.
    Returning,
}

impl OrderStatus {
    /// Stable identifier used in storage and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Returning => "returning",
        }
    }

    /// Whether an order in this status still holds its cooldown window.
    #[must_use]
    pub const fn counts_for_cooldown(self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Unique identifier.
    pub id: OrderId,
    /// Human-facing order number.
    pub number: String,
    /// Short name.
    pub name: String,
    /// Longer description.
    pub description: String,
    /// Current status.
    pub status: OrderStatus,
    /// Who created the order.
    pub creator: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Scaling-specific detail attached to an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingOrderDetail {
    /// Owning order.
    pub order_id: OrderId,
    /// Strategy that triggered the order.
    pub strategy_id: StrategyId,
    /// Target cluster.
    pub cluster_id: ClusterId,
    /// Scale out or scale in.
    pub action: ThresholdAction,
    /// Resource pool the order applies to.
    pub resource_type: ResourceType,
    /// Number of devices to move.
    pub device_count: usize,
    /// Devices to move.
    pub device_ids: Vec<DeviceId>,
    /// Measured values that triggered the order.
    pub triggered_value: String,
    /// Threshold condition that was breached.
    pub threshold_value: String,
}

/// An order header together with its scaling detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    /// Header.
    pub order: Order,
    /// Scaling detail.
    pub detail: ScalingOrderDetail,
}

impl OrderRecord {
    /// Whether this order belongs to the given (strategy, cluster, resource type).
    #[must_use]
    pub fn is_for(&self, strategy_id: StrategyId, cluster_id: ClusterId, resource_type: &ResourceType) -> bool {
        self.detail.strategy_id == strategy_id
            && self.detail.cluster_id == cluster_id
            && &self.detail.resource_type == resource_type
    }
}

/// An order to be persisted; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    /// Human-facing order number.
    pub number: String,
    /// Short name.
    pub name: String,
    /// Longer description.
    pub description: String,
    /// Who created the order.
    pub creator: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Strategy that triggered the order.
    pub strategy_id: StrategyId,
    /// Target cluster.
    pub cluster_id: ClusterId,
    /// Scale out or scale in.
    pub action: ThresholdAction,
    /// Resource pool.
    pub resource_type: ResourceType,
    /// Devices to move.
    pub device_ids: Vec<DeviceId>,
    /// Measured values that triggered the order.
    pub triggered_value: String,
    /// Threshold condition that was breached.
    pub threshold_value: String,
}

impl NewOrder {
    /// Materialises the order with the id assigned by the store.
    #[must_use]
    pub fn into_record(self, id: OrderId) -> OrderRecord {
        OrderRecord {
            order: Order {
                id,
                number: self.number,
                name: self.name,
                description: self.description,
                status: OrderStatus::Pending,
                creator: self.creator,
                created_at: self.created_at,
            },
            detail: ScalingOrderDetail {
                order_id: id,
                strategy_id: self.strategy_id,
                cluster_id: self.cluster_id,
                action: self.action,
                resource_type: self.resource_type,
                device_count: self.device_ids.len(),
                device_ids: self.device_ids,
                triggered_value: self.triggered_value,
                threshold_value: self.threshold_value,
            },
        }
    }
}

/// Generates an order number: prefix, UTC timestamp, four random hex digits.
#[must_use]
pub fn order_number(prefix: &str, at: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{prefix}{}{}", at.format("%Y%m%d%H%M%S"), &suffix[..4])
}

/// Short order name, e.g. `Pool entry 7 total: 2 device(s)`.
#[must_use]
pub fn order_name(
    action: ThresholdAction,
    cluster_id: ClusterId,
    resource_type: &ResourceType,
    device_count: usize,
) -> String {
    format!(
        "{} {cluster_id} {resource_type}: {device_count} device(s)",
        action.label()
    )
}

/// Outcome recorded for one (strategy, cluster, resource type) evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionResult {
    /// An order was created with devices.
    OrderCreated,
    /// An order was created as a reminder without devices.
    OrderCreatedNoDevices,
    /// A recent order is still inside the cooldown window.
    SkippedCooldown,
    /// The threshold was not breached long enough.
    FailureThresholdNotMet,
    /// Not enough daily snapshots to cover the required days.
    FailureNoSnapshotsForDuration,
    /// The strategy configuration could not be interpreted.
    FailureInvalidStrategy,
    /// No usable matching policy or template id.
    FailureInvalidQueryTemplateId,
    /// The matching policy references a missing template.
    FailureQueryTemplateNotFound,
    /// The template body could not be parsed.
    FailureQueryTemplateUnmarshalError,
    /// The device search failed.
    FailureDeviceQueryError,
    /// A persistence read failed.
    FailureDbError,
    /// The order could not be persisted.
    FailureOrderCreationFailed,
}

impl ExecutionResult {
    /// Stable identifier used in storage and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OrderCreated => "order_created",
            Self::OrderCreatedNoDevices => "order_created_no_devices",
            Self::SkippedCooldown => "skipped_cooldown",
            Self::FailureThresholdNotMet => "failure_threshold_not_met",
            Self::FailureNoSnapshotsForDuration => "failure_no_snapshots_for_duration",
            Self::FailureInvalidStrategy => "failure_invalid_strategy",
            Self::FailureInvalidQueryTemplateId => "failure_invalid_query_template_id",
            Self::FailureQueryTemplateNotFound => "failure_query_template_not_found",
            Self::FailureQueryTemplateUnmarshalError => "failure_query_template_unmarshal_error",
            Self::FailureDeviceQueryError => "failure_device_query_error",
            Self::FailureDbError => "failure_db_error",
            Self::FailureOrderCreationFailed => "failure_order_creation_failed",
        }
    }

    /// Whether an order was created.
    #[must_use]
    pub const fn is_order(self) -> bool {
        matches!(self, Self::OrderCreated | Self::OrderCreatedNoDevices)
    }

    /// Whether this result is one of the failure classes.
    ///
    /// A threshold that was not met is a normal negative decision, not a failure.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        !matches!(
            self,
            Self::OrderCreated
                | Self::OrderCreatedNoDevices
                | Self::SkippedCooldown
                | Self::FailureThresholdNotMet
        )
    }
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A history row to be appended; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Strategy evaluated.
    pub strategy_id: StrategyId,
    /// Cluster evaluated.
    pub cluster_id: ClusterId,
    /// Resource pool evaluated.
    pub resource_type: ResourceType,
    /// When the evaluation ran.
    pub execution_time: DateTime<Utc>,
    /// Measured values, human readable.
    #[serde(default)]
    pub triggered_value: String,
    /// Threshold condition, human readable.
    #[serde(default)]
    pub threshold_value: String,
    /// Outcome.
    pub result: ExecutionResult,
    /// Order created, if any.
    #[serde(default)]
    pub order_id: Option<OrderId>,
    /// Free-text explanation.
    #[serde(default)]
    pub reason: String,
}

impl HistoryEntry {
    /// Creates an entry with empty value texts and no order.
    #[must_use]
    pub fn new(
        strategy_id: StrategyId,
        cluster_id: ClusterId,
        resource_type: ResourceType,
        result: ExecutionResult,
        execution_time: DateTime<Utc>,
    ) -> Self {
        Self {
            strategy_id,
            cluster_id,
            resource_type,
            execution_time,
            triggered_value: String::new(),
            threshold_value: String::new(),
            result,
            order_id: None,
            reason: String::new(),
        }
    }

    /// Sets the measured and threshold texts.
    #[must_use]
    pub fn with_values(mut self, triggered: impl Into<String>, threshold: impl Into<String>) -> Self {
        self.triggered_value = triggered.into();
        self.threshold_value = threshold.into();
        self
    }

    /// Sets the reason text.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Links the created order.
    #[must_use]
    pub const fn with_order(mut self, order_id: Option<OrderId>) -> Self {
        self.order_id = order_id;
        self
    }
}

/// A persisted history row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionHistory {
    /// Unique identifier.
    pub id: HistoryId,
    /// Row contents.
    #[serde(flatten)]
    pub entry: HistoryEntry,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_order(devices: &[u64]) -> NewOrder {
        NewOrder {
            number: "ES20240301100000abcd".into(),
            name: "Pool entry 7 total: 2 device(s)".into(),
            description: String::new(),
            creator: "system".into(),
            created_at: Utc::now(),
            strategy_id: StrategyId::new(1),
            cluster_id: ClusterId::new(7),
            action: ThresholdAction::PoolEntry,
            resource_type: ResourceType::total(),
            device_ids: devices.iter().copied().map(DeviceId::new).collect(),
            triggered_value: "CPU allocation 90.00%".into(),
            threshold_value: "CPU allocation > 80.00%".into(),
        }
    }

    mod status_tests {
        use super::*;

        #[test]
        fn only_cancelled_is_excluded_from_cooldown() {
            assert!(OrderStatus::Pending.counts_for_cooldown());
            assert!(OrderStatus::Completed.counts_for_cooldown());
            assert!(OrderStatus::Failed.counts_for_cooldown());
            assert!(!OrderStatus::Cancelled.counts_for_cooldown());
        }

        #[test]
        fn status_serializes_snake_case() {
            let json = serde_json::to_string(&OrderStatus::Returning).unwrap();
            assert_eq!(json, "\"returning\"");
        }
    }

    mod order_tests {
        use super::*;

        #[test]
        fn into_record_is_pending_with_device_count() {
            let record = new_order(&[2, 1]).into_record(OrderId::new(10));
            assert_eq!(record.order.status, OrderStatus::Pending);
            assert_eq!(record.order.id, OrderId::new(10));
            assert_eq!(record.detail.order_id, OrderId::new(10));
            assert_eq!(record.detail.device_count, 2);
            assert!(record.is_for(StrategyId::new(1), ClusterId::new(7), &ResourceType::total()));
            assert!(!record.is_for(StrategyId::new(1), ClusterId::new(7), &ResourceType::new("gpu")));
        }

        #[test]
        fn order_number_format() {
            let at = DateTime::parse_from_rfc3339("2024-03-01T10:20:30Z")
                .unwrap()
                .with_timezone(&Utc);
            let number = order_number("ES", at);
            assert!(number.starts_with("ES20240301102030"));
            assert_eq!(number.len(), "ES".len() + 14 + 4);
            assert!(number[16..].chars().all(|c| c.is_ascii_hexdigit()));
        }

        #[test]
        fn order_name_format() {
            let name = order_name(
                ThresholdAction::PoolExit,
                ClusterId::new(3),
                &ResourceType::new("arm_common"),
                0,
            );
            assert_eq!(name, "Pool exit 3 arm_common: 0 device(s)");
        }
    }

    mod result_tests {
        use super::*;

        #[test]
        fn result_strings_match_serde() {
            let all = [
                ExecutionResult::OrderCreated,
                ExecutionResult::OrderCreatedNoDevices,
                ExecutionResult::SkippedCooldown,
                ExecutionResult::FailureThresholdNotMet,
                ExecutionResult::FailureNoSnapshotsForDuration,
                ExecutionResult::FailureInvalidStrategy,
                ExecutionResult::FailureInvalidQueryTemplateId,
                ExecutionResult::FailureQueryTemplateNotFound,
                ExecutionResult::FailureQueryTemplateUnmarshalError,
                ExecutionResult::FailureDeviceQueryError,
                ExecutionResult::FailureDbError,
                ExecutionResult::FailureOrderCreationFailed,
            ];
            for result in all {
                let json = serde_json::to_string(&result).unwrap();
                assert_eq!(json, format!("\"{}\"", result.as_str()));
            }
        }

        #[test]
        fn failure_classification() {
            assert!(ExecutionResult::OrderCreatedNoDevices.is_order());
            assert!(!ExecutionResult::SkippedCooldown.is_failure());
            assert!(!ExecutionResult::FailureThresholdNotMet.is_failure());
            assert!(ExecutionResult::FailureDbError.is_failure());
        }

        #[test]
        fn history_flattens_entry() {
            let entry = HistoryEntry::new(
                StrategyId::new(1),
                ClusterId::new(2),
                ResourceType::total(),
                ExecutionResult::SkippedCooldown,
                Utc::now(),
            )
            .with_reason("cooldown");
            let history = ExecutionHistory {
                id: HistoryId::new(5),
                entry,
            };
            let json: serde_json::Value = serde_json::to_value(&history).unwrap();
            assert_eq!(json["id"], 5);
            assert_eq!(json["result"], "skipped_cooldown");
            assert_eq!(json["reason"], "cooldown");

            let parsed: ExecutionHistory = serde_json::from_value(json).unwrap();
            assert_eq!(parsed, history);
        }
    }
}
