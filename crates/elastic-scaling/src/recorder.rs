//! Order creation and execution history recording.
//!
//! The order is always written before its history row. A history insert that
//! fails is logged and reported but never rolls back the order.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::order::{order_name, order_number, ExecutionResult, HistoryEntry, NewOrder, OrderRecord};
use crate::store::{HistoryStore, OrderStore};
use crate::types::{ClusterId, DeviceId, HistoryId, ResourceType, StrategyId, ThresholdAction};

/// Everything needed to create a scaling order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    /// Strategy that triggered.
    pub strategy_id: StrategyId,
    /// Target cluster.
    pub cluster_id: ClusterId,
    /// Resource pool.
    pub resource_type: ResourceType,
    /// Scale out or scale in.
    pub action: ThresholdAction,
    /// Selected devices.
    pub device_ids: Vec<DeviceId>,
    /// Candidates the search returned before selection.
    pub candidates_found: usize,
    /// Measured values text.
    pub triggered_value: String,
    /// Threshold condition text.
    pub threshold_value: String,
    /// Evaluation time.
    pub at: DateTime<Utc>,
}

/// What happened when an order was requested.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderOutcome {
    /// The order, unless persisting it failed.
    pub order: Option<OrderRecord>,
    /// Result recorded in history.
    pub result: ExecutionResult,
    /// Reason recorded in history.
    pub reason: String,
    /// History row id, unless the insert failed.
    pub history_id: Option<HistoryId>,
}

/// Writes orders and history rows.
pub struct ExecutionRecorder<S: OrderStore + HistoryStore + ?Sized> {
    store: Arc<S>,
    creator: String,
    number_prefix: String,
}

impl<S: OrderStore + HistoryStore + ?Sized> ExecutionRecorder<S> {
    /// Creates a recorder.
    #[must_use]
    pub fn new(store: Arc<S>, creator: impl Into<String>, number_prefix: impl Into<String>) -> Self {
        Self {
            store,
            creator: creator.into(),
            number_prefix: number_prefix.into(),
        }
    }

    /// Appends a history row.
    ///
    /// # Errors
    ///
    /// Returns the store error after logging it.
    pub fn record(&self, entry: HistoryEntry) -> Result<HistoryId> {
        let strategy_id = entry.strategy_id;
        let cluster_id = entry.cluster_id;
        let result = entry.result;

        self.store.append_history(entry).inspect_err(|e| {
            tracing::warn!(
                strategy = %strategy_id,
                cluster = %cluster_id,
                result = %result,
                error = %e,
                "failed to record execution history"
            );
        })
    }

    /// Creates the order and records its outcome.
    ///
    /// An empty device list still creates a reminder order.
    pub fn create_order(&self, request: OrderRequest) -> OrderOutcome {
        let device_count = request.device_ids.len();
        let new_order = NewOrder {
            number: order_number(&self.number_prefix, request.at),
            name: order_name(request.action, request.cluster_id, &request.resource_type, device_count),
            description: describe(&request),
            creator: self.creator.clone(),
            created_at: request.at,
            strategy_id: request.strategy_id,
            cluster_id: request.cluster_id,
            action: request.action,
            resource_type: request.resource_type.clone(),
            device_ids: request.device_ids.clone(),
            triggered_value: request.triggered_value.clone(),
            threshold_value: request.threshold_value.clone(),
        };

        let (order, result, reason) = match self.store.create_order(new_order) {
            Ok(record) => {
                let (result, reason) = if device_count > 0 {
                    (
                        ExecutionResult::OrderCreated,
                        format!(
                            "selected {device_count} device(s) from {} candidate(s)",
                            request.candidates_found
                        ),
                    )
                } else if request.candidates_found == 0 {
                    (
                        ExecutionResult::OrderCreatedNoDevices,
                        "no candidate devices matched; reminder order created".to_string(),
                    )
                } else {
                    (
                        ExecutionResult::OrderCreatedNoDevices,
                        format!(
                            "{} candidate(s) found but none suitable; reminder order created",
                            request.candidates_found
                        ),
                    )
                };
                tracing::info!(
                    order = %record.order.id,
                    number = %record.order.number,
                    strategy = %request.strategy_id,
                    cluster = %request.cluster_id,
                    resource_type = %request.resource_type,
                    devices = device_count,
                    "scaling order created"
                );
                (Some(record), result, reason)
            }
            Err(e) => {
                tracing::error!(
                    strategy = %request.strategy_id,
                    cluster = %request.cluster_id,
                    resource_type = %request.resource_type,
                    error = %e,
                    "failed to create scaling order"
                );
                (None, ExecutionResult::FailureOrderCreationFailed, e.to_string())
            }
        };

        let entry = HistoryEntry::new(
            request.strategy_id,
            request.cluster_id,
            request.resource_type,
            result,
            request.at,
        )
        .with_values(request.triggered_value, request.threshold_value)
        .with_reason(reason.clone())
        .with_order(order.as_ref().map(|r| r.order.id));

        let history_id = self.record(entry).ok();

        OrderOutcome {
            order,
            result,
            reason,
            history_id,
        }
    }
}

fn describe(request: &OrderRequest) -> String {
    format!(
        "{} for cluster {} ({}): measured {}; condition {}",
        request.action.label(),
        request.cluster_id,
        request.resource_type,
        request.triggered_value,
        request.threshold_value
    )
}
