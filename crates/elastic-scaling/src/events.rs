//! Typed scaling events and publishers.
//!
//! Order creation is announced through an [`EventPublisher`]. The default
//! [`TracingEventPublisher`] emits the on-duty notification intent as a
//! structured log line; [`EventBus`] dispatches to in-process subscribers
//! registered per event type.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::order::ExecutionResult;
use crate::types::{ClusterId, OrderId, ResourceType, StrategyId, ThresholdAction};

/// Something the engine decided or did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScalingEvent {
    /// A scaling order was created.
    OrderCreated {
        /// Order id.
        order_id: OrderId,
        /// Order number.
        order_number: String,
        /// Triggering strategy.
        strategy_id: StrategyId,
        /// Target cluster.
        cluster_id: ClusterId,
        /// Resource pool.
        resource_type: ResourceType,
        /// Scale out or scale in.
        action: ThresholdAction,
        /// Devices in the order.
        device_count: usize,
    },
    /// A history row was recorded for an association.
    DecisionRecorded {
        /// Strategy evaluated.
        strategy_id: StrategyId,
        /// Cluster evaluated.
        cluster_id: ClusterId,
        /// Resource pool evaluated.
        resource_type: ResourceType,
        /// Outcome.
        result: ExecutionResult,
        /// Order created, if any.
        order_id: Option<OrderId>,
    },
}

impl ScalingEvent {
    /// Event type string subscribers register for.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::OrderCreated { .. } => ORDER_CREATED,
            Self::DecisionRecorded { .. } => DECISION_RECORDED,
        }
    }
}

/// Event type of [`ScalingEvent::OrderCreated`].
pub const ORDER_CREATED: &str = "scaling.order_created";

/// Event type of [`ScalingEvent::DecisionRecorded`].
pub const DECISION_RECORDED: &str = "scaling.decision_recorded";

/// Receives scaling events.
pub trait EventPublisher: Send + Sync {
    /// Publishes an event.
    fn publish(&self, event: &ScalingEvent);
}

/// Publishes events as `tracing` records under `elastic_scaling::events`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventPublisher;

impl TracingEventPublisher {
    /// Creates a new tracing publisher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl EventPublisher for TracingEventPublisher {
    fn publish(&self, event: &ScalingEvent) {
        match event {
            ScalingEvent::OrderCreated {
                order_id,
                order_number,
                strategy_id,
                cluster_id,
                resource_type,
                action,
                device_count,
            } => {
                tracing::info!(
                    target: "elastic_scaling::events",
                    event_type = event.event_type(),
                    order = %order_id,
                    number = %order_number,
                    strategy = %strategy_id,
                    cluster = %cluster_id,
                    resource_type = %resource_type,
                    action = %action,
                    devices = device_count,
                    "notify on-duty staff: scaling order pending"
                );
            }
            ScalingEvent::DecisionRecorded {
                strategy_id,
                cluster_id,
                resource_type,
                result,
                order_id,
            } => {
                tracing::debug!(
                    target: "elastic_scaling::events",
                    event_type = event.event_type(),
                    strategy = %strategy_id,
                    cluster = %cluster_id,
                    resource_type = %resource_type,
                    result = %result,
                    order = ?order_id,
                    "scaling decision recorded"
                );
            }
        }
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventPublisher;

impl NoopEventPublisher {
    /// Creates a new no-op publisher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl EventPublisher for NoopEventPublisher {
    fn publish(&self, _event: &ScalingEvent) {}
}

/// A boxed publisher for dynamic dispatch.
pub type BoxedEventPublisher = Box<dyn EventPublisher>;

impl EventPublisher for BoxedEventPublisher {
    fn publish(&self, event: &ScalingEvent) {
        (**self).publish(event);
    }
}

type Subscriber = Arc<dyn Fn(&ScalingEvent) + Send + Sync>;

/// In-process publish/subscribe keyed by event type.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<&'static str, Vec<Subscriber>>>,
}

impl EventBus {
    /// Creates a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for one event type.
    pub fn subscribe<F>(&self, event_type: &'static str, handler: F)
    where
        F: Fn(&ScalingEvent) + Send + Sync + 'static,
    {
        self.subscribers
            .write()
            .entry(event_type)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Number of handlers registered for an event type.
    #[must_use]
    pub fn subscriber_count(&self, event_type: &str) -> usize {
        self.subscribers.read().get(event_type).map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let subscribers = self.subscribers.read();
        let counts: HashMap<&str, usize> = subscribers.iter().map(|(k, v)| (*k, v.len())).collect();
        f.debug_struct("EventBus").field("subscribers", &counts).finish()
    }
}

impl EventPublisher for EventBus {
    fn publish(&self, event: &ScalingEvent) {
        // Handlers run outside the lock so they may subscribe.
        let handlers: Vec<Subscriber> = self
            .subscribers
            .read()
            .get(event.event_type())
            .cloned()
            .unwrap_or_default();
        for handler in handlers {
            handler(event);
        }
    }
}

/// Forwards every event to several publishers in order.
#[derive(Default)]
pub struct FanoutPublisher {
    publishers: Vec<Arc<dyn EventPublisher>>,
}

impl FanoutPublisher {
    /// Creates an empty fanout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a downstream publisher.
    #[must_use]
    pub fn with(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publishers.push(publisher);
        self
    }
}

impl EventPublisher for FanoutPublisher {
    fn publish(&self, event: &ScalingEvent) {
        for publisher in &self.publishers {
            publisher.publish(event);
        }
    }
}
