//! Resource delta sizing.
//!
//! The delta is the capacity change that would bring the measured ratio back
//! to the threshold while holding demand constant:
//! `needed = capacity * measured / threshold`, `delta = needed - capacity`.
//! For allocation thresholds this is `request / (threshold / 100) - capacity`.

use serde::{Deserialize, Serialize};

use crate::types::{Metric, ResourceSnapshot, Strategy};

/// Capacity to add (positive) or remove (negative).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceDelta {
    /// CPU cores.
    pub cpu: f64,
    /// Memory.
    pub memory: f64,
}

impl ResourceDelta {
    /// Creates a delta.
    #[must_use]
    pub const fn new(cpu: f64, memory: f64) -> Self {
        Self { cpu, memory }
    }

    /// Computes the delta for the latest snapshot.
    ///
    /// A metric without a threshold, or one that does not breach on this
    /// snapshot, contributes 0.
    #[must_use]
    pub fn compute(snapshot: &ResourceSnapshot, strategy: &Strategy) -> Self {
        let metric_delta = |metric: Metric| {
            let Some(threshold) = strategy.threshold(metric) else {
                return 0.0;
            };
            if !(threshold.value > 0.0) {
                return 0.0;
            }
            let measured = snapshot.ratio(metric, threshold.threshold_type);
            if !strategy.action.is_breach(measured, threshold.value) {
                return 0.0;
            }
            let capacity = snapshot.capacity(metric);
            capacity * measured / threshold.value - capacity
        };

        Self {
            cpu: metric_delta(Metric::Cpu),
            memory: metric_delta(Metric::Memory),
        }
    }

    /// Whether no capacity change was computed.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.cpu.abs() < f64::EPSILON && self.memory.abs() < f64::EPSILON
    }

    /// Absolute demand for a metric.
    #[must_use]
    pub fn demand(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Cpu => self.cpu.abs(),
            Metric::Memory => self.memory.abs(),
        }
    }
}

impl std::fmt::Display for ResourceDelta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cpu {:+.2}, memory {:+.2}", self.cpu, self.memory)
    }
}
