//! Consecutive-day threshold evaluation.
//!
//! Each daily snapshot either breaches the strategy or not. The strategy as a
//! whole breaches only when the run of breaching days ending at the most
//! recent snapshot is at least the required length; a streak that was broken
//! before the end of the window does not count.

use serde::{Deserialize, Serialize};

use crate::types::{Metric, MetricThreshold, ResourceSnapshot, Strategy};

/// Result of evaluating a snapshot window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Whether the trailing run meets the requirement.
    pub breached: bool,
    /// Length of the run ending at the latest snapshot.
    pub consecutive_days: u32,
    /// Longest run anywhere in the window.
    pub longest_run: u32,
    /// Required run length.
    pub required_days: u32,
    /// Number of daily snapshots evaluated.
    pub days_evaluated: usize,
    /// Measured values of the last breaching day (or the latest day).
    pub triggered_value: String,
    /// The threshold condition.
    pub threshold_value: String,
}

/// Evaluates ascending daily snapshots against a strategy.
///
/// A calendar gap between two snapshots resets the run.
#[must_use]
pub fn evaluate(snapshots: &[ResourceSnapshot], strategy: &Strategy, required_days: u32) -> Evaluation {
    let mut run: u32 = 0;
    let mut longest: u32 = 0;
    let mut last_breach: Option<&ResourceSnapshot> = None;
    let mut previous: Option<&ResourceSnapshot> = None;

    for snapshot in snapshots {
        if let Some(prev) = previous {
            if prev.day().succ_opt() != Some(snapshot.day()) {
                run = 0;
            }
        }
        if breaches(snapshot, strategy) {
            run += 1;
            longest = longest.max(run);
            last_breach = Some(snapshot);
        } else {
            run = 0;
        }
        previous = Some(snapshot);
    }

    let triggered_value = last_breach
        .or_else(|| snapshots.last())
        .map(|s| measured_text(s, strategy))
        .unwrap_or_default();

    Evaluation {
        breached: run > 0 && run >= required_days,
        consecutive_days: run,
        longest_run: longest,
        required_days,
        days_evaluated: snapshots.len(),
        triggered_value,
        threshold_value: threshold_text(strategy),
    }
}

/// Whether a single day breaches the strategy.
///
/// A strategy with no configured metric never breaches.
#[must_use]
pub fn breaches(snapshot: &ResourceSnapshot, strategy: &Strategy) -> bool {
    let check = |metric: Metric| {
        strategy.threshold(metric).map(|t| {
            strategy
                .action
                .is_breach(snapshot.ratio(metric, t.threshold_type), t.value)
        })
    };

    match (check(Metric::Cpu), check(Metric::Memory)) {
        (Some(cpu), Some(memory)) => strategy.condition_logic.combine(cpu, memory),
        (Some(only), None) | (None, Some(only)) => only,
        (None, None) => false,
    }
}

fn configured(strategy: &Strategy) -> impl Iterator<Item = (Metric, &MetricThreshold)> {
    [Metric::Cpu, Metric::Memory]
        .into_iter()
        .filter_map(|m| strategy.threshold(m).map(|t| (m, t)))
}

/// Human-readable measured values, e.g. `CPU allocation 92.00%`.
#[must_use]
pub fn measured_text(snapshot: &ResourceSnapshot, strategy: &Strategy) -> String {
    configured(strategy)
        .map(|(metric, t)| {
            format!(
                "{} {} {:.2}%",
                metric.label(),
                t.threshold_type.label(),
                snapshot.ratio(metric, t.threshold_type)
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Human-readable condition, e.g. `CPU allocation > 80.00% AND Memory usage > 70.00%`.
#[must_use]
pub fn threshold_text(strategy: &Strategy) -> String {
    let separator = format!(" {} ", strategy.condition_logic.keyword());
    configured(strategy)
        .map(|(metric, t)| {
            format!(
                "{} {} {} {:.2}%",
                metric.label(),
                t.threshold_type.label(),
                strategy.action.symbol(),
                t.value
            )
        })
        .collect::<Vec<_>>()
        .join(&separator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClusterId, ConditionLogic, ResourceType, ThresholdType};
    use chrono::{DateTime, Duration, Utc};
    use proptest::prelude::*;
    use crate::types::Strategy;

    fn base() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn daily(ratios: &[f64]) -> Vec<ResourceSnapshot> {
        ratios
            .iter()
            .enumerate()
            .map(|(i, ratio)| {
                ResourceSnapshot::new(ClusterId::new(1), ResourceType::total(), base() + Duration::days(i as i64))
                    .with_cpu(100.0, *ratio)
                    .with_memory(100.0, 50.0)
            })
            .collect()
    }

    fn cpu_entry(threshold: f64, days: u32) -> Strategy {
        Strategy::builder(1, "cpu-entry")
            .pool_entry()
            .cpu_threshold(threshold, ThresholdType::Allocated)
            .required_days(days)
            .build()
            .unwrap()
    }

    mod scenario_tests {
        use super::*;

        #[test]
        fn broken_streak_does_not_breach() {
            let strategy = cpu_entry(80.0, 3);
            let result = evaluate(&daily(&[85.0, 90.0, 60.0, 88.0, 92.0]), &strategy, 3);

            assert!(!result.breached);
            assert_eq!(result.consecutive_days, 2);
            assert_eq!(result.longest_run, 2);
            assert_eq!(result.days_evaluated, 5);
            assert_eq!(result.triggered_value, "CPU allocation 92.00%");
            assert_eq!(result.threshold_value, "CPU allocation > 80.00%");
        }

        #[test]
        fn trailing_run_meets_requirement() {
            let strategy = cpu_entry(80.0, 3);
            let result = evaluate(&daily(&[60.0, 85.0, 90.0, 95.0]), &strategy, 3);
            assert!(result.breached);
            assert_eq!(result.consecutive_days, 3);
        }

        #[test]
        fn earlier_long_streak_does_not_carry_over() {
            let strategy = cpu_entry(80.0, 2);
            let result = evaluate(&daily(&[90.0, 91.0, 92.0, 50.0]), &strategy, 2);
            assert!(!result.breached);
            assert_eq!(result.consecutive_days, 0);
            assert_eq!(result.longest_run, 3);
            assert_eq!(result.triggered_value, "CPU allocation 92.00%");
        }

        #[test]
        fn calendar_gap_resets_run() {
            let strategy = cpu_entry(80.0, 3);
            let mut snapshots = daily(&[90.0, 90.0, 90.0]);
            snapshots[2].created_at += Duration::days(1);
            let result = evaluate(&snapshots, &strategy, 3);
            assert!(!result.breached);
            assert_eq!(result.consecutive_days, 1);
        }

        #[test]
        fn empty_window_never_breaches() {
            let result = evaluate(&[], &cpu_entry(80.0, 1), 1);
            assert!(!result.breached);
            assert_eq!(result.consecutive_days, 0);
            assert!(result.triggered_value.is_empty());
        }

        #[test]
        fn pool_exit_breaches_below() {
            let strategy = Strategy::builder(2, "cpu-exit")
                .pool_exit()
                .cpu_threshold(30.0, ThresholdType::Allocated)
                .required_days(2)
                .build()
                .unwrap();
            let result = evaluate(&daily(&[10.0, 20.0]), &strategy, 2);
            assert!(result.breached);
            assert_eq!(result.threshold_value, "CPU allocation < 30.00%");
        }
    }

    mod logic_tests {
        use super::*;

        fn both(logic: ConditionLogic) -> Strategy {
            Strategy::builder(3, "both")
                .cpu_threshold(80.0, ThresholdType::Allocated)
                .memory_threshold(70.0, ThresholdType::Usage)
                .condition_logic(logic)
                .required_days(1)
                .build()
                .unwrap()
        }

        fn day(cpu_request: f64, memory_usage: f64) -> ResourceSnapshot {
            ResourceSnapshot::new(ClusterId::new(1), ResourceType::total(), base())
                .with_cpu(100.0, cpu_request)
                .with_memory(100.0, 10.0)
                .with_usage(0.0, memory_usage)
        }

        #[test]
        fn and_requires_both() {
            let strategy = both(ConditionLogic::And);
            assert!(breaches(&day(90.0, 75.0), &strategy));
            assert!(!breaches(&day(90.0, 65.0), &strategy));
        }

        #[test]
        fn or_requires_either() {
            let strategy = both(ConditionLogic::Or);
            assert!(breaches(&day(90.0, 65.0), &strategy));
            assert!(breaches(&day(50.0, 75.0), &strategy));
            assert!(!breaches(&day(50.0, 65.0), &strategy));
        }

        #[test]
        fn no_metric_never_breaches() {
            let mut strategy = cpu_entry(80.0, 1);
            strategy.cpu = None;
            assert!(!breaches(&day(100.0, 100.0), &strategy));
        }

        #[test]
        fn texts_include_both_metrics() {
            let strategy = both(ConditionLogic::Or);
            assert_eq!(
                threshold_text(&strategy),
                "CPU allocation > 80.00% OR Memory usage > 70.00%"
            );
            assert_eq!(
                measured_text(&day(90.0, 65.5), &strategy),
                "CPU allocation 90.00%, Memory usage 65.50%"
            );
        }
    }

    mod property_tests {
        use super::*;

        proptest! {
            #[test]
            fn trailing_breach_window_triggers(
                prefix in prop::collection::vec(0.0f64..100.0, 0..10),
                required in 1u32..6,
                extra in 0usize..3,
            ) {
                let strategy = cpu_entry(80.0, required);
                let mut ratios = prefix;
                ratios.extend(std::iter::repeat_n(95.0, required as usize + extra));
                let result = evaluate(&daily(&ratios), &strategy, required);
                prop_assert!(result.breached);
                prop_assert!(result.consecutive_days >= required);
            }

            #[test]
            fn non_breaching_last_day_never_triggers(
                prefix in prop::collection::vec(0.0f64..100.0, 0..15),
                last in 0.0f64..=80.0,
                required in 1u32..6,
            ) {
                let strategy = cpu_entry(80.0, required);
                let mut ratios = prefix;
                ratios.push(last);
                let result = evaluate(&daily(&ratios), &strategy, required);
                prop_assert!(!result.breached);
                prop_assert_eq!(result.consecutive_days, 0);
            }

            #[test]
            fn evaluation_is_idempotent(
                ratios in prop::collection::vec(0.0f64..100.0, 0..15),
                required in 1u32..6,
            ) {
                let strategy = cpu_entry(75.0, required);
                let snapshots = daily(&ratios);
                prop_assert_eq!(
                    evaluate(&snapshots, &strategy, required),
                    evaluate(&snapshots, &strategy, required)
                );
            }

            #[test]
            fn trailing_run_never_exceeds_longest(
                ratios in prop::collection::vec(0.0f64..100.0, 0..20),
            ) {
                let result = evaluate(&daily(&ratios), &cpu_entry(50.0, 1), 1);
                prop_assert!(result.consecutive_days <= result.longest_run);
                prop_assert!(result.longest_run as usize <= ratios.len());
            }
        }
    }
}
