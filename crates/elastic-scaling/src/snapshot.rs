//! Daily snapshot windows.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};

use crate::error::{Result, ScalingError};
use crate::store::SnapshotStore;
use crate::types::{ClusterId, ResourceSnapshot, ResourceType};

/// Reads one authoritative snapshot per calendar day.
pub struct SnapshotAccessor<S: SnapshotStore + ?Sized> {
    store: Arc<S>,
}

impl<S: SnapshotStore + ?Sized> SnapshotAccessor<S> {
    /// Creates an accessor over a snapshot store.
    #[must_use]
    pub const fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Latest snapshot of each UTC day in the `days`-day window ending at `now`.
    ///
    /// The window ends today when today already has a snapshot, and
    /// yesterday otherwise, so a tick that runs before the day's first
    /// collection still sees the previous complete days.
    ///
    /// # Errors
    ///
    /// Returns [`ScalingError::InsufficientSnapshots`] if fewer than `days`
    /// distinct days were collected, or the store error if the read fails.
    pub fn daily_snapshots(
        &self,
        cluster_id: ClusterId,
        resource_type: &ResourceType,
        days: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<ResourceSnapshot>> {
        let from = window_start(now, days.saturating_add(1));
        let raw = self.store.snapshots_between(cluster_id, resource_type, from, now)?;
        let mut daily = collapse_daily(raw);

        let last_day = window_end_day(&daily, now);
        let first_day = last_day - Duration::days(i64::from(days.saturating_sub(1)));
        daily.retain(|s| s.day() >= first_day && s.day() <= last_day);

        tracing::debug!(
            cluster = %cluster_id,
            resource_type = %resource_type,
            days,
            window_end = %last_day,
            found = daily.len(),
            "loaded daily snapshots"
        );

        if daily.len() < days as usize {
            return Err(ScalingError::InsufficientSnapshots {
                cluster_id: cluster_id.to_string(),
                resource_type: resource_type.to_string(),
                found: daily.len(),
                required: days,
            });
        }
        Ok(daily)
    }
}

/// Last day of the window: today if collected, otherwise yesterday.
fn window_end_day(daily: &[ResourceSnapshot], now: DateTime<Utc>) -> NaiveDate {
    let today = now.date_naive();
    if daily.last().is_some_and(|s| s.day() == today) {
        today
    } else {
        today - Duration::days(1)
    }
}

/// Midnight (UTC) of the first day of a `days`-day window ending at `now`.
#[must_use]
pub fn window_start(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    let first_day = now - Duration::days(i64::from(days.saturating_sub(1)));
    first_day.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// Keeps the latest snapshot of each calendar day, ascending by day.
#[must_use]
pub fn collapse_daily(mut snapshots: Vec<ResourceSnapshot>) -> Vec<ResourceSnapshot> {
    snapshots.sort_by_key(|s| s.created_at);
    let mut daily: Vec<ResourceSnapshot> = Vec::with_capacity(snapshots.len());
    for snapshot in snapshots {
        match daily.last_mut() {
            Some(last) if last.day() == snapshot.day() => *last = snapshot,
            _ => daily.push(snapshot),
        }
    }
    daily
}
