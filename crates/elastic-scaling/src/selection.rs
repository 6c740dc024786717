//! Device matching and selection.
//!
//! For every enabled matching policy of the (resource type, action) pair the
//! selector loads the policy's template, pages candidates out of the device
//! search, partitions them by cluster assignment and greedily packs them
//! against the resource delta. Per-policy picks are concatenated and
//! de-duplicated by device id.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::delta::ResourceDelta;
use crate::error::{Result, ScalingError};
use crate::query::{with_extra_conditions, DeviceMatchingPolicy, DeviceQuery, FilterGroup};
use crate::store::PolicyStore;
use crate::types::{CandidateDevice, ClusterId, DeviceId, Metric, ResourceType, ThresholdAction};

/// Filtered device search collaborator.
pub trait DeviceSearch: Send + Sync {
    /// Returns one page of devices matching the query.
    ///
    /// # Errors
    ///
    /// Returns [`ScalingError::DeviceQuery`] if the search fails.
    fn search(&self, query: &DeviceQuery) -> Result<Vec<CandidateDevice>>;
}

/// Device inventory held in memory, searched with the same filter model.
#[derive(Debug, Default)]
pub struct InMemoryDeviceSearch {
    devices: RwLock<Vec<CandidateDevice>>,
}

impl InMemoryDeviceSearch {
    /// Creates an empty inventory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an inventory from a device list.
    #[must_use]
    pub fn with_devices(devices: Vec<CandidateDevice>) -> Self {
        Self {
            devices: RwLock::new(devices),
        }
    }

    /// Adds or replaces a device.
    pub fn upsert_device(&self, device: CandidateDevice) {
        let mut devices = self.devices.write();
        devices.retain(|d| d.id != device.id);
        devices.push(device);
    }

    /// Replaces the whole inventory.
    pub fn replace_devices(&self, devices: Vec<CandidateDevice>) {
        *self.devices.write() = devices;
    }

    /// Copy of the inventory.
    #[must_use]
    pub fn devices(&self) -> Vec<CandidateDevice> {
        self.devices.read().clone()
    }

    /// Number of devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    /// Whether the inventory is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }
}

impl DeviceSearch for InMemoryDeviceSearch {
    fn search(&self, query: &DeviceQuery) -> Result<Vec<CandidateDevice>> {
        if query.page_size == 0 {
            return Err(ScalingError::DeviceQuery {
                message: "page size must be positive".into(),
            });
        }
        let mut matching: Vec<CandidateDevice> = self
            .devices
            .read()
            .iter()
            .filter(|d| query.matches(d))
            .cloned()
            .collect();
        matching.sort_by_key(|d| d.id);
        Ok(matching
            .into_iter()
            .skip(query.offset())
            .take(query.page_size)
            .collect())
    }
}

/// Devices picked for one order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Selection {
    /// Picked devices, de-duplicated, in selection order.
    pub devices: Vec<CandidateDevice>,
    /// Candidates returned by the search across all policies.
    pub candidates_found: usize,
}

impl Selection {
    /// Ids of the picked devices.
    #[must_use]
    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.devices.iter().map(|d| d.id).collect()
    }

    /// Whether nothing was picked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Resolves policies to candidates and picks devices.
pub struct DeviceSelector<P: PolicyStore + ?Sized, D: DeviceSearch + ?Sized> {
    policies: Arc<P>,
    search: Arc<D>,
    candidate_cap: usize,
    page_size: usize,
}

impl<P: PolicyStore + ?Sized, D: DeviceSearch + ?Sized> DeviceSelector<P, D> {
    /// Creates a selector.
    #[must_use]
    pub fn new(policies: Arc<P>, search: Arc<D>, candidate_cap: usize, page_size: usize) -> Self {
        Self {
            policies,
            search,
            candidate_cap,
            page_size: page_size.max(1),
        }
    }

    /// Picks devices to move into (entry) or out of (exit) a cluster pool.
    ///
    /// # Errors
    ///
    /// Returns error if no enabled policy exists, a template is missing or
    /// malformed, or the device search fails.
    pub fn select(
        &self,
        action: ThresholdAction,
        cluster_id: ClusterId,
        resource_type: &ResourceType,
        delta: ResourceDelta,
    ) -> Result<Selection> {
        let mut policies: Vec<DeviceMatchingPolicy> = self
            .policies
            .matching_policies(resource_type, action)?
            .into_iter()
            .filter(|p| p.enabled)
            .collect();
        policies.sort_by_key(|p| (p.priority, p.id));

        if policies.is_empty() {
            return Err(ScalingError::InvalidQueryTemplateId {
                reason: format!("no enabled matching policy for {resource_type} {action}"),
            });
        }

        let mut selection = Selection::default();
        let mut seen: HashSet<DeviceId> = HashSet::new();

        for policy in &policies {
            let groups = self.policy_groups(policy)?;
            let candidates = self.fetch_candidates(groups)?;
            selection.candidates_found += candidates.len();

            let tiers = partition_candidates(candidates, action, cluster_id);
            let picked = select_from_tiers(tiers, delta);

            tracing::debug!(
                policy = %policy.id,
                cluster = %cluster_id,
                resource_type = %resource_type,
                picked = picked.len(),
                "policy selection complete"
            );

            for device in picked {
                if seen.insert(device.id) {
                    selection.devices.push(device);
                }
            }
        }

        Ok(selection)
    }

    fn policy_groups(&self, policy: &DeviceMatchingPolicy) -> Result<Vec<FilterGroup>> {
        let template_id = policy
            .query_template_id
            .ok_or_else(|| ScalingError::InvalidQueryTemplateId {
                reason: format!("policy {} has no query template", policy.id),
            })?;
        let template = self
            .policies
            .query_template(template_id)?
            .ok_or_else(|| ScalingError::QueryTemplateNotFound {
                template_id: template_id.to_string(),
            })?;
        let groups = template.parse_groups()?;
        Ok(with_extra_conditions(groups, &policy.extra_conditions))
    }

    fn fetch_candidates(&self, groups: Vec<FilterGroup>) -> Result<Vec<CandidateDevice>> {
        let mut query = DeviceQuery::new(groups, self.page_size);
        let mut candidates = Vec::new();

        loop {
            let page = self.search.search(&query)?;
            let short_page = page.len() < query.page_size;
            candidates.extend(page);

            if short_page || candidates.len() >= self.candidate_cap {
                break;
            }
            query = query.next_page();
        }

        candidates.truncate(self.candidate_cap);
        Ok(candidates)
    }
}

/// Splits candidates into priority tiers.
///
/// Entry: unassigned devices first, then devices assigned to other clusters,
/// each tier largest first. Devices already in the target cluster are dropped.
/// Exit: only devices in the target cluster, smallest first.
#[must_use]
pub fn partition_candidates(
    candidates: Vec<CandidateDevice>,
    action: ThresholdAction,
    cluster_id: ClusterId,
) -> Vec<Vec<CandidateDevice>> {
    match action {
        ThresholdAction::PoolEntry => {
            let (mut free, mut elsewhere): (Vec<_>, Vec<_>) = candidates
                .into_iter()
                .filter(|d| !d.is_assigned_to(cluster_id))
                .partition(CandidateDevice::is_unassigned);
            free.sort_by(|a, b| b.cpu.total_cmp(&a.cpu).then(b.memory.total_cmp(&a.memory)));
            elsewhere.sort_by(|a, b| b.cpu.total_cmp(&a.cpu).then(b.memory.total_cmp(&a.memory)));
            vec![free, elsewhere]
        }
        ThresholdAction::PoolExit => {
            let mut members: Vec<_> = candidates
                .into_iter()
                .filter(|d| d.is_assigned_to(cluster_id))
                .collect();
            members.sort_by(|a, b| a.cpu.total_cmp(&b.cpu).then(a.memory.total_cmp(&b.memory)));
            vec![members]
        }
    }
}

/// Picks devices from ordered tiers against a delta.
///
/// With a non-zero delta, takes devices in order until cumulative CPU and
/// memory both cover the absolute delta; takes everything if they never do.
/// With a zero delta, takes a count estimated from average device size.
#[must_use]
pub fn select_from_tiers(tiers: Vec<Vec<CandidateDevice>>, delta: ResourceDelta) -> Vec<CandidateDevice> {
    let ordered: Vec<CandidateDevice> = tiers.into_iter().flatten().collect();

    if delta.is_zero() {
        let count = heuristic_count(&ordered, delta);
        return ordered.into_iter().take(count).collect();
    }

    let cpu_demand = delta.demand(Metric::Cpu);
    let memory_demand = delta.demand(Metric::Memory);
    let mut cpu = 0.0;
    let mut memory = 0.0;
    let mut picked = Vec::new();

    for device in ordered {
        if cpu >= cpu_demand && memory >= memory_demand {
            break;
        }
        cpu += device.cpu;
        memory += device.memory;
        picked.push(device);
    }
    picked
}

/// Device count needed to cover a delta with average-sized devices.
///
/// At least 1, at most the number of candidates.
#[must_use]
pub fn heuristic_count(candidates: &[CandidateDevice], delta: ResourceDelta) -> usize {
    if candidates.is_empty() {
        return 0;
    }
    let n = candidates.len() as f64;
    let needed_for = |metric: Metric| {
        let average = candidates.iter().map(|d| d.capacity(metric)).sum::<f64>() / n;
        if average > 0.0 {
            (delta.demand(metric) / average).ceil() as usize
        } else {
            0
        }
    };
    needed_for(Metric::Cpu)
        .max(needed_for(Metric::Memory))
        .max(1)
        .min(candidates.len())
}
