//! Device query filters and matching policies.
//!
//! A [`QueryTemplate`] stores a JSON list of [`FilterGroup`]s. Groups are
//! OR-ed together and the conditions inside one group are AND-ed. A
//! [`DeviceMatchingPolicy`] picks the template used for a given
//! (resource type, action) pair and may add extra conditions to every group.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, ScalingError};
use crate::types::{CandidateDevice, PolicyId, ResourceType, TemplateId, ThresholdAction};

/// Comparison applied by a [`FilterCondition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    /// Field equals value.
    Eq,
    /// Field differs from value.
    Ne,
    /// Field equals one of the values in an array.
    In,
    /// Field equals none of the values in an array.
    NotIn,
    /// Numeric greater-than.
    Gt,
    /// Numeric greater-or-equal.
    Gte,
    /// Numeric less-than.
    Lt,
    /// Numeric less-or-equal.
    Lte,
    /// Text field contains the value.
    Contains,
    /// Field is absent or blank.
    IsEmpty,
    /// Field is present and not blank.
    IsNotEmpty,
}

/// A single predicate on a device field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    /// Field name: `id`, `hostname`, `cluster_id`, `cpu`, `memory` or an attribute key.
    pub field: String,
    /// Comparison.
    pub operator: FilterOperator,
    /// Operand; ignored by `is_empty` and `is_not_empty`.
    #[serde(default)]
    pub value: Value,
}

impl FilterCondition {
    /// Creates a condition.
    #[must_use]
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    /// Evaluates this condition against a device.
    #[must_use]
    pub fn matches(&self, device: &CandidateDevice) -> bool {
        let field = FieldValue::of(device, &self.field);
        match self.operator {
            FilterOperator::Eq => field.equals(&self.value),
            FilterOperator::Ne => !field.equals(&self.value),
            FilterOperator::In => self.value.as_array().is_some_and(|values| values.iter().any(|v| field.equals(v))),
            FilterOperator::NotIn => !self.value.as_array().is_some_and(|values| values.iter().any(|v| field.equals(v))),
            FilterOperator::Gt => field.compare(&self.value).is_some_and(std::cmp::Ordering::is_gt),
            FilterOperator::Gte => field.compare(&self.value).is_some_and(std::cmp::Ordering::is_ge),
            FilterOperator::Lt => field.compare(&self.value).is_some_and(std::cmp::Ordering::is_lt),
            FilterOperator::Lte => field.compare(&self.value).is_some_and(std::cmp::Ordering::is_le),
            FilterOperator::Contains => match (&field, self.value.as_str()) {
                (FieldValue::Text(text), Some(needle)) => text.contains(needle),
                _ => false,
            },
            FilterOperator::IsEmpty => field.is_empty(),
            FilterOperator::IsNotEmpty => !field.is_empty(),
        }
    }
}

/// A device field resolved for comparison.
#[derive(Debug, Clone, PartialEq)]
enum FieldValue {
    Number(f64),
    Text(String),
    Missing,
}

impl FieldValue {
    fn of(device: &CandidateDevice, field: &str) -> Self {
        match field {
            "id" => Self::Number(device.id.get() as f64),
            "hostname" => Self::Text(device.hostname.clone()),
            // Unassigned devices have no cluster.
            "cluster_id" => device
                .cluster_id
                .filter(|c| c.get() != 0)
                .map_or(Self::Missing, |c| Self::Number(c.get() as f64)),
            "cpu" => Self::Number(device.cpu),
            "memory" => Self::Number(device.memory),
            key => device
                .attributes
                .get(key)
                .map_or(Self::Missing, |v| Self::Text(v.clone())),
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(t) => t.trim().parse().ok(),
            Self::Missing => None,
        }
    }

    fn equals(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Missing, _) => false,
            (_, Value::Number(n)) => {
                matches!((self.as_number(), n.as_f64()), (Some(a), Some(b)) if (a - b).abs() < f64::EPSILON)
            }
            (Self::Text(t), Value::String(s)) => t == s,
            (Self::Number(n), Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .is_ok_and(|parsed| (parsed - n).abs() < f64::EPSILON),
            (Self::Text(t), Value::Bool(b)) => t.eq_ignore_ascii_case(if *b { "true" } else { "false" }),
            _ => false,
        }
    }

    fn compare(&self, value: &Value) -> Option<std::cmp::Ordering> {
        let lhs = self.as_number()?;
        let rhs = match value {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.trim().parse().ok()?,
            _ => return None,
        };
        lhs.partial_cmp(&rhs)
    }

    fn is_empty(&self) -> bool {
        match self {
            Self::Missing => true,
            Self::Text(t) => t.trim().is_empty(),
            Self::Number(_) => false,
        }
    }
}

/// Conditions that must all hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FilterGroup {
    /// AND-ed conditions.
    #[serde(default)]
    pub conditions: Vec<FilterCondition>,
}

impl FilterGroup {
    /// Creates a group from conditions.
    #[must_use]
    pub const fn new(conditions: Vec<FilterCondition>) -> Self {
        Self { conditions }
    }

    /// Whether every condition holds for the device.
    #[must_use]
    pub fn matches(&self, device: &CandidateDevice) -> bool {
        self.conditions.iter().all(|c| c.matches(device))
    }
}

/// A stored device filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryTemplate {
    /// Unique identifier.
    pub id: TemplateId,
    /// Human-readable name.
    pub name: String,
    /// JSON array of filter groups.
    pub filter_groups_json: String,
}

impl QueryTemplate {
    /// Creates a template from its JSON body.
    #[must_use]
    pub fn new(id: u64, name: impl Into<String>, filter_groups_json: impl Into<String>) -> Self {
        Self {
            id: TemplateId::new(id),
            name: name.into(),
            filter_groups_json: filter_groups_json.into(),
        }
    }

    /// Creates a template from already-built groups.
    ///
    /// # Errors
    ///
    /// Returns error if the groups cannot be serialized.
    pub fn from_groups(id: u64, name: impl Into<String>, groups: &[FilterGroup]) -> Result<Self> {
        let json = serde_json::to_string(groups).map_err(|e| ScalingError::QueryTemplateUnmarshal {
            template_id: id.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(id, name, json))
    }

    /// Parses the stored filter groups.
    ///
    /// # Errors
    ///
    /// Returns [`ScalingError::QueryTemplateUnmarshal`] if the body is not valid.
    pub fn parse_groups(&self) -> Result<Vec<FilterGroup>> {
        serde_json::from_str(&self.filter_groups_json).map_err(|e| ScalingError::QueryTemplateUnmarshal {
            template_id: self.id.to_string(),
            reason: e.to_string(),
        })
    }
}

/// AND-s extra conditions into every group.
///
/// With no groups, the extras form the only group.
#[must_use]
pub fn with_extra_conditions(mut groups: Vec<FilterGroup>, extra: &[FilterCondition]) -> Vec<FilterGroup> {
    if extra.is_empty() {
        return groups;
    }
    if groups.is_empty() {
        return vec![FilterGroup::new(extra.to_vec())];
    }
    for group in &mut groups {
        group.conditions.extend(extra.iter().cloned());
    }
    groups
}

/// One page of a device search.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceQuery {
    /// OR-ed filter groups; empty matches every device.
    pub groups: Vec<FilterGroup>,
    /// Zero-based page index.
    pub page: usize,
    /// Maximum devices per page.
    pub page_size: usize,
}

impl DeviceQuery {
    /// Creates a query for the first page.
    #[must_use]
    pub const fn new(groups: Vec<FilterGroup>, page_size: usize) -> Self {
        Self {
            groups,
            page: 0,
            page_size,
        }
    }

    /// Same filters, next page.
    #[must_use]
    pub fn next_page(&self) -> Self {
        Self {
            groups: self.groups.clone(),
            page: self.page + 1,
            page_size: self.page_size,
        }
    }

    /// Index of the first device on this page.
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.page.saturating_mul(self.page_size)
    }

    /// Whether the device passes the filters.
    #[must_use]
    pub fn matches(&self, device: &CandidateDevice) -> bool {
        self.groups.is_empty() || self.groups.iter().any(|g| g.matches(device))
    }
}

/// Chooses the device filter for a (resource type, action) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceMatchingPolicy {
    /// Unique identifier.
    pub id: PolicyId,
    /// Human-readable name.
    pub name: String,
    /// Resource pool this policy serves.
    pub resource_type: ResourceType,
    /// Action this policy serves.
    pub action: ThresholdAction,
    /// Template holding the filter groups.
    #[serde(default)]
    pub query_template_id: Option<TemplateId>,
    /// Conditions AND-ed into every template group.
    #[serde(default)]
    pub extra_conditions: Vec<FilterCondition>,
    /// Lower values are applied first.
    #[serde(default)]
    pub priority: i32,
    /// Disabled policies are ignored.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

const fn default_enabled() -> bool {
    true
}

impl DeviceMatchingPolicy {
    /// Creates an enabled policy with no extra conditions.
    #[must_use]
    pub fn new(
        id: u64,
        name: impl Into<String>,
        resource_type: ResourceType,
        action: ThresholdAction,
        query_template_id: Option<u64>,
    ) -> Self {
        Self {
            id: PolicyId::new(id),
            name: name.into(),
            resource_type,
            action,
            query_template_id: query_template_id.map(TemplateId::new),
            extra_conditions: Vec::new(),
            priority: 0,
            enabled: true,
        }
    }

    /// Adds an extra condition.
    #[must_use]
    pub fn with_extra_condition(mut self, condition: FilterCondition) -> Self {
        self.extra_conditions.push(condition);
        self
    }

    /// Sets the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets whether the policy is enabled.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Whether this policy serves the given pair.
    #[must_use]
    pub fn applies_to(&self, resource_type: &ResourceType, action: ThresholdAction) -> bool {
        &self.resource_type == resource_type && self.action == action
    }
}
